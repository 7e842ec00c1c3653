pub mod clock;
pub mod serde;

pub use self::clock::*;
pub use self::serde::*;
