//! Absolute deadlines threaded through every blocking call of the core.

use std::time::Duration;

use tokio::time::Instant;

use crate::core::OrchestratorError;

/// Absolute point in time after which pending work counts as timed out.
///
/// Built on the tokio clock, so paused-time tests see consistent values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Instant);

impl Deadline {
    /// Deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    /// Deadline at an explicit instant.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// Deadline from a caller-supplied budget, rejecting an empty budget.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidDeadline`] when `budget` is zero.
    pub fn from_budget(budget: Duration) -> Result<Self, OrchestratorError> {
        if budget.is_zero() {
            return Err(OrchestratorError::InvalidDeadline(
                "deadline budget must be greater than zero".into(),
            ));
        }
        Ok(Self::after(budget))
    }

    /// The underlying instant.
    #[must_use]
    pub const fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before the deadline, zero once elapsed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }

    /// A sub-deadline using `share` of the remaining budget, never later than `self`.
    ///
    /// `share` is clamped to `0.0..=1.0`.
    #[must_use]
    pub fn carve(&self, share: f64) -> Self {
        let share = share.clamp(0.0, 1.0);
        let slice = self.remaining().mul_f64(share);
        Self((Instant::now() + slice).min(self.0))
    }
}
