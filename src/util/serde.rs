//! Shared identifier and value types with their serde representations.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of pooled external resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Scoped session from the persistence layer.
    DbSession,
    /// Connection from the outbound HTTP client.
    HttpConnection,
}

impl ResourceKind {
    /// Every resource kind, in declaration order.
    pub const ALL: [Self; 2] = [Self::DbSession, Self::HttpConnection];

    /// Configuration name of the kind (`pool.capacity.<name>`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DbSession => "db_session",
            Self::HttpConnection => "http_connection",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "db_session" => Ok(Self::DbSession),
            "http_connection" => Ok(Self::HttpConnection),
            other => Err(format!("unknown resource kind `{other}`")),
        }
    }
}

/// Caller-supplied identifier of a work item, unique within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    /// Create an identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque token threading one logical request through logs and error contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID, e.g. one received from an upstream caller.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a human duration: `250ms`, `5s`, `2m`, or a bare number of milliseconds.
///
/// # Errors
///
/// Returns a description of the problem when the value is not a valid duration.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let value = input.trim();
    let (digits, unit) = value
        .find(|c: char| !c.is_ascii_digit())
        .map_or((value, ""), |idx| value.split_at(idx));
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration `{input}`"))?;
    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount.saturating_mul(60))),
        other => Err(format!("unknown duration unit `{other}` in `{input}`")),
    }
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
///
/// Reading also accepts the string forms understood by [`parse_duration`].
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    /// Deserialize a duration from milliseconds or a string such as `"5s"`.
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors and rejects malformed duration strings.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => super::parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}
