//! Correlation ids linking a request to its response
//!
//! Ids are minted by the client, starting at 1, and travel as decimal strings
//! inside the envelope. The remote echoes the id back on the matching
//! response; notifications carry no id (or `"0"`).

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Client-assigned token identifying one in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Create a correlation id from a raw value
    ///
    /// Returns `None` for zero, which the wire reserves for "untracked".
    pub fn new(value: u64) -> Option<Self> {
        (value != 0).then_some(Self(value))
    }

    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Parse the string form found on the wire
    ///
    /// Empty strings, `"0"` and anything that is not a decimal integer yield
    /// `None`: such an envelope is not a tracked response.
    pub fn from_wire(raw: &str) -> Option<Self> {
        raw.parse::<u64>().ok().and_then(Self::new)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = InvalidCorrelationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s).ok_or_else(|| InvalidCorrelationId(s.to_string()))
    }
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Error returned when a string is not a usable correlation id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid correlation id: {0:?}")]
pub struct InvalidCorrelationId(pub String);

/// Monotonic source of correlation ids for one connection
#[derive(Debug)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    /// Create a generator whose first id is 1
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Mint the next id
    pub fn next_id(&self) -> CorrelationId {
        // Only the connection issuing sends touches this counter, so relaxed
        // ordering is enough for uniqueness.
        CorrelationId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// The most recently minted id, if any
    pub fn last(&self) -> Option<CorrelationId> {
        CorrelationId::new(self.last.load(Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
