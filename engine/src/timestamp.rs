//! Logical timestamps for last-writer-wins ordering.
//!
//! Clients stamp edits with wall-clock milliseconds while the server stores
//! instants. Both forms are normalized to UTC epoch milliseconds on the way
//! in, so comparisons never mix units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A point in time as UTC milliseconds since the Unix epoch.
///
/// Serializes as a JSON integer. Deserializes from an integer (epoch
/// milliseconds) or an RFC 3339 string (a stored instant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a timestamp from epoch milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Epoch milliseconds.
    pub const fn millis(self) -> i64 {
        self.0
    }

    /// Normalize a stored instant.
    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        Self(instant.timestamp_millis())
    }

    /// Convert back to an instant. `None` if out of chrono's range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Parse an RFC 3339 instant such as `2024-02-01T00:00:00.000Z`.
    pub fn parse_instant(text: &str) -> Result<Self, chrono::ParseError> {
        let parsed = DateTime::parse_from_rfc3339(text)?;
        Ok(Self::from_datetime(parsed.with_timezone(&Utc)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(instant) => write!(f, "{}", instant.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::from_datetime(instant)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Instant(String),
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WireTimestamp::deserialize(deserializer)? {
            WireTimestamp::Millis(millis) => Ok(Self(millis)),
            WireTimestamp::Instant(text) => {
                Self::parse_instant(&text).map_err(serde::de::Error::custom)
            }
        }
    }
}
