//! Stored timestamp and its validator.
//!
//! A stored value is a UTC instant written as ISO-8601 with an optional
//! fractional part and a literal `Z`, e.g. `2025-01-01T00:00:00.000Z`.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static TIMESTAMP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(\.[0-9]+)?Z$")
        .expect("timestamp pattern is valid")
});

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ValidationError {
    #[error("timestamp is empty")]
    Empty,

    #[error("timestamp does not match YYYY-MM-DDTHH:MM:SS[.fff]Z")]
    Pattern,

    #[error("timestamp is not a valid calendar instant")]
    Parse,
}

impl ValidationError {
    /// Stable short reason (`"empty"`, `"pattern"`, `"parse"`).
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::Empty => "empty",
            ValidationError::Pattern => "pattern",
            ValidationError::Parse => "parse",
        }
    }
}

/// Checks a raw candidate without constructing anything.
///
/// Calendar validity uses chrono's RFC 3339 parser, which is strict:
/// `2025-13-01T00:00:00Z` is rejected with [`ValidationError::Parse`] instead
/// of rolling over into the next year.
pub fn validate(candidate: Option<&str>) -> Result<(), ValidationError> {
    let candidate = match candidate {
        Some(c) if !c.trim().is_empty() => c,
        _ => return Err(ValidationError::Empty),
    };

    if !TIMESTAMP_PATTERN.is_match(candidate) {
        return Err(ValidationError::Pattern);
    }

    DateTime::parse_from_rfc3339(candidate)
        .map(|_| ())
        .map_err(|_| ValidationError::Parse)
}

/// A validated timestamp.
///
/// `Ord` compares the encoded strings, not the instants. The monotonic guard
/// relies on that.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoredTimestamp(String);

impl StoredTimestamp {
    /// Validate `raw` and wrap it.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        validate(Some(raw))?;
        Ok(Self(raw.to_string()))
    }

    /// Format an instant the way new values are stored (milliseconds, `Z`).
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The instant this value encodes.
    pub fn instant(&self) -> DateTime<Utc> {
        // validated on construction
        DateTime::parse_from_rfc3339(&self.0)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default()
    }
}

impl fmt::Display for StoredTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StoredTimestamp {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(Some(&value))?;
        Ok(Self(value))
    }
}

impl From<StoredTimestamp> for String {
    fn from(value: StoredTimestamp) -> Self {
        value.0
    }
}
