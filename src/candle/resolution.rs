//! Candle resolutions (bucket widths)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MILLIS_PER_SECOND: i64 = 1_000;
const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Errors produced when parsing a resolution string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Input was empty
    #[error("Resolution is empty")]
    Empty,
    /// Numeric part could not be parsed
    #[error("Invalid resolution value: {0}")]
    InvalidNumber(String),
    /// Unit suffix is not one of ms, s, m, h, d
    #[error("Unknown resolution unit: {0}")]
    UnknownUnit(String),
    /// Width must be strictly positive
    #[error("Resolution must be positive")]
    NonPositive,
}

/// Fixed bucket width for a candle series.
///
/// Stored as whole milliseconds. Parsed from strings such as `"1s"`, `"5m"`,
/// `"1h"` and rendered back with the largest unit that divides it evenly, so
/// `"60s"` and `"1m"` are the same resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    millis: i64,
}

impl Resolution {
    /// One second
    pub const SECOND: Self = Self {
        millis: MILLIS_PER_SECOND,
    };
    /// One minute
    pub const MINUTE: Self = Self {
        millis: MILLIS_PER_MINUTE,
    };
    /// One hour
    pub const HOUR: Self = Self {
        millis: MILLIS_PER_HOUR,
    };
    /// One day
    pub const DAY: Self = Self {
        millis: MILLIS_PER_DAY,
    };

    /// Create a resolution from a width in milliseconds
    pub fn from_millis(millis: i64) -> Result<Self, ResolutionError> {
        if millis <= 0 {
            return Err(ResolutionError::NonPositive);
        }
        Ok(Self { millis })
    }

    /// Create a resolution from a width in seconds
    pub fn from_secs(secs: i64) -> Result<Self, ResolutionError> {
        Self::from_millis(secs.saturating_mul(MILLIS_PER_SECOND))
    }

    /// Bucket width in milliseconds
    pub fn as_millis(&self) -> i64 {
        self.millis
    }

    /// Bucket width as a chrono duration
    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.millis)
    }

    /// Canonical short label, e.g. `1s`, `15m`, `1h`
    pub fn label(&self) -> String {
        let (value, unit) = if self.millis % MILLIS_PER_DAY == 0 {
            (self.millis / MILLIS_PER_DAY, "d")
        } else if self.millis % MILLIS_PER_HOUR == 0 {
            (self.millis / MILLIS_PER_HOUR, "h")
        } else if self.millis % MILLIS_PER_MINUTE == 0 {
            (self.millis / MILLIS_PER_MINUTE, "m")
        } else if self.millis % MILLIS_PER_SECOND == 0 {
            (self.millis / MILLIS_PER_SECOND, "s")
        } else {
            (self.millis, "ms")
        };
        format!("{}{}", value, unit)
    }

    /// Start of the bucket containing `timestamp`.
    ///
    /// `floor(timestamp / width) * width` on the Unix epoch, using Euclidean
    /// division so instants before 1970 floor downwards too.
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let ms = timestamp.timestamp_millis();
        let start = ms.div_euclid(self.millis) * self.millis;
        DateTime::from_timestamp_millis(start).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return Err(ResolutionError::Empty);
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ResolutionError::UnknownUnit(String::new()))?;
        let (number, unit) = s.split_at(split);

        let value: i64 = number
            .parse()
            .map_err(|_| ResolutionError::InvalidNumber(number.to_string()))?;

        let multiplier = match unit {
            "ms" => 1,
            "s" => MILLIS_PER_SECOND,
            "m" => MILLIS_PER_MINUTE,
            "h" => MILLIS_PER_HOUR,
            "d" => MILLIS_PER_DAY,
            other => return Err(ResolutionError::UnknownUnit(other.to_string())),
        };

        Self::from_millis(value.saturating_mul(multiplier))
    }
}

impl TryFrom<String> for Resolution {
    type Error = ResolutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.label()
    }
}
