use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::TypesError;

const MICROS_PER_SECOND: u64 = 1_000_000;
const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// Microsecond timestamp relative to the Unix epoch.
///
/// The zero value is the "null" time used for unset fields and open range
/// starts. `Time::max()` is the unbounded-future sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Time(i64);

impl Time {
    pub const fn from_internal_value(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn to_internal_value(self) -> i64 {
        self.0
    }

    pub const fn null() -> Self {
        Self(0)
    }

    pub const fn max() -> Self {
        Self(i64::MAX)
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn is_max(self) -> bool {
        self.0 == i64::MAX
    }

    /// Current wall-clock time. A clock set before the epoch reads as null.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(micros)
    }

    pub fn from_unix_seconds(seconds: i64) -> Self {
        Self(seconds.saturating_mul(MICROS_PER_SECOND as i64))
    }
}

fn duration_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Time {
        Time(self.0.saturating_add(duration_micros(rhs)))
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    fn sub(self, rhs: Duration) -> Time {
        Time(self.0.saturating_sub(duration_micros(rhs)))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Time {
    type Err = TypesError;

    /// Parses the raw microsecond value, or the keywords `null` and `max`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "null" => Ok(Time::null()),
            "max" => Ok(Time::max()),
            raw => raw
                .parse::<i64>()
                .map(Time)
                .map_err(|_| TypesError::InvalidTime(s.to_string())),
        }
    }
}

pub const fn microseconds(n: u64) -> Duration {
    Duration::from_micros(n)
}

pub const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * SECONDS_PER_MINUTE)
}

pub const fn hours(n: u64) -> Duration {
    Duration::from_secs(n * SECONDS_PER_HOUR)
}

pub const fn days(n: u64) -> Duration {
    Duration::from_secs(n * SECONDS_PER_DAY)
}
