//! Host Time Units
//!
//! The playback host measures positions and durations in 100-nanosecond
//! ticks. Timestamps may be negative (a stream starting before the
//! container's start offset), so the tick count is signed.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// Number of host ticks in one second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Position or duration in host ticks (100 ns).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostTime(i64);

impl HostTime {
    pub const ZERO: HostTime = HostTime(0);

    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> i64 {
        self.0
    }

    pub fn from_secs_f64(seconds: f64) -> Self {
        Self((seconds * TICKS_PER_SECOND as f64) as i64)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    /// Convert to a [`Duration`], clamping negative values to zero.
    pub fn as_duration(self) -> Duration {
        if self.0 <= 0 {
            return Duration::ZERO;
        }
        let secs = (self.0 / TICKS_PER_SECOND) as u64;
        let nanos = ((self.0 % TICKS_PER_SECOND) * 100) as u32;
        Duration::new(secs, nanos)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl From<Duration> for HostTime {
    fn from(duration: Duration) -> Self {
        let ticks = duration.as_nanos() / 100;
        Self(ticks.min(i64::MAX as u128) as i64)
    }
}

impl Add for HostTime {
    type Output = HostTime;

    fn add(self, rhs: HostTime) -> HostTime {
        HostTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for HostTime {
    type Output = HostTime;

    fn sub(self, rhs: HostTime) -> HostTime {
        HostTime(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}
