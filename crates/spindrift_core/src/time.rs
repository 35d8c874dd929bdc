//! # Simulation Time
//!
//! Scheduling works in rounded integer milliseconds while kinematics work in
//! floating seconds. Every comparison between the two goes through an epsilon
//! of one millisecond.
//!
//! Absolute times in seconds are `f64`: an `f32` clock loses millisecond
//! resolution after about four and a half hours of simulated time.

/// Tolerance used by every liveness comparison, in seconds.
pub const EPSILON_SECS: f64 = 0.001;

/// Sentinel returned by an empty expiration queue.
///
/// Callers compare against it like any other time and never branch on emptiness.
pub const FAR_FUTURE_MS: i64 = i64::MAX;

/// Rounds a time in seconds to the nearest whole millisecond.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn rounded_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// A point on the simulation clock.
///
/// Stored as whole milliseconds since the last reset; the seconds view is
/// derived so both sides of the engine agree on the same instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime {
    ms: i64,
}

impl SimTime {
    /// The start of the clock.
    pub const ZERO: Self = Self { ms: 0 };

    /// Creates a time from whole milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_ms(ms: i64) -> Self {
        Self { ms }
    }

    /// Creates a time from seconds, rounded to the nearest millisecond.
    #[inline]
    #[must_use]
    pub fn from_secs(seconds: f64) -> Self {
        Self {
            ms: rounded_ms(seconds),
        }
    }

    /// Returns the time in whole milliseconds.
    #[inline]
    #[must_use]
    pub const fn ms(self) -> i64 {
        self.ms
    }

    /// Returns the time in seconds.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn secs(self) -> f64 {
        self.ms as f64 / 1000.0
    }
}
