use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Time duration with sub-millisecond precision (stored as fractional seconds).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Duration {
    /// Duration in seconds.
    seconds: f64,
}

impl Duration {
    /// Create a duration from seconds. Negative input clamps to zero.
    pub fn from_seconds(s: f64) -> Self {
        Self {
            seconds: s.max(0.0),
        }
    }

    /// Create a duration from milliseconds.
    pub fn from_millis(ms: f64) -> Self {
        Self::from_seconds(ms / 1000.0)
    }

    pub fn zero() -> Self {
        Self { seconds: 0.0 }
    }

    pub fn as_seconds(&self) -> f64 {
        self.seconds
    }

    pub fn as_millis(&self) -> f64 {
        self.seconds * 1000.0
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0.0
    }

    /// Convert to a `std::time::Duration`, e.g. for condvar timeouts.
    pub fn to_std(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.seconds)
    }
}

impl Default for Duration {
    fn default() -> Self {
        Duration::zero()
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration::from_seconds(self.seconds + rhs.seconds)
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration::from_seconds((self.seconds - rhs.seconds).max(0.0))
    }
}

impl Mul<f64> for Duration {
    type Output = Duration;
    fn mul(self, rhs: f64) -> Duration {
        Duration::from_seconds(self.seconds * rhs)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seconds < 1.0 {
            write!(f, "{:.0}ms", self.seconds * 1000.0)
        } else {
            write!(f, "{:.2}s", self.seconds)
        }
    }
}

/// A point on a monotonic clock, in seconds from the clock's origin.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp {
    seconds: f64,
}

impl Timestamp {
    pub fn from_seconds(s: f64) -> Self {
        Self {
            seconds: s.max(0.0),
        }
    }

    pub fn zero() -> Self {
        Self { seconds: 0.0 }
    }

    pub fn as_seconds(&self) -> f64 {
        self.seconds
    }

    /// Duration elapsed since `earlier`, saturating at zero.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_seconds(self.seconds - earlier.seconds)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::zero()
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp::from_seconds(self.seconds + rhs.as_seconds())
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp::from_seconds(self.seconds - rhs.as_seconds())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = (self.seconds * 1000.0) as u64;
        let hours = total_ms / 3_600_000;
        let minutes = (total_ms % 3_600_000) / 60_000;
        let secs = (total_ms % 60_000) / 1_000;
        let ms = total_ms % 1_000;
        write!(f, "{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, ms)
    }
}

/// Source of monotonic time for the timeline.
///
/// Playback reads the clock once per frame; tests substitute a
/// [`ManualClock`] so every evaluation is reproducible.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time, measured from the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_seconds(self.origin.elapsed().as_secs_f64())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.bits.store(at.as_seconds().to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_seconds(f64::from_bits(self.bits.load(Ordering::SeqCst)))
    }
}
