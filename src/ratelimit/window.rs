//! Fixed window arithmetic and the clock it is computed from.

use parking_lot::RwLock;
use std::time::Duration;

/// Source of wall-clock time in whole Unix seconds.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// A clock that only moves when told to. Used to simulate window crossings.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: RwLock<u64>,
}

impl ManualClock {
    pub fn new(now_unix: u64) -> Self {
        Self {
            now: RwLock::new(now_unix),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by.as_secs();
    }

    pub fn set(&self, now_unix: u64) {
        *self.now.write() = now_unix;
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> u64 {
        *self.now.read()
    }
}

/// A clock-aligned, non-overlapping time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedWindow {
    /// `floor(now / length_secs)`
    pub index: u64,
    /// Window length in seconds
    pub length_secs: u64,
}

impl FixedWindow {
    /// The window containing `now_unix`.
    pub fn at(now_unix: u64, length_secs: u64) -> Self {
        let length_secs = length_secs.max(1);
        Self {
            index: now_unix / length_secs,
            length_secs,
        }
    }

    /// Unix second at which the next window begins.
    pub fn reset_at(&self) -> u64 {
        (self.index + 1) * self.length_secs
    }

    /// Expiry for a counter written in this window. Two window lengths, so
    /// the previous window's counter is still around briefly after rollover.
    pub fn counter_ttl(&self) -> Duration {
        Duration::from_secs(self.length_secs * 2)
    }
}
