//! Monotonic millisecond clock shared by every timed component.
//!
//! All timestamps in the trainer (ticks, pose samples, hits) come from one
//! clock so that cross-stream deltas are meaningful. The trait keeps the
//! session logic independent of wall time and lets tests drive timestamps
//! deterministically.

use std::sync::Mutex;
use std::time::Instant;

/// Trait representing a monotonic time source used for all event timestamps.
pub trait ClockSource: Send + Sync {
    /// Milliseconds elapsed since the clock's epoch.
    fn now_ms(&self) -> f64;
}

/// Default clock backed by `Instant::now`, anchored at creation.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock for deterministic tests.
pub struct ManualClock {
    now_ms: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_ms: Mutex::new(start_ms),
        }
    }

    /// Move the clock forward by `delta_ms`.
    pub fn advance(&self, delta_ms: f64) {
        let mut now = self.now_ms.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta_ms;
    }

    /// Jump the clock to an absolute timestamp.
    pub fn set(&self, timestamp_ms: f64) {
        let mut now = self.now_ms.lock().unwrap_or_else(|e| e.into_inner());
        *now = timestamp_ms;
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.now_ms.lock().unwrap_or_else(|e| e.into_inner())
    }
}
