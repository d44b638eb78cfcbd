//! Millisecond clocks for nodes that act on time rather than on samples
//!
//! Sensing nodes take their time from the samples they receive. The collector has
//! no sample stream, so it reads a [`Clock`]: either the process monotonic clock,
//! or a [`ManualClock`] that simulated sources push forward as they emit samples.

use super::sample::Millis;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Source of node-local milliseconds
pub trait Clock: Send {
    fn now_ms(&self) -> Millis;
}

/// Wall-clock milliseconds since construction, truncated to 32 bits.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Millis {
        // Truncation gives the same wrap behaviour as a hardware counter.
        self.origin.elapsed().as_millis() as Millis
    }
}

/// Shared, explicitly driven clock.
///
/// Clones observe the same time. [`advance_to`](Self::advance_to) never moves the
/// clock backwards, so several sources can drive it concurrently.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_ms: Millis) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    /// Move the clock to `time_ms` unless it is already later.
    pub fn advance_to(&self, time_ms: Millis) {
        self.now.fetch_max(time_ms, Ordering::Relaxed);
    }

    /// Force the clock to `time_ms`.
    pub fn set(&self, time_ms: Millis) {
        self.now.store(time_ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::Relaxed)
    }
}
