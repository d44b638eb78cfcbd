//! Voltage samples and node-local millisecond time
//!
//! Every node free-runs its own 32-bit millisecond counter, the same width as a
//! microcontroller `millis()` counter. Elapsed times are always computed with
//! [`elapsed_ms`] so comparisons stay correct across the wrap at `u32::MAX`.

use std::fmt;

/// Node-local monotonic timestamp in milliseconds. Wraps after ~49.7 days.
pub type Millis = u32;

/// Time elapsed from `since` to `now`, correct across a counter wraparound.
#[inline]
pub fn elapsed_ms(now: Millis, since: Millis) -> Millis {
    now.wrapping_sub(since)
}

/// One instantaneous reading of the analog input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoltageSample {
    /// Measured level in volts
    pub volts: f32,
    /// Node-local time the reading was taken
    pub time_ms: Millis,
}

impl VoltageSample {
    /// Create a new sample
    pub fn new(volts: f32, time_ms: Millis) -> Self {
        Self { volts, time_ms }
    }
}

impl fmt::Display for VoltageSample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Sample[{:.3} V, t={} ms]", self.volts, self.time_ms)
    }
}
