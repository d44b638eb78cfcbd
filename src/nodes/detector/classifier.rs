//! Pulse state machine and validity rules
//!
//! ```text
//!          dip >= min_drop_v              recovered / timed out
//!   Idle ───────────────────────> Active ───────────────────────> Refractory
//!    ^                                                                 │
//!    └──────────────────── refractory_ms elapsed ──────────────────────┘
//! ```
//!
//! A pulse is judged when it ends. Every rule that fails is recorded in order,
//! so a verdict explains all of the reasons a dip was not counted.

use super::baseline::BaselineTracker;
use super::burst::{BurstDecision, BurstGuard};
use crate::config::DetectorConfig;
use crate::runtime::{Millis, elapsed_ms};
use std::fmt;

/// A dip currently being followed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivePulse {
    pub start_ms: Millis,
    /// Baseline frozen when the dip began
    pub baseline_at_start: f32,
    /// Lowest level seen so far
    pub min_volts: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PulseState {
    Idle,
    Active(ActivePulse),
    Refractory { since_ms: Millis },
}

/// Why a resolved pulse was not counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    AmplitudeTooLow,
    /// Deeper than any real event; treated as a discharge
    AmplitudeTooHigh,
    DurationOutOfRange,
    TooCloseToPrevious,
    /// Ended inside the quiet window around a report
    QuietWindow,
    BurstBlocked,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let reason = match self {
            Rejection::AmplitudeTooLow => "amplitude too low",
            Rejection::AmplitudeTooHigh => "amplitude too high (possible discharge)",
            Rejection::DurationOutOfRange => "duration out of range",
            Rejection::TooCloseToPrevious => "too close to previous valid pulse",
            Rejection::QuietWindow => "inside communication quiet window",
            Rejection::BurstBlocked => "burst block active",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseEnd {
    /// Signal came back near the starting baseline
    Recovered,
    /// Still low after `max_pulse_ms`
    TimedOut,
}

/// Outcome of one resolved pulse
#[derive(Debug, Clone, PartialEq)]
pub struct PulseVerdict {
    pub start_ms: Millis,
    pub end_ms: Millis,
    pub duration_ms: Millis,
    pub amplitude_v: f32,
    pub baseline_v: f32,
    pub ended_by: PulseEnd,
    /// Failed rules in evaluation order; empty when the pulse is valid
    pub rejections: Vec<Rejection>,
}

impl PulseVerdict {
    pub fn is_valid(&self) -> bool {
        self.rejections.is_empty()
    }
}

/// What one classifier step did
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierStep {
    /// Idle, nothing below threshold
    Waiting,
    /// Idle during a burst blackout; detection suspended
    Suppressed,
    /// A candidate completed a burst and started the blackout
    BurstDetected,
    PulseStarted { drop_v: f32 },
    Tracking,
    Resolved(PulseVerdict),
    Refractory,
    /// Refractory period over, back to idle
    Rearmed,
}

#[derive(Debug, Clone)]
pub struct PulseClassifier {
    config: DetectorConfig,
    baseline: BaselineTracker,
    burst: BurstGuard,
    state: PulseState,
    last_valid_ms: Option<Millis>,
}

impl PulseClassifier {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            baseline: BaselineTracker::new(config.baseline_alpha),
            burst: BurstGuard::new(config.burst.clone()),
            state: PulseState::Idle,
            last_valid_ms: None,
            config,
        }
    }

    pub fn state(&self) -> PulseState {
        self.state
    }

    pub fn baseline(&self) -> Option<f32> {
        self.baseline.level()
    }

    pub fn last_valid_ms(&self) -> Option<Millis> {
        self.last_valid_ms
    }

    pub fn burst_guard(&self) -> &BurstGuard {
        &self.burst
    }

    /// Advance the state machine by one sample.
    pub fn step(&mut self, now: Millis, volts: f32, in_quiet_window: bool) -> ClassifierStep {
        self.baseline.seed(volts);
        let blocked = self.burst.is_blocked(now);

        match self.state {
            PulseState::Idle => self.step_idle(now, volts, blocked),
            PulseState::Active(pulse) => self.step_active(pulse, now, volts, in_quiet_window, blocked),
            PulseState::Refractory { since_ms } => {
                if elapsed_ms(now, since_ms) >= self.config.refractory_ms {
                    self.state = PulseState::Idle;
                    ClassifierStep::Rearmed
                } else {
                    ClassifierStep::Refractory
                }
            }
        }
    }

    fn step_idle(&mut self, now: Millis, volts: f32, blocked: bool) -> ClassifierStep {
        if blocked {
            return ClassifierStep::Suppressed;
        }

        let baseline = self.baseline.update(volts);
        let drop_v = baseline - volts;
        if drop_v < self.config.min_drop_v {
            return ClassifierStep::Waiting;
        }

        match self.burst.observe_candidate(now) {
            BurstDecision::Normal => {
                self.state = PulseState::Active(ActivePulse {
                    start_ms: now,
                    baseline_at_start: baseline,
                    min_volts: volts,
                });
                ClassifierStep::PulseStarted { drop_v }
            }
            BurstDecision::BlockNow => ClassifierStep::BurstDetected,
            BurstDecision::AlreadyBlocked => ClassifierStep::Suppressed,
        }
    }

    fn step_active(
        &mut self,
        mut pulse: ActivePulse,
        now: Millis,
        volts: f32,
        in_quiet_window: bool,
        blocked: bool,
    ) -> ClassifierStep {
        pulse.min_volts = pulse.min_volts.min(volts);
        let drop_now = pulse.baseline_at_start - volts;
        let duration_ms = elapsed_ms(now, pulse.start_ms);

        let ended_by = if drop_now < self.config.recovery_threshold_v() {
            PulseEnd::Recovered
        } else if duration_ms > self.config.max_pulse_ms {
            PulseEnd::TimedOut
        } else {
            self.state = PulseState::Active(pulse);
            return ClassifierStep::Tracking;
        };

        let amplitude_v = pulse.baseline_at_start - pulse.min_volts;
        let rejections = self.judge(amplitude_v, duration_ms, now, in_quiet_window, blocked);
        if rejections.is_empty() {
            self.last_valid_ms = Some(now);
        }

        self.state = PulseState::Refractory { since_ms: now };
        ClassifierStep::Resolved(PulseVerdict {
            start_ms: pulse.start_ms,
            end_ms: now,
            duration_ms,
            amplitude_v,
            baseline_v: pulse.baseline_at_start,
            ended_by,
            rejections,
        })
    }

    fn judge(
        &self,
        amplitude_v: f32,
        duration_ms: Millis,
        now: Millis,
        in_quiet_window: bool,
        blocked: bool,
    ) -> Vec<Rejection> {
        let cfg = &self.config;
        let mut rejections = Vec::new();

        if amplitude_v < cfg.min_drop_v {
            rejections.push(Rejection::AmplitudeTooLow);
        } else if amplitude_v > cfg.max_drop_v {
            rejections.push(Rejection::AmplitudeTooHigh);
        }

        if duration_ms < cfg.min_pulse_ms || duration_ms > cfg.max_pulse_ms {
            rejections.push(Rejection::DurationOutOfRange);
        }

        // The timing rules only apply to pulses that passed the shape checks
        if rejections.is_empty()
            && let Some(last) = self.last_valid_ms
            && elapsed_ms(now, last) < cfg.min_spacing_ms
        {
            rejections.push(Rejection::TooCloseToPrevious);
        }
        if rejections.is_empty() && in_quiet_window {
            rejections.push(Rejection::QuietWindow);
        }
        if rejections.is_empty() && blocked {
            rejections.push(Rejection::BurstBlocked);
        }

        rejections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `volts` once per millisecond from `from` to `to` inclusive, returning
    /// every resolved verdict.
    fn run(
        c: &mut PulseClassifier,
        from: Millis,
        to: Millis,
        volts: impl Fn(Millis) -> f32,
    ) -> Vec<PulseVerdict> {
        (from..=to)
            .filter_map(|t| match c.step(t, volts(t), false) {
                ClassifierStep::Resolved(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    fn dip(start: Millis, len: Millis, low: f32) -> impl Fn(Millis) -> f32 {
        move |t| if t >= start && t < start + len { low } else { 3.0 }
    }

    #[test]
    fn test_clean_dip_is_valid() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        let verdicts = run(&mut c, 0, 200, dip(100, 20, 2.6));
        assert_eq!(verdicts.len(), 1);
        let v = &verdicts[0];
        assert!(v.is_valid(), "{:?}", v.rejections);
        assert_eq!(v.start_ms, 100);
        assert_eq!(v.end_ms, 120);
        assert_eq!(v.duration_ms, 20);
        assert_eq!(v.ended_by, PulseEnd::Recovered);
        assert!((v.amplitude_v - 0.4).abs() < 1e-3);
        assert_eq!(c.last_valid_ms(), Some(120));
        assert_eq!(c.state(), PulseState::Refractory { since_ms: 120 });
    }

    #[test]
    fn test_short_dip_rejected_for_duration() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        let verdicts = run(&mut c, 0, 200, dip(100, 2, 2.6));
        assert_eq!(verdicts[0].rejections, vec![Rejection::DurationOutOfRange]);
    }

    #[test]
    fn test_long_dip_times_out() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        let verdicts = run(&mut c, 0, 300, dip(100, 150, 2.6));
        let v = &verdicts[0];
        assert_eq!(v.ended_by, PulseEnd::TimedOut);
        assert_eq!(v.duration_ms, 71);
        assert_eq!(v.rejections, vec![Rejection::DurationOutOfRange]);
    }

    #[test]
    fn test_discharge_rejected_for_amplitude() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        let verdicts = run(&mut c, 0, 200, dip(100, 20, 0.5));
        assert_eq!(verdicts[0].rejections, vec![Rejection::AmplitudeTooHigh]);
    }

    #[test]
    fn test_amplitude_too_low_is_always_first() {
        // A pulse only starts once the dip reaches min_drop_v, so shallow
        // amplitudes are checked against the rules directly.
        let c = PulseClassifier::new(DetectorConfig::default());
        assert_eq!(
            c.judge(0.1, 20, 1_000, false, false),
            vec![Rejection::AmplitudeTooLow]
        );
        assert_eq!(
            c.judge(0.1, 2, 1_000, true, true),
            vec![Rejection::AmplitudeTooLow, Rejection::DurationOutOfRange]
        );
        assert_eq!(
            c.judge(0.1, 500, 1_000, false, false),
            vec![Rejection::AmplitudeTooLow, Rejection::DurationOutOfRange]
        );
    }

    #[test]
    fn test_burst_block_rejects_otherwise_valid_pulse() {
        let c = PulseClassifier::new(DetectorConfig::default());
        assert_eq!(
            c.judge(0.4, 20, 1_000, false, true),
            vec![Rejection::BurstBlocked]
        );
        assert_eq!(
            c.judge(0.4, 20, 1_000, true, true),
            vec![Rejection::QuietWindow]
        );
    }

    #[test]
    fn test_refractory_blocks_immediate_second_dip() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        run(&mut c, 0, 120, dip(100, 20, 2.6));
        // Resolved at 120; a qualifying dip from 121 until the refractory ends
        for t in 121..220 {
            let step = c.step(t, 2.6, false);
            assert_eq!(step, ClassifierStep::Refractory, "at {}", t);
        }
        assert_eq!(c.step(220, 2.6, false), ClassifierStep::Rearmed);
        assert!(matches!(c.step(221, 2.6, false), ClassifierStep::PulseStarted { .. }));
    }

    #[test]
    fn test_spacing_rejects_second_valid_pulse() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        let mut verdicts = run(&mut c, 0, 300, dip(100, 20, 2.6));
        verdicts.extend(run(&mut c, 301, 600, dip(400, 20, 2.6)));
        assert_eq!(verdicts.len(), 2);
        assert!(verdicts[0].is_valid());
        assert_eq!(verdicts[1].rejections, vec![Rejection::TooCloseToPrevious]);
        // The rejected pulse does not move the spacing reference
        assert_eq!(c.last_valid_ms(), Some(120));
        let third = run(&mut c, 601, 800, dip(700, 20, 2.6));
        assert!(third[0].is_valid());
    }

    #[test]
    fn test_quiet_window_rejects_valid_shape() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        for t in 0..120 {
            c.step(t, dip(100, 20, 2.6)(t), false);
        }
        match c.step(120, 3.0, true) {
            ClassifierStep::Resolved(v) => assert_eq!(v.rejections, vec![Rejection::QuietWindow]),
            other => panic!("expected a resolved pulse, got {:?}", other),
        }
        assert_eq!(c.last_valid_ms(), None);
    }

    #[test]
    fn test_quiet_window_not_reported_for_bad_shape() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        for t in 0..102 {
            c.step(t, dip(100, 2, 2.6)(t), false);
        }
        match c.step(102, 3.0, true) {
            ClassifierStep::Resolved(v) => {
                assert_eq!(v.rejections, vec![Rejection::DurationOutOfRange])
            }
            other => panic!("expected a resolved pulse, got {:?}", other),
        }
    }

    #[test]
    fn test_burst_blackout_suppresses_detection() {
        let config = DetectorConfig {
            refractory_ms: 0,
            min_pulse_ms: 0,
            ..DetectorConfig::default()
        };
        let mut c = PulseClassifier::new(config);
        c.step(0, 3.0, false);

        // Alternate 2.6 V / 3.0 V every millisecond: each dip starts and ends a pulse,
        // the rearm takes one cycle, so candidates land every 3 ms.
        let mut burst_at = None;
        let mut t = 1;
        while burst_at.is_none() && t < 100 {
            let v = if t % 3 == 1 { 2.6 } else { 3.0 };
            if c.step(t, v, false) == ClassifierStep::BurstDetected {
                burst_at = Some(t);
            }
            t += 1;
        }
        let burst_at = burst_at.expect("burst should be detected");
        assert_eq!(burst_at, 13);

        for t in burst_at + 1..burst_at + 100 {
            assert_eq!(c.step(t, 2.6, false), ClassifierStep::Suppressed, "at {}", t);
        }
        assert!(matches!(
            c.step(burst_at + 100, 2.6, false),
            ClassifierStep::PulseStarted { .. }
        ));
    }

    #[test]
    fn test_baseline_frozen_during_pulse() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        c.step(0, 3.0, false);
        c.step(1, 2.5, false);
        let before = c.baseline();
        for t in 2..20 {
            c.step(t, 2.5, false);
        }
        assert_eq!(c.baseline(), before);
    }

    #[test]
    fn test_baseline_frozen_during_refractory() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        run(&mut c, 0, 120, dip(100, 20, 2.6));
        assert_eq!(c.state(), PulseState::Refractory { since_ms: 120 });
        let before = c.baseline();

        for t in 121..220 {
            assert_eq!(c.step(t, 2.0, false), ClassifierStep::Refractory);
        }
        assert_eq!(c.step(220, 2.0, false), ClassifierStep::Rearmed);
        assert_eq!(c.baseline(), before);
    }

    #[test]
    fn test_baseline_frozen_during_burst_blackout() {
        let config = DetectorConfig {
            refractory_ms: 0,
            min_pulse_ms: 0,
            ..DetectorConfig::default()
        };
        let mut c = PulseClassifier::new(config);
        c.step(0, 3.0, false);
        let mut t = 1;
        loop {
            let v = if t % 3 == 1 { 2.6 } else { 3.0 };
            if c.step(t, v, false) == ClassifierStep::BurstDetected {
                break;
            }
            t += 1;
            assert!(t < 100, "burst should be detected");
        }

        let before = c.baseline();
        for t in t + 1..t + 100 {
            assert_eq!(c.step(t, 1.0, false), ClassifierStep::Suppressed);
        }
        assert_eq!(c.baseline(), before);
    }

    #[test]
    fn test_pulse_and_refractory_across_wrap() {
        let mut c = PulseClassifier::new(DetectorConfig::default());
        let origin = u32::MAX - 199;
        let at = |i: Millis| origin.wrapping_add(i);
        let level = |i: Millis| {
            if (190..210).contains(&i) || (520..540).contains(&i) {
                2.6
            } else {
                3.0
            }
        };

        let mut verdicts = Vec::new();
        let mut rearmed_at = None;
        for i in 0..=600 {
            match c.step(at(i), level(i), false) {
                ClassifierStep::Resolved(v) => verdicts.push(v),
                ClassifierStep::Rearmed if rearmed_at.is_none() => rearmed_at = Some(i),
                _ => {}
            }
        }

        assert_eq!(verdicts.len(), 2);
        let first = &verdicts[0];
        assert!(first.is_valid(), "{:?}", first.rejections);
        assert_eq!(first.start_ms, u32::MAX - 9);
        assert_eq!(first.end_ms, 10);
        assert_eq!(first.duration_ms, 20);
        // Resolved at i = 210, rearmed refractory_ms later
        assert_eq!(rearmed_at, Some(310));
        // 330 ms after the first valid pulse, measured across the wrap
        assert_eq!(verdicts[1].rejections, vec![Rejection::TooCloseToPrevious]);
        assert_eq!(c.last_valid_ms(), Some(10));
    }

    #[test]
    fn test_rejection_display() {
        assert_eq!(Rejection::AmplitudeTooLow.to_string(), "amplitude too low");
        assert_eq!(
            Rejection::QuietWindow.to_string(),
            "inside communication quiet window"
        );
    }
}
