//! Seeded synthetic detector signal
//!
//! A resting level with Gaussian noise, rectangular dips at exponentially
//! distributed intervals, and an optional share of over-deep discharge dips.
//! The same seed always yields the same samples.

use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkResult};
use crate::runtime::ports::PortSchema;
use crate::runtime::{ManualClock, Millis, VoltageSample, WorkError};
use crate::{PulseNetError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub seed: u64,
    /// Time of the last sample
    pub duration_ms: Millis,
    pub sample_period_ms: Millis,
    pub baseline_v: f32,
    /// Standard deviation of the additive noise (V)
    pub noise_std_v: f32,
    /// Mean of the exponential part of the gap between dips
    pub mean_interval_ms: f64,
    /// Fixed part of the gap between the end of one dip and the start of the next
    pub min_gap_ms: Millis,
    pub dip_depth_v: f32,
    pub dip_ms: Millis,
    /// Share of dips that are discharges instead of events, in [0, 1]
    pub discharge_fraction: f64,
    pub discharge_depth_v: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            duration_ms: 3_600_000,
            sample_period_ms: 1,
            baseline_v: 3.0,
            noise_std_v: 0.005,
            mean_interval_ms: 4_000.0,
            min_gap_ms: 600,
            dip_depth_v: 0.4,
            dip_ms: 20,
            discharge_fraction: 0.0,
            discharge_depth_v: 2.6,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_period_ms == 0 {
            return Err(PulseNetError::Config(
                "sample_period_ms must be positive".to_string(),
            ));
        }
        if !(self.noise_std_v >= 0.0) {
            return Err(PulseNetError::Config(
                "noise_std_v must not be negative".to_string(),
            ));
        }
        if !(self.mean_interval_ms > 0.0) {
            return Err(PulseNetError::Config(
                "mean_interval_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.discharge_fraction) {
            return Err(PulseNetError::Config(
                "discharge_fraction must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Dip {
    start_ms: Millis,
    depth_v: f32,
}

/// Outputs: `samples` ([`VoltageSample`])
pub struct SyntheticSource {
    name: String,
    config: SyntheticConfig,
    rng: StdRng,
    noise: Normal<f32>,
    interval: Exp<f64>,
    next_time: Option<Millis>,
    dip: Option<Dip>,
    events: u64,
    discharges: u64,
    clock: Option<ManualClock>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        config.validate()?;
        let noise = Normal::new(0.0, config.noise_std_v)
            .map_err(|e| PulseNetError::Config(format!("noise_std_v: {}", e)))?;
        let interval = Exp::new(1.0 / config.mean_interval_ms)
            .map_err(|e| PulseNetError::Config(format!("mean_interval_ms: {}", e)))?;

        let mut source = Self {
            name: "synthetic".to_string(),
            rng: StdRng::seed_from_u64(config.seed),
            noise,
            interval,
            next_time: Some(0),
            dip: None,
            events: 0,
            discharges: 0,
            clock: None,
            config,
        };
        source.schedule_dip(0);
        Ok(source)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Advance `clock` to each sample's time as it is emitted
    pub fn with_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Event dips generated so far (completed within the run)
    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn discharges(&self) -> u64 {
        self.discharges
    }

    /// Plan the next dip after `after_ms`. Dips that would not finish before
    /// the end of the run are not generated.
    fn schedule_dip(&mut self, after_ms: Millis) {
        let gap = self.config.min_gap_ms as f64 + self.interval.sample(&mut self.rng);
        let start = after_ms as f64 + gap;
        let end = start + self.config.dip_ms as f64;
        if end > self.config.duration_ms as f64 {
            self.dip = None;
            return;
        }

        let discharge = self.rng.r#gen::<f64>() < self.config.discharge_fraction;
        let depth_v = if discharge {
            self.discharges += 1;
            self.config.discharge_depth_v
        } else {
            self.events += 1;
            self.config.dip_depth_v
        };
        let dip = Dip {
            start_ms: start as Millis,
            depth_v,
        };
        trace!("[{}] Dip at {} ms, depth {:.3} V", self.name, dip.start_ms, depth_v);
        self.dip = Some(dip);
    }

    fn sample_at(&mut self, t: Millis) -> VoltageSample {
        let mut volts = self.config.baseline_v + self.noise.sample(&mut self.rng);
        if let Some(dip) = self.dip
            && t >= dip.start_ms
        {
            let end = dip.start_ms + self.config.dip_ms;
            if t < end {
                volts -= dip.depth_v;
            } else {
                self.schedule_dip(end);
            }
        }
        VoltageSample::new(volts, t)
    }

    /// Next sample, or `None` once the run is over
    pub fn next_sample(&mut self) -> Option<VoltageSample> {
        let t = self.next_time?;
        self.next_time = t
            .checked_add(self.config.sample_period_ms)
            .filter(|next| *next <= self.config.duration_ms);
        Some(self.sample_at(t))
    }
}

impl ProcessNode for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output::<VoltageSample>("samples", 0)]
    }

    fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let output = outputs
            .first()
            .and_then(|port| port.get::<VoltageSample>())
            .ok_or_else(|| WorkError::NodeError("Missing samples output".to_string()))?;

        let mut sent = 0;
        while sent < BATCH_SIZE {
            let Some(sample) = self.next_sample() else {
                debug!(
                    "[{}] Run complete: {} events, {} discharges",
                    self.name, self.events, self.discharges
                );
                return if sent > 0 { Ok(sent) } else { Err(WorkError::Shutdown) };
            };
            output.send(sample)?;
            if let Some(clock) = &self.clock {
                clock.advance_to(sample.time_ms);
            }
            sent += 1;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorConfig, ReporterConfig};
    use crate::nodes::detector::DetectionEngine;
    use crate::protocol::NodeId;
    use crate::runtime::{ChannelMessage, Sender};

    fn quiet_config(duration_ms: Millis) -> SyntheticConfig {
        SyntheticConfig {
            duration_ms,
            noise_std_v: 0.0,
            mean_interval_ms: 1_000.0,
            ..SyntheticConfig::default()
        }
    }

    fn drain(source: &mut SyntheticSource) -> Vec<VoltageSample> {
        std::iter::from_fn(|| source.next_sample()).collect()
    }

    #[test]
    fn test_same_seed_same_signal() {
        let config = SyntheticConfig {
            duration_ms: 20_000,
            ..SyntheticConfig::default()
        };
        let a = drain(&mut SyntheticSource::new(config.clone()).unwrap());
        let b = drain(&mut SyntheticSource::new(config.clone()).unwrap());
        assert_eq!(a, b);
        assert_eq!(a.len(), 20_001);

        let c = drain(&mut SyntheticSource::new(SyntheticConfig { seed: 2, ..config }).unwrap());
        assert_ne!(a, c);
    }

    #[test]
    fn test_every_event_dip_is_detected() {
        let mut source = SyntheticSource::new(quiet_config(30_000)).unwrap();
        let samples = drain(&mut source);
        assert!(source.events() > 5);

        let mut engine = DetectionEngine::new(
            NodeId::new("Nodo_1"),
            DetectorConfig::default(),
            ReporterConfig::default(),
        );
        for s in &samples {
            engine.advance(s.time_ms, s.volts);
        }
        assert_eq!(engine.total(), source.events());
    }

    #[test]
    fn test_discharges_are_rejected() {
        let mut source = SyntheticSource::new(SyntheticConfig {
            discharge_fraction: 1.0,
            ..quiet_config(30_000)
        })
        .unwrap();
        let samples = drain(&mut source);
        assert_eq!(source.events(), 0);
        assert!(source.discharges() > 5);

        let mut engine = DetectionEngine::new(
            NodeId::new("Nodo_1"),
            DetectorConfig::default(),
            ReporterConfig::default(),
        );
        for s in &samples {
            engine.advance(s.time_ms, s.volts);
        }
        assert_eq!(engine.total(), 0);
    }

    #[test]
    fn test_invalid_config() {
        let err = SyntheticSource::new(SyntheticConfig {
            mean_interval_ms: 0.0,
            ..SyntheticConfig::default()
        });
        assert!(matches!(err, Err(PulseNetError::Config(_))));
        let err = SyntheticSource::new(SyntheticConfig {
            noise_std_v: -1.0,
            ..SyntheticConfig::default()
        });
        assert!(matches!(err, Err(PulseNetError::Config(_))));
        let err = SyntheticSource::new(SyntheticConfig {
            noise_std_v: f32::NAN,
            ..SyntheticConfig::default()
        });
        assert!(matches!(err, Err(PulseNetError::Config(_))));
    }

    #[test]
    fn test_node_stops_at_duration() {
        let clock = ManualClock::new(0);
        let mut source = SyntheticSource::new(quiet_config(1_500))
            .unwrap()
            .with_clock(clock.clone());
        let (tx, rx) = crossbeam_channel::unbounded::<ChannelMessage<VoltageSample>>();
        let outputs = vec![OutputPort::new(Sender::<VoltageSample>::new(vec![tx]))];

        assert_eq!(source.work(&[], &outputs).unwrap(), 1_000);
        assert_eq!(source.work(&[], &outputs).unwrap(), 501);
        assert!(matches!(source.work(&[], &outputs), Err(WorkError::Shutdown)));
        assert_eq!(crate::runtime::Clock::now_ms(&clock), 1_500);
        assert_eq!(rx.try_iter().count(), 1_501);
    }
}
