//! Per-node detection engine
//!
//! Owns everything a sensing node keeps between samples. [`DetectionEngine::advance`]
//! is one cycle of the node loop: quiet-window check, classification, indicator,
//! then the report check. It never blocks.

use super::classifier::{ClassifierStep, PulseClassifier, PulseState, PulseVerdict};
use super::counter::EventCounter;
use super::reporter::PeriodicReporter;
use crate::config::{DetectorConfig, ReporterConfig};
use crate::protocol::{NodeId, NodeMessage};
use crate::runtime::{Millis, elapsed_ms};
use tracing::{debug, info, trace};

/// Everything that happened in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub step: ClassifierStep,
    pub in_quiet_window: bool,
    /// Indicator lit after this cycle
    pub indicator: bool,
    /// Report line due this cycle
    pub report: Option<NodeMessage>,
}

impl CycleOutcome {
    pub fn verdict(&self) -> Option<&PulseVerdict> {
        match &self.step {
            ClassifierStep::Resolved(verdict) => Some(verdict),
            _ => None,
        }
    }

    pub fn accepted(&self) -> bool {
        self.verdict().is_some_and(PulseVerdict::is_valid)
    }
}

#[derive(Debug, Clone)]
pub struct DetectionEngine {
    node: NodeId,
    classifier: PulseClassifier,
    counter: EventCounter,
    reporter: PeriodicReporter,
    indicator_ms: Millis,
    indicator_since: Option<Millis>,
}

impl DetectionEngine {
    pub fn new(node: NodeId, detector: DetectorConfig, reporter: ReporterConfig) -> Self {
        Self {
            indicator_ms: detector.indicator_ms,
            indicator_since: None,
            classifier: PulseClassifier::new(detector),
            counter: EventCounter::new(),
            reporter: PeriodicReporter::new(node.clone(), reporter),
            node,
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn state(&self) -> PulseState {
        self.classifier.state()
    }

    pub fn baseline(&self) -> Option<f32> {
        self.classifier.baseline()
    }

    pub fn total(&self) -> u64 {
        self.counter.total()
    }

    pub fn period_count(&self) -> u32 {
        self.counter.period()
    }

    pub fn handshake(&self) -> NodeMessage {
        self.reporter.handshake()
    }

    /// Run one cycle for the sample `volts` read at `now`.
    /// The first cycle starts the reporting clock.
    pub fn advance(&mut self, now: Millis, volts: f32) -> CycleOutcome {
        self.reporter.start(now);
        let in_quiet_window = self.reporter.in_quiet_window(now);
        let step = self.classifier.step(now, volts, in_quiet_window);

        match &step {
            ClassifierStep::PulseStarted { drop_v } => {
                trace!("[{}] Pulse start at {} ms, drop={:.3} V", self.node, now, drop_v);
            }
            ClassifierStep::BurstDetected => {
                info!("[{}] Burst detected at {} ms", self.node, now);
            }
            ClassifierStep::Resolved(verdict) => self.record(verdict),
            _ => {}
        }

        if let Some(since) = self.indicator_since
            && elapsed_ms(now, since) >= self.indicator_ms
        {
            self.indicator_since = None;
        }

        let report = self.reporter.poll(now, &mut self.counter);
        if let Some(msg) = &report {
            info!("[{}] Report -> {}", self.node, msg);
        }

        CycleOutcome {
            step,
            in_quiet_window,
            indicator: self.indicator_since.is_some(),
            report,
        }
    }

    fn record(&mut self, verdict: &PulseVerdict) {
        debug!(
            "[{}] Pulse detected: amp={:.3} V, dur={} ms",
            self.node, verdict.amplitude_v, verdict.duration_ms
        );
        for rejection in &verdict.rejections {
            debug!("[{}]  -> Rejected: {}", self.node, rejection);
        }
        if verdict.is_valid() {
            self.counter.record();
            self.indicator_since = Some(verdict.end_ms);
            info!("[{}] Valid pulse. Total = {}", self.node, self.counter.total());
        }
    }
}
