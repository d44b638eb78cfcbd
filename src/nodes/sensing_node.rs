//! Sensing node: voltage samples in, protocol lines out
//!
//! Runs one [`DetectionEngine`] over its sample stream. Time comes from the
//! samples themselves, so a replayed trace behaves exactly like the live signal
//! it was recorded from.

use crate::config::NetworkConfig;
use crate::nodes::detector::{CycleOutcome, DetectionEngine};
use crate::protocol::{NodeId, NodeMessage};
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkResult};
use crate::runtime::ports::PortSchema;
use crate::runtime::{Millis, Sender, VoltageSample, WorkError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const MAX_SAMPLES_PER_CALL: usize = 1000;

/// Counters readable while the node runs on its own thread
#[derive(Debug, Default)]
pub struct SensingStats {
    samples: AtomicU64,
    pulses: AtomicU64,
    accepted: AtomicU64,
    reports: AtomicU64,
}

impl SensingStats {
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Pulses resolved, valid or not
    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    fn observe(&self, outcome: &CycleOutcome) {
        self.samples.fetch_add(1, Ordering::Relaxed);
        if outcome.verdict().is_some() {
            self.pulses.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.accepted() {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.report.is_some() {
            self.reports.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Inputs: `samples` ([`VoltageSample`])
/// Outputs: `link` (`String`, CRLF-terminated protocol lines)
pub struct SensingNode {
    name: String,
    engine: DetectionEngine,
    startup_delay_ms: Millis,
    handshake_sent: bool,
    buffer: VecDeque<VoltageSample>,
    stats: Arc<SensingStats>,
}

impl SensingNode {
    pub fn new(node: NodeId, config: &NetworkConfig) -> Self {
        Self {
            name: node.status_key(),
            startup_delay_ms: config.reporter.startup_delay_ms,
            engine: DetectionEngine::new(node, config.detector.clone(), config.reporter.clone()),
            handshake_sent: false,
            buffer: VecDeque::new(),
            stats: Arc::new(SensingStats::default()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn stats(&self) -> Arc<SensingStats> {
        Arc::clone(&self.stats)
    }
}

impl ProcessNode for SensingNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input::<VoltageSample>("samples", 0)]
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output::<String>("link", 0)]
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let link = outputs
            .first()
            .and_then(|port| port.get::<String>())
            .ok_or_else(|| WorkError::NodeError("Missing link output".to_string()))?;

        let mut samples = inputs
            .first()
            .and_then(|port| port.get::<VoltageSample>(&mut self.buffer))
            .ok_or_else(|| WorkError::NodeError("Missing samples input".to_string()))?;

        let mut sent = 0;
        for _ in 0..MAX_SAMPLES_PER_CALL {
            let sample = match samples.recv() {
                Ok(sample) => sample,
                Err(e) => {
                    debug!(
                        "[{}] Samples ended: {} valid events, {} unreported",
                        self.name,
                        self.engine.total(),
                        self.engine.period_count()
                    );
                    return Err(e);
                }
            };

            // Still booting: the handshake goes out once the start-up delay has passed
            if !self.handshake_sent {
                if sample.time_ms < self.startup_delay_ms {
                    continue;
                }
                let hello = self.engine.handshake();
                transmit(&link, &hello)?;
                self.handshake_sent = true;
                info!("[{}] Handshake sent -> {}", self.name, hello);
                sent += 1;
            }

            let outcome = self.engine.advance(sample.time_ms, sample.volts);
            self.stats.observe(&outcome);
            if let Some(report) = &outcome.report {
                transmit(&link, report)?;
                sent += 1;
            }
        }

        Ok(sent)
    }
}

fn transmit(link: &Sender<String>, msg: &NodeMessage) -> WorkResult<()> {
    link.send(msg.to_wire())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ChannelMessage;
    use crossbeam_channel::{Receiver as CrossbeamReceiver, bounded, unbounded};

    fn collect_lines(rx: &CrossbeamReceiver<ChannelMessage<String>>) -> Vec<String> {
        rx.try_iter()
            .filter_map(|msg| match msg {
                ChannelMessage::Sample(line) => Some(line),
                ChannelMessage::EndOfStream => None,
            })
            .collect()
    }

    /// Drive the node by hand over a generated trace until its input ends.
    fn run_node(node: &mut SensingNode, trace: Vec<VoltageSample>) -> Vec<String> {
        let (sample_tx, sample_rx) = unbounded();
        let (link_tx, link_rx) = unbounded();
        for s in trace {
            sample_tx.send(ChannelMessage::Sample(s)).unwrap();
        }
        drop(sample_tx);

        let inputs = vec![InputPort::new(sample_rx)];
        let outputs = vec![OutputPort::new(Sender::new(vec![link_tx]))];
        loop {
            match node.work(&inputs, &outputs) {
                Ok(_) => {}
                Err(WorkError::Shutdown) => break,
                Err(e) => panic!("unexpected work error: {}", e),
            }
        }
        collect_lines(&link_rx)
    }

    fn trace(until: Millis, dips: &[Millis]) -> Vec<VoltageSample> {
        (0..=until)
            .map(|t| {
                let low = dips.iter().any(|&start| t >= start && t < start + 20);
                VoltageSample::new(if low { 2.6 } else { 3.0 }, t)
            })
            .collect()
    }

    #[test]
    fn test_handshake_then_report() {
        let config = NetworkConfig::default();
        let mut node = SensingNode::new(NodeId::new("Nodo_1"), &config);
        let stats = node.stats();

        let lines = run_node(&mut node, trace(60_500, &[1_000, 5_000, 9_000]));
        assert_eq!(lines, vec!["Nodo_1;HELLO\r\n", "Nodo_1;C=3\r\n"]);
        assert_eq!(stats.accepted(), 3);
        assert_eq!(stats.pulses(), 3);
        assert_eq!(stats.reports(), 1);
        // Samples before the start-up delay are not classified
        assert_eq!(stats.samples(), 60_001);
    }

    #[test]
    fn test_dips_during_boot_are_ignored() {
        let config = NetworkConfig::default();
        let mut node = SensingNode::new(NodeId::new("Nodo_2"), &config);
        let stats = node.stats();
        let lines = run_node(&mut node, trace(2_000, &[100]));
        assert_eq!(lines, vec!["Nodo_2;HELLO\r\n"]);
        assert_eq!(stats.pulses(), 0);
    }

    #[test]
    fn test_late_trace_waits_a_full_period_before_reporting() {
        let config = NetworkConfig::default();
        let mut node = SensingNode::new(NodeId::new("Nodo_1"), &config);
        let start: Millis = 1_000_000;
        let dip = start + 5_000..start + 5_020;
        let samples = (start..=start + 60_000)
            .map(|t| VoltageSample::new(if dip.contains(&t) { 2.6 } else { 3.0 }, t))
            .collect();

        let lines = run_node(&mut node, samples);
        assert_eq!(lines, vec!["Nodo_1;HELLO\r\n", "Nodo_1;C=1\r\n"]);
    }

    #[test]
    fn test_schema_and_default_name() {
        let node = SensingNode::new(NodeId::new("Nodo_1"), &NetworkConfig::default());
        assert_eq!(node.name(), "nodo1");
        assert_eq!(node.input_schema()[0].name, "samples");
        assert_eq!(node.output_schema()[0].name, "link");
        assert_eq!(node.with_name("roof").name(), "roof");
    }

    #[test]
    fn test_missing_output_is_an_error() {
        let mut node = SensingNode::new(NodeId::new("Nodo_1"), &NetworkConfig::default());
        let (_tx, rx) = bounded::<ChannelMessage<VoltageSample>>(1);
        let inputs = vec![InputPort::new(rx)];
        let outputs = vec![OutputPort::from_type_erased(Box::new(()))];
        assert!(matches!(
            node.work(&inputs, &outputs),
            Err(WorkError::NodeError(_))
        ));
    }
}
