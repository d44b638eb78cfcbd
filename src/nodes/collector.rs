//! Collector: protocol lines from every link in, hourly activity out
//!
//! [`Aggregator`] holds the per-node accumulators and the publish schedule and can
//! be driven directly. [`Collector`] wraps it as a runtime node with one framed
//! input per link.

use crate::config::CollectorConfig;
use crate::protocol::{LineFramer, NodeId, NodeMessage};
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkResult};
use crate::runtime::ports::PortSchema;
use crate::runtime::{Clock, Millis, MonotonicClock, ReceiverSelector, WorkError, elapsed_ms};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Activity of one roster node over a publish window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeActivity {
    pub node: NodeId,
    pub counts: u64,
    /// Estimated activity concentration in Bq/m3
    pub activity_bq_m3: f64,
}

/// One published window, roster order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    /// Window sequence number, starting at 1
    pub window: u64,
    /// Collector time the window closed
    pub window_end_ms: Millis,
    pub activities: Vec<NodeActivity>,
}

impl ActivityRecord {
    /// `{"radon_activity_nodo1":1.234,...}` with three decimals per value.
    /// Keys are JSON-escaped; a non-finite activity is written as `null`.
    pub fn status_json(&self) -> String {
        let mut json = String::from("{");
        for (i, activity) in self.activities.iter().enumerate() {
            if i > 0 {
                json.push(',');
            }
            let key = format!("radon_activity_{}", activity.node.status_key());
            let key = serde_json::Value::String(key);
            let _ = if activity.activity_bq_m3.is_finite() {
                write!(json, "{}:{:.3}", key, activity.activity_bq_m3)
            } else {
                write!(json, "{}:null", key)
            };
        }
        json.push('}');
        json
    }

    /// Status line as read by the dashboard: `RADON_JSON {...}`
    pub fn to_status_line(&self) -> String {
        format!("RADON_JSON {}", self.status_json())
    }

    pub fn activity_of(&self, node: &NodeId) -> Option<&NodeActivity> {
        self.activities.iter().find(|a| &a.node == node)
    }
}

/// What happened to one received line
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    Handshake(NodeId),
    Counted { node: NodeId, count: u32 },
    UnknownNode(NodeId),
    Malformed,
}

/// Roster accumulators and publish/heartbeat schedule.
///
/// Counts are only accepted from nodes whose identifier exactly matches a roster
/// entry. Publishing resets every accumulator.
#[derive(Debug, Clone)]
pub struct Aggregator {
    config: CollectorConfig,
    roster: Vec<NodeId>,
    counts: Vec<u64>,
    messages: u64,
    windows: u64,
    last_publish_ms: Millis,
    last_heartbeat_ms: Millis,
}

impl Aggregator {
    pub fn new(config: CollectorConfig, start_ms: Millis) -> Self {
        let roster: Vec<NodeId> = config.roster.iter().map(NodeId::new).collect();
        Self {
            counts: vec![0; roster.len()],
            roster,
            config,
            messages: 0,
            windows: 0,
            last_publish_ms: start_ms,
            last_heartbeat_ms: start_ms,
        }
    }

    pub fn roster(&self) -> &[NodeId] {
        &self.roster
    }

    /// Lines received so far, valid or not
    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Accumulated count for `node` in the open window
    pub fn pending(&self, node: &NodeId) -> Option<u64> {
        self.slot(node).map(|i| self.counts[i])
    }

    fn slot(&self, node: &NodeId) -> Option<usize> {
        self.roster.iter().position(|n| n == node)
    }

    /// Handle one trimmed, non-empty line from a link.
    pub fn ingest_line(&mut self, line: &str) -> Ingest {
        self.messages += 1;
        debug!("Message #{}: {}", self.messages, line);

        match NodeMessage::parse_line(line) {
            Ok(NodeMessage::Hello { node }) => {
                info!("Handshake: {} connected", node);
                Ingest::Handshake(node)
            }
            Ok(NodeMessage::Count { node, count }) => match self.slot(&node) {
                Some(i) => {
                    self.counts[i] += u64::from(count);
                    info!(
                        "{}: +{} counts ({} this window)",
                        node, count, self.counts[i]
                    );
                    Ingest::Counted { node, count }
                }
                None => {
                    warn!("Ignoring counts from unknown node '{}'", node);
                    Ingest::UnknownNode(node)
                }
            },
            Err(e) => {
                warn!("Discarding line {:?}: {}", line, e);
                Ingest::Malformed
            }
        }
    }

    /// Activity in Bq/m3 for `counts` collected over one window
    pub fn activity_bq_m3(&self, counts: u64) -> f64 {
        activity_bq_m3(&self.config, counts)
    }

    /// Publish if a window has elapsed at `now`; logs the heartbeat when due.
    pub fn poll(&mut self, now: Millis) -> Option<ActivityRecord> {
        if elapsed_ms(now, self.last_heartbeat_ms) >= self.config.heartbeat_ms {
            self.last_heartbeat_ms = now;
            info!("Collector alive, waiting for data ({} messages)", self.messages);
        }

        if elapsed_ms(now, self.last_publish_ms) < self.config.publish_period_ms {
            return None;
        }
        Some(self.publish(now))
    }

    /// Close the open window at `now` regardless of the schedule.
    pub fn publish(&mut self, now: Millis) -> ActivityRecord {
        self.last_publish_ms = now;
        self.windows += 1;

        let config = &self.config;
        let activities = self
            .roster
            .iter()
            .zip(self.counts.iter_mut())
            .map(|(node, counts)| {
                let counts = std::mem::take(counts);
                NodeActivity {
                    node: node.clone(),
                    counts,
                    activity_bq_m3: activity_bq_m3(config, counts),
                }
            })
            .collect();

        let record = ActivityRecord {
            window: self.windows,
            window_end_ms: now,
            activities,
        };
        info!("Window {} complete", record.window);
        for a in &record.activities {
            info!("  {}: {} counts, {:.3} Bq/m3", a.node, a.counts, a.activity_bq_m3);
        }
        record
    }

    /// True if any roster node has counts in the open window
    pub fn has_pending(&self) -> bool {
        self.counts.iter().any(|&c| c > 0)
    }
}

fn activity_bq_m3(config: &CollectorConfig, counts: u64) -> f64 {
    counts as f64 * 1000.0 / (config.window_seconds * config.sensitivity_cps_per_bq_l)
}

const MAX_CHUNKS_PER_CALL: usize = 100;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Inputs: `link0`..`linkN` (`String` byte chunks from each sensing node)
/// Outputs: `activity` ([`ActivityRecord`])
///
/// Time comes from a [`Clock`]; simulated runs share a
/// [`ManualClock`](crate::runtime::ManualClock) with their sources. When every
/// link has ended, a window holding counts is published before shutting down.
pub struct Collector {
    name: String,
    aggregator: Aggregator,
    framers: Vec<LineFramer>,
    buffers: Vec<VecDeque<String>>,
    clock: Box<dyn Clock>,
    poll_interval: Duration,
}

impl Collector {
    pub fn new(config: CollectorConfig, num_links: usize) -> Self {
        Self::with_clock(config, num_links, MonotonicClock::new())
    }

    pub fn with_clock(config: CollectorConfig, num_links: usize, clock: impl Clock + 'static) -> Self {
        let framers = (0..num_links)
            .map(|_| LineFramer::new(config.max_line_len))
            .collect();
        let start = clock.now_ms();
        Self {
            name: "collector".to_string(),
            aggregator: Aggregator::new(config, start),
            framers,
            buffers: (0..num_links).map(|_| VecDeque::new()).collect(),
            clock: Box::new(clock),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// How long to wait for link traffic before checking the schedule again
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }
}

impl ProcessNode for Collector {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        self.framers.len()
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        (0..self.framers.len())
            .map(|i| PortSchema::input::<String>(format!("link{}", i), i))
            .collect()
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::output::<ActivityRecord>("activity", 0)]
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let output = outputs
            .first()
            .and_then(|port| port.get::<ActivityRecord>())
            .ok_or_else(|| WorkError::NodeError("Missing activity output".to_string()))?;

        if inputs.len() != self.framers.len() {
            return Err(WorkError::NodeError(format!(
                "Expected {} links, got {}",
                self.framers.len(),
                inputs.len()
            )));
        }

        let mut links = self
            .buffers
            .iter_mut()
            .zip(inputs)
            .enumerate()
            .map(|(i, (buffer, port))| {
                port.get::<String>(buffer)
                    .ok_or_else(|| WorkError::NodeError(format!("Missing link{} input", i)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut selector = ReceiverSelector::new(&mut links);

        let mut published = 0;
        for _ in 0..MAX_CHUNKS_PER_CALL {
            let idle = match selector.select_timeout(self.poll_interval) {
                Ok(Some((idx, chunk))) => {
                    for line in self.framers[idx].push(chunk.as_bytes()) {
                        self.aggregator.ingest_line(&line);
                    }
                    false
                }
                Ok(None) => true,
                Err(WorkError::Shutdown) => {
                    if self.aggregator.has_pending() {
                        debug!("[{}] Links ended, publishing open window", self.name);
                        output.send(self.aggregator.publish(self.clock.now_ms()))?;
                    }
                    return Err(WorkError::Shutdown);
                }
                Err(e) => return Err(e),
            };

            if let Some(record) = self.aggregator.poll(self.clock.now_ms()) {
                output.send(record)?;
                published += 1;
            }
            if idle {
                break;
            }
        }

        Ok(published)
    }
}
