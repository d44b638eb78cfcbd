//! Reporting clock and communication quiet window

use super::counter::EventCounter;
use crate::config::ReporterConfig;
use crate::protocol::{NodeId, NodeMessage};
use crate::runtime::{Millis, elapsed_ms};

/// Emits `C=<count>` once per report period.
///
/// The clock restarts at the moment of each report, so a late cycle delays every
/// following report too. The first period runs from [`start`](Self::start); a
/// reporter that was never started starts at the first time it is asked about.
#[derive(Debug, Clone)]
pub struct PeriodicReporter {
    node: NodeId,
    config: ReporterConfig,
    last_report_ms: Option<Millis>,
}

impl PeriodicReporter {
    pub fn new(node: NodeId, config: ReporterConfig) -> Self {
        Self {
            node,
            config,
            last_report_ms: None,
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Start the first period at `now`. Later calls have no effect.
    pub fn start(&mut self, now: Millis) {
        if self.last_report_ms.is_none() {
            self.last_report_ms = Some(now);
        }
    }

    /// Start of the current period, `None` before the first cycle
    pub fn last_report_ms(&self) -> Option<Millis> {
        self.last_report_ms
    }

    /// True within `quiet_post_ms` after the last report or `quiet_pre_ms`
    /// before the next one is due.
    pub fn in_quiet_window(&self, now: Millis) -> bool {
        let since = elapsed_ms(now, self.last_report_ms.unwrap_or(now));
        let period = self.config.report_period_ms;
        since <= self.config.quiet_post_ms
            || (since < period && period - since <= self.config.quiet_pre_ms)
    }

    /// Emit the period's count if a report is due at `now`.
    pub fn poll(&mut self, now: Millis, counter: &mut EventCounter) -> Option<NodeMessage> {
        let last = *self.last_report_ms.get_or_insert(now);
        if elapsed_ms(now, last) < self.config.report_period_ms {
            return None;
        }
        self.last_report_ms = Some(now);
        Some(NodeMessage::Count {
            node: self.node.clone(),
            count: counter.take_period(),
        })
    }

    pub fn handshake(&self) -> NodeMessage {
        NodeMessage::Hello {
            node: self.node.clone(),
        }
    }
}
