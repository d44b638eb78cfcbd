//! Replay of a recorded voltage trace
//!
//! Trace files are CSV with one `time_ms,volts` pair per line:
//!
//! ```text
//! # node 1, bench capture
//! time_ms,volts
//! 0,3.012
//! 1,3.009
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. A first data line that
//! does not parse as numbers is taken as a header.

use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkResult};
use crate::runtime::ports::PortSchema;
use crate::runtime::{ManualClock, Millis, VoltageSample, WorkError};
use crate::{PulseNetError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

const BATCH_SIZE: usize = 1000;

/// Parse a whole trace. Timestamps must not go backwards.
pub fn parse_trace(reader: impl Read) -> Result<Vec<VoltageSample>> {
    let mut samples = Vec::new();
    let mut seen_data = false;
    let mut last_time: Option<Millis> = None;

    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let sample = match parse_row(trimmed) {
            Ok(sample) => sample,
            Err(_) if !seen_data => {
                seen_data = true;
                debug!("Trace header: {}", trimmed);
                continue;
            }
            Err(reason) => {
                return Err(PulseNetError::TraceParse {
                    line: line_no,
                    reason,
                });
            }
        };
        seen_data = true;

        if let Some(prev) = last_time
            && sample.time_ms < prev
        {
            return Err(PulseNetError::TraceParse {
                line: line_no,
                reason: format!("time {} ms is before previous {} ms", sample.time_ms, prev),
            });
        }
        last_time = Some(sample.time_ms);
        samples.push(sample);
    }

    Ok(samples)
}

fn parse_row(row: &str) -> std::result::Result<VoltageSample, String> {
    let (time, volts) = row
        .split_once(',')
        .ok_or_else(|| format!("expected 'time_ms,volts', got {:?}", row))?;
    let time_ms = time
        .trim()
        .parse::<Millis>()
        .map_err(|e| format!("invalid time {:?}: {}", time.trim(), e))?;
    let volts = volts
        .trim()
        .parse::<f32>()
        .map_err(|e| format!("invalid voltage {:?}: {}", volts.trim(), e))?;
    if !volts.is_finite() {
        return Err(format!("voltage {} is not finite", volts));
    }
    Ok(VoltageSample::new(volts, time_ms))
}

/// Outputs: `samples` ([`VoltageSample`])
///
/// The trace is read completely when the node is created, so a bad file fails
/// before the network starts.
pub struct TraceSource {
    name: String,
    samples: Vec<VoltageSample>,
    position: usize,
    clock: Option<ManualClock>,
}

impl TraceSource {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let samples = parse_trace(File::open(path)?)?;
        info!(
            "Loaded trace {}: {} samples",
            path.display(),
            samples.len()
        );
        Ok(Self::from_samples(samples))
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(Self::from_samples(parse_trace(reader)?))
    }

    pub fn from_samples(samples: Vec<VoltageSample>) -> Self {
        Self {
            name: "trace".to_string(),
            samples,
            position: 0,
            clock: None,
        }
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

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time of the last sample, if any
    pub fn duration_ms(&self) -> Option<Millis> {
        self.samples.last().map(|s| s.time_ms)
    }
}

impl ProcessNode for TraceSource {
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

        if self.position >= self.samples.len() {
            debug!("[{}] End of trace after {} samples", self.name, self.position);
            return Err(WorkError::Shutdown);
        }

        let end = (self.position + BATCH_SIZE).min(self.samples.len());
        for sample in &self.samples[self.position..end] {
            output.send(*sample)?;
            if let Some(clock) = &self.clock {
                clock.advance_to(sample.time_ms);
            }
        }
        let sent = end - self.position;
        self.position = end;
        Ok(sent)
    }
}
