//! Status sink for published activity records

use crate::nodes::collector::ActivityRecord;
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkResult};
use crate::runtime::ports::PortSchema;
use crate::runtime::WorkError;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFormat {
    /// `RADON_JSON {"radon_activity_nodo1":x,...}`
    #[default]
    StatusLine,
    /// Full record as one JSON object per line
    JsonLines,
    /// `window,<node>_counts,<node>_bq_m3,...` with a header row
    Csv,
}

impl std::str::FromStr for StatusFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "status" | "status-line" => Ok(StatusFormat::StatusLine),
            "json" | "jsonl" | "json-lines" => Ok(StatusFormat::JsonLines),
            "csv" => Ok(StatusFormat::Csv),
            other => Err(format!("unknown status format '{}'", other)),
        }
    }
}

/// Inputs: `activity` ([`ActivityRecord`])
///
/// Writes one line per record and flushes after each, so a reader tailing the
/// output sees every window as soon as it is published.
pub struct StatusWriter {
    name: String,
    format: StatusFormat,
    out: Box<dyn Write + Send>,
    header_written: bool,
    buffer: VecDeque<ActivityRecord>,
}

impl StatusWriter {
    pub fn new(out: impl Write + Send + 'static, format: StatusFormat) -> Self {
        Self {
            name: "status".to_string(),
            format,
            out: Box::new(out),
            header_written: false,
            buffer: VecDeque::new(),
        }
    }

    pub fn stdout(format: StatusFormat) -> Self {
        Self::new(io::stdout(), format)
    }

    pub fn create(path: impl AsRef<Path>, format: StatusFormat) -> crate::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), format))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn write_record(&mut self, record: &ActivityRecord) -> io::Result<()> {
        match self.format {
            StatusFormat::StatusLine => writeln!(self.out, "{}", record.to_status_line())?,
            StatusFormat::JsonLines => {
                serde_json::to_writer(&mut self.out, record)?;
                writeln!(self.out)?;
            }
            StatusFormat::Csv => {
                if !self.header_written {
                    writeln!(self.out, "{}", csv_header(record))?;
                    self.header_written = true;
                }
                writeln!(self.out, "{}", csv_row(record))?;
            }
        }
        self.out.flush()
    }
}

fn csv_header(record: &ActivityRecord) -> String {
    let mut header = String::from("window");
    for a in &record.activities {
        let key = a.node.status_key();
        header.push_str(&format!(",{}_counts,{}_bq_m3", key, key));
    }
    header
}

fn csv_row(record: &ActivityRecord) -> String {
    let mut row = record.window.to_string();
    for a in &record.activities {
        row.push_str(&format!(",{},{:.3}", a.counts, a.activity_bq_m3));
    }
    row
}

impl ProcessNode for StatusWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::input::<ActivityRecord>("activity", 0)]
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let mut records = inputs
            .first()
            .and_then(|port| port.get::<ActivityRecord>(&mut self.buffer))
            .ok_or_else(|| WorkError::NodeError("Missing activity input".to_string()))?;

        let record = match records.recv() {
            Ok(record) => record,
            Err(e) => {
                let _ = self.out.flush();
                return Err(e);
            }
        };

        debug!("[{}] Writing window {}", self.name, record.window);
        self.write_record(&record)
            .map_err(|e| WorkError::NodeError(format!("Failed to write status: {}", e)))?;
        Ok(1)
    }
}
