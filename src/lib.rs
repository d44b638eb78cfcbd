//! Pulse detection and counting network
//!
//! Sensing nodes watch an analog signal for short voltage dips, classify each
//! dip against amplitude, duration and timing rules, count the valid ones and
//! report the counts over a text line protocol. A collector turns the hourly
//! counts from every node into an activity estimate.
//!
//! # Architecture
//!
//! - **Sources**: [`TraceSource`] replays recorded `time_ms,volts` traces,
//!   [`SyntheticSource`] generates a seeded noisy signal with random dips
//! - **Sensing nodes**: [`SensingNode`] runs one [`DetectionEngine`] per node and
//!   writes protocol lines to its link
//! - **Collector**: [`Collector`] frames and parses the lines from every link and
//!   publishes an [`ActivityRecord`] each window
//! - **Runtime**: thread-per-node [`Pipeline`] with typed crossbeam links
//!
//! # Example
//!
//! ```no_run
//! use pulsenet::{Collector, NetworkConfig, NodeId, Pipeline, SensingNode, TraceSource};
//!
//! let config = NetworkConfig::default();
//! let mut pipeline = Pipeline::new();
//! pipeline.add_process("trace", TraceSource::from_path("node1.csv")?)?;
//! pipeline.add_process("nodo1", SensingNode::new(NodeId::new("Nodo_1"), &config))?;
//! pipeline.add_process("collector", Collector::new(config.collector.clone(), 1))?;
//! pipeline.connect("trace", "samples", "nodo1", "samples")?;
//! pipeline.connect("nodo1", "link", "collector", "link0")?;
//! pipeline.build()?.wait();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod config;
pub mod nodes;
pub mod protocol;
pub mod runtime;

pub use config::{BurstConfig, CollectorConfig, DetectorConfig, NetworkConfig, ReporterConfig};

pub use protocol::{LineFramer, NodeId, NodeMessage, ProtocolError};

pub use nodes::collector::{ActivityRecord, Aggregator, Collector, NodeActivity};
pub use nodes::detector::{
    CycleOutcome, DetectionEngine, PulseState, PulseVerdict, Rejection,
};
pub use nodes::sensing_node::SensingNode;
pub use nodes::status_writer::{StatusFormat, StatusWriter};
pub use nodes::synthetic::{SyntheticConfig, SyntheticSource};
pub use nodes::trace_source::TraceSource;

pub use runtime::{
    Clock, ConnectionError, InputPort, ManualClock, Millis, MonotonicClock, NodeExit, OutputPort,
    Pipeline, PortDirection, PortSchema, ProcessNode, RunSummary, Scheduler, VoltageSample,
    WorkError, WorkResult, register_type,
};

#[derive(Error, Debug)]
pub enum PulseNetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Trace parse error at line {line}: {reason}")]
    TraceParse { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, PulseNetError>;
