//! Network nodes
//!
//! - **Sources**: [`trace_source`] replays recorded traces, [`synthetic`] generates
//!   a seeded test signal
//! - **Sensing**: [`sensing_node`] hosts one [`detector::DetectionEngine`] per node
//! - **Collector**: [`collector`] aggregates the counts of every link into hourly activity
//! - **Sink**: [`status_writer`] writes activity records as status lines, JSON or CSV
//!
//! ```text
//! TraceSource ──samples──> SensingNode ──link──┐
//!                                              ├──> Collector ──activity──> StatusWriter
//! SyntheticSource ─samples─> SensingNode ─link─┘
//! ```

pub mod collector;
pub mod detector;
pub mod sensing_node;
pub mod status_writer;
pub mod synthetic;
pub mod trace_source;
