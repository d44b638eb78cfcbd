//! Thread-per-node runtime that wires sources, sensing nodes and the collector

pub mod clock;
pub mod errors;
pub mod node;
pub mod pipeline;
pub mod ports;
pub mod receiver;
pub mod sample;
pub mod scheduler;
pub mod sender;
pub mod type_registry;
pub mod watchdog;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use errors::{ConnectionError, WorkError, WorkResult};
pub use node::ProcessNode;
pub use pipeline::Pipeline;
pub use ports::{InputPort, OutputPort, PortDirection, PortSchema};
pub use receiver::{Receiver, ReceiverSelector};
pub use sample::{Millis, VoltageSample, elapsed_ms};
pub use scheduler::{NodeExit, RunSummary, Scheduler};
pub use sender::{ChannelMessage, Sender};
pub use type_registry::register_type;
pub use watchdog::Watchdog;
