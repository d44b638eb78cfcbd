//! The node trait run by the scheduler

pub use super::errors::{WorkError, WorkResult};
pub use super::ports::{InputPort, OutputPort, PortSchema};

/// A processing stage in the network.
///
/// - sources have no inputs (trace replay, synthetic generator)
/// - sinks have no outputs (status writer)
/// - everything else transforms inputs into outputs (sensing node, collector)
///
/// The scheduler gives each node its own thread and calls [`work`](Self::work)
/// until it returns an error or [`should_stop`](Self::should_stop) turns true.
/// Returning `Err(WorkError::Shutdown)` is the normal way to finish once the
/// inputs have ended.
pub trait ProcessNode: Send {
    fn name(&self) -> &str;

    fn should_stop(&self) -> bool {
        false
    }

    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;

    fn input_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    fn output_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    /// Process one batch. Returns the number of items produced.
    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize>;
}
