//! Fan-out sender for node outputs

use crossbeam_channel::{SendError, Sender as CrossbeamSender, TrySendError};

use super::watchdog::{OperationGuard, WatchdogHandle};

/// What actually travels over a link.
///
/// Nodes never see this: [`Sender::send`] wraps values in `Sample` and the
/// receiving side unwraps them. `EndOfStream` is written by [`Sender::close`]
/// when a source runs out of data, so downstream nodes can finish even while
/// other clones of the channel are still alive.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    Sample(T),
    EndOfStream,
}

/// Sends every value to all connected inputs of an output port.
pub struct Sender<T> {
    destinations: Vec<CrossbeamSender<ChannelMessage<T>>>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl<T: Clone> Sender<T> {
    pub fn new(destinations: Vec<CrossbeamSender<ChannelMessage<T>>>) -> Self {
        Self {
            destinations,
            watchdog_handle: None,
        }
    }

    /// Copy of this sender whose blocking sends are tracked by `watchdog_handle`
    pub fn with_watchdog(&self, watchdog_handle: WatchdogHandle) -> Self {
        Self {
            destinations: self.destinations.clone(),
            watchdog_handle: Some(watchdog_handle),
        }
    }

    pub fn num_destinations(&self) -> usize {
        self.destinations.len()
    }

    /// Blocking send to every destination.
    ///
    /// A destination whose receiver is gone is skipped. The call only fails when
    /// no destination accepted the value. An unconnected output swallows values.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.destinations.is_empty() {
            return Ok(());
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);

        let mut delivered = false;
        let mut last_error = None;

        for dest in &self.destinations {
            match dest.send(ChannelMessage::Sample(value.clone())) {
                Ok(()) => delivered = true,
                Err(SendError(ChannelMessage::Sample(v))) => last_error = Some(SendError(v)),
                Err(SendError(ChannelMessage::EndOfStream)) => {}
            }
        }

        if !delivered && let Some(e) = last_error {
            return Err(e);
        }

        Ok(())
    }

    /// Non-blocking send. Fails on the first destination that is full or gone.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        for dest in &self.destinations {
            match dest.try_send(ChannelMessage::Sample(value.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(ChannelMessage::Sample(v))) => {
                    return Err(TrySendError::Full(v));
                }
                Err(TrySendError::Disconnected(ChannelMessage::Sample(v))) => {
                    return Err(TrySendError::Disconnected(v));
                }
                Err(_) => {}
            }
        }
        Ok(())
    }

    /// Tell every destination that no more values will follow.
    pub fn close(&self) {
        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        for dest in &self.destinations {
            let _ = dest.send(ChannelMessage::EndOfStream);
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.destinations.is_empty()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            destinations: self.destinations.clone(),
            watchdog_handle: self.watchdog_handle.clone(),
        }
    }
}
