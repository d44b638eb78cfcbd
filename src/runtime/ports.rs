//! Port schemas and the type-erased port endpoints handed to nodes
//!
//! The pipeline creates one crossbeam channel per connected input and hides it
//! behind [`InputPort`] / [`OutputPort`]. A node asks for the typed endpoint it
//! declared in its schema with `get::<T>()`.

use crossbeam_channel::Receiver as CrossbeamReceiver;
use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use super::receiver::Receiver;
use super::sender::{ChannelMessage, Sender};
use super::watchdog::{Watchdog, WatchdogHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Name, index and payload type of one port
#[derive(Debug, Clone)]
pub struct PortSchema {
    pub name: String,
    pub type_id: TypeId,
    pub index: usize,
    pub direction: PortDirection,
}

impl PortSchema {
    pub fn new<T: 'static>(name: impl Into<String>, index: usize, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            index,
            direction,
        }
    }

    pub fn input<T: 'static>(name: impl Into<String>, index: usize) -> Self {
        Self::new::<T>(name, index, PortDirection::Input)
    }

    pub fn output<T: 'static>(name: impl Into<String>, index: usize) -> Self {
        Self::new::<T>(name, index, PortDirection::Output)
    }
}

/// Input side of a link. Holds the channel plus the end-of-stream flag that
/// must persist between `work()` calls.
pub struct InputPort {
    channel: Box<dyn Any + Send>,
    eos: AtomicBool,
    watchdog_handle: Option<WatchdogHandle>,
}

impl InputPort {
    pub(crate) fn from_type_erased(channel: Box<dyn Any + Send>) -> Self {
        Self {
            channel,
            eos: AtomicBool::new(false),
            watchdog_handle: None,
        }
    }

    /// Wrap a raw receiver; used by tests that drive a node by hand.
    pub fn new<T: Send + 'static>(receiver: CrossbeamReceiver<ChannelMessage<T>>) -> Self {
        Self::from_type_erased(Box::new(receiver))
    }

    pub fn new_with_watchdog<T: Send + 'static>(
        receiver: CrossbeamReceiver<ChannelMessage<T>>,
        watchdog: &Watchdog,
        node_name: &str,
        port_name: &str,
    ) -> Self {
        Self::new(receiver).with_watchdog(watchdog, node_name, port_name)
    }

    pub(crate) fn with_watchdog(mut self, watchdog: &Watchdog, node_name: &str, port_name: &str) -> Self {
        self.watchdog_handle = Some(watchdog.register_port(node_name, "recv", port_name));
        self
    }

    /// Typed receiver over this port, or `None` if the port carries another type.
    pub fn get<'a, T: Send + 'static>(
        &'a self,
        buffer: &'a mut VecDeque<T>,
    ) -> Option<Receiver<'a, T>> {
        let receiver = self
            .channel
            .downcast_ref::<CrossbeamReceiver<ChannelMessage<T>>>()?;
        Some(Receiver::new(
            receiver,
            buffer,
            self.watchdog_handle.clone(),
            &self.eos,
        ))
    }

    /// True once the upstream node closed or dropped its end
    pub fn is_finished(&self) -> bool {
        self.eos.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InputPort(finished={})", self.is_finished())
    }
}

/// Output side of a link: a fan-out [`Sender`] to every connected input.
pub struct OutputPort {
    channel: Box<dyn Any + Send>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl OutputPort {
    pub(crate) fn from_type_erased(channel: Box<dyn Any + Send>) -> Self {
        Self {
            channel,
            watchdog_handle: None,
        }
    }

    pub fn new<T: Send + Clone + 'static>(sender: Sender<T>) -> Self {
        Self::from_type_erased(Box::new(sender))
    }

    pub fn new_with_watchdog<T: Send + Clone + 'static>(
        sender: Sender<T>,
        watchdog: &Watchdog,
        node_name: &str,
        port_name: &str,
    ) -> Self {
        Self::new(sender).with_watchdog(watchdog, node_name, port_name)
    }

    pub(crate) fn with_watchdog(mut self, watchdog: &Watchdog, node_name: &str, port_name: &str) -> Self {
        self.watchdog_handle = Some(watchdog.register_port(node_name, "send", port_name));
        self
    }

    /// Typed sender over this port, or `None` if the port carries another type.
    pub fn get<T: Send + Clone + 'static>(&self) -> Option<Sender<T>> {
        let sender = self.channel.downcast_ref::<Sender<T>>()?;
        Some(match &self.watchdog_handle {
            Some(handle) => sender.with_watchdog(handle.clone()),
            None => sender.clone(),
        })
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OutputPort")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::VoltageSample;
    use crossbeam_channel::bounded;

    #[test]
    fn test_input_port_typed_access() {
        let (tx, rx) = bounded(4);
        let port = InputPort::new::<VoltageSample>(rx);
        tx.send(ChannelMessage::Sample(VoltageSample::new(3.0, 1))).unwrap();

        let mut buf = VecDeque::new();
        let mut r = port.get::<VoltageSample>(&mut buf).unwrap();
        assert_eq!(r.recv().unwrap().time_ms, 1);

        let mut wrong = VecDeque::<String>::new();
        assert!(port.get::<String>(&mut wrong).is_none());
    }

    #[test]
    fn test_input_port_remembers_end_of_stream() {
        let (tx, rx) = bounded::<ChannelMessage<String>>(4);
        let port = InputPort::new(rx);
        drop(tx);

        let mut buf = VecDeque::new();
        assert!(port.get::<String>(&mut buf).unwrap().recv().is_err());
        assert!(port.is_finished());
    }

    #[test]
    fn test_output_port_typed_access() {
        let (tx, rx) = bounded(4);
        let watchdog = Watchdog::new();
        let port = OutputPort::new_with_watchdog(Sender::<String>::new(vec![tx]), &watchdog, "n", "link");

        assert!(port.get::<VoltageSample>().is_none());
        port.get::<String>().unwrap().send("Nodo_1;HELLO".into()).unwrap();
        assert!(matches!(rx.recv().unwrap(), ChannelMessage::Sample(s) if s == "Nodo_1;HELLO"));
    }
}
