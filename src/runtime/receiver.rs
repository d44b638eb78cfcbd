//! Link receivers with put-back buffers
//!
//! - [`Receiver`] wraps one `crossbeam_channel::Receiver<ChannelMessage<T>>`,
//!   unwraps samples and remembers end-of-stream so later calls return
//!   `Shutdown` straight away.
//!
//! - [`ReceiverSelector`] waits on several receivers at once. A link that ends
//!   is marked and dropped from the wait set; the selector only reports
//!   `Shutdown` once every link has ended.

use crossbeam_channel::{Receiver as CrossbeamReceiver, RecvTimeoutError, TryRecvError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::errors::{WorkError, WorkResult};
use super::sender::ChannelMessage;
use super::watchdog::{OperationGuard, WatchdogHandle};

/// One input link and its put-back buffer.
///
/// The buffer and the end-of-stream flag live in the owning node / port so they
/// survive from one `work()` call to the next.
pub struct Receiver<'a, T> {
    receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
    buffer: &'a mut VecDeque<T>,
    watchdog_handle: Option<WatchdogHandle>,
    eos: &'a AtomicBool,
}

impl<'a, T> Receiver<'a, T> {
    pub fn new(
        receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
        buffer: &'a mut VecDeque<T>,
        watchdog_handle: Option<WatchdogHandle>,
        eos: &'a AtomicBool,
    ) -> Self {
        Self {
            receiver,
            buffer,
            watchdog_handle,
            eos,
        }
    }

    /// True once the link delivered end-of-stream or disconnected
    pub fn is_finished(&self) -> bool {
        self.eos.load(Ordering::Relaxed)
    }

    fn finish(&self) {
        self.eos.store(true, Ordering::Relaxed);
    }

    /// Blocking receive, buffer first.
    pub fn recv(&mut self) -> WorkResult<T> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }
        if self.is_finished() {
            return Err(WorkError::Shutdown);
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        match self.receiver.recv() {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) | Err(_) => {
                self.finish();
                tracing::debug!("Receiver::recv() - link finished");
                Err(WorkError::Shutdown)
            }
        }
    }

    /// Look at the next item without consuming it, blocking if necessary.
    pub fn peek(&mut self) -> WorkResult<&T> {
        if self.buffer.is_empty() {
            let item = self.recv()?;
            self.buffer.push_back(item);
        }
        self.buffer.front().ok_or(WorkError::Shutdown)
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }
        if self.is_finished() {
            return Err(TryRecvError::Disconnected);
        }
        match self.receiver.try_recv() {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) | Err(TryRecvError::Disconnected) => {
                self.finish();
                Err(TryRecvError::Disconnected)
            }
            Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
        }
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }
        if self.is_finished() {
            return Err(RecvTimeoutError::Disconnected);
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        match self.receiver.recv_timeout(timeout) {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                self.finish();
                Err(RecvTimeoutError::Disconnected)
            }
            Err(RecvTimeoutError::Timeout) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Return an item so the next receive yields it again.
    pub fn put_back(&mut self, item: T) {
        self.buffer.push_front(item);
    }

    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Wait on several [`Receiver`]s at once.
pub struct ReceiverSelector<'b, 'a, T> {
    channels: &'b mut [Receiver<'a, T>],
}

impl<'b, 'a, T> ReceiverSelector<'b, 'a, T> {
    pub fn new(channels: &'b mut [Receiver<'a, T>]) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of links that have not ended yet
    pub fn live(&self) -> usize {
        self.channels.iter().filter(|ch| !ch.is_finished()).count()
    }

    fn pop_buffered(&mut self) -> Option<(usize, T)> {
        self.channels
            .iter_mut()
            .enumerate()
            .find_map(|(i, ch)| ch.buffer.pop_front().map(|item| (i, item)))
    }

    /// Block until any link yields an item. `Shutdown` once all links ended.
    pub fn select(&mut self) -> WorkResult<(usize, T)> {
        loop {
            match self.select_deadline(None)? {
                Some(hit) => return Ok(hit),
                None => continue,
            }
        }
    }

    /// Like [`select`](Self::select) but gives up after `timeout`, returning
    /// `Ok(None)`.
    pub fn select_timeout(&mut self, timeout: Duration) -> WorkResult<Option<(usize, T)>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.select_deadline(Some(deadline))? {
                Some(hit) => return Ok(Some(hit)),
                None if Instant::now() >= deadline => return Ok(None),
                None => continue,
            }
        }
    }

    /// One wait round. `Ok(None)` means a timeout or a link that just ended.
    fn select_deadline(&mut self, deadline: Option<Instant>) -> WorkResult<Option<(usize, T)>> {
        if let Some(hit) = self.pop_buffered() {
            return Ok(Some(hit));
        }

        let mut sel = crossbeam_channel::Select::new();
        let mut index_map = Vec::new();
        for (i, ch) in self.channels.iter().enumerate() {
            if !ch.is_finished() {
                sel.recv(ch.receiver);
                index_map.push(i);
            }
        }

        if index_map.is_empty() {
            return Err(WorkError::Shutdown);
        }

        let oper = match deadline {
            Some(deadline) => match sel.select_deadline(deadline) {
                Ok(oper) => oper,
                Err(_) => return Ok(None),
            },
            None => sel.select(),
        };

        let ch_idx = index_map[oper.index()];
        let channel = &self.channels[ch_idx];
        match oper.recv(channel.receiver) {
            Ok(ChannelMessage::Sample(item)) => Ok(Some((ch_idx, item))),
            Ok(ChannelMessage::EndOfStream) | Err(_) => {
                channel.finish();
                tracing::debug!("ReceiverSelector - link {} finished", ch_idx);
                Ok(None)
            }
        }
    }
}
