//! Thread-per-node scheduler
//!
//! Every node gets a named OS thread that calls `work()` in a loop. A node ends
//! when it reports `Shutdown` (its inputs are exhausted), when `should_stop()`
//! turns true, when the scheduler is stopped, or on a work error. Dropping the
//! node's ports on exit closes its links, so shutdown ripples downstream.

use super::errors::{ConnectionError, WorkError};
use super::node::ProcessNode;
use super::ports::{InputPort, OutputPort};
use super::watchdog::Watchdog;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// How a node thread ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeExit {
    /// Inputs ended, `should_stop()` or a scheduler stop
    Finished { produced: usize },
    /// `work()` returned an error other than `Shutdown`
    Failed { produced: usize, reason: String },
    Panicked,
}

/// Outcome of [`Scheduler::wait`]
#[derive(Debug, Default)]
pub struct RunSummary {
    pub exits: HashMap<String, NodeExit>,
}

impl RunSummary {
    pub fn failed(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .exits
            .iter()
            .filter(|(_, exit)| !matches!(exit, NodeExit::Finished { .. }))
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn is_clean(&self) -> bool {
        self.failed().is_empty()
    }
}

pub struct Scheduler {
    threads: Vec<(String, JoinHandle<NodeExit>)>,
    stop_signal: Arc<AtomicBool>,
    completion_tx: StdSender<String>,
    completion_rx: StdReceiver<String>,
    watchdog: Watchdog,
    watchdog_thread: JoinHandle<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_watchdog(Watchdog::new())
    }

    pub fn with_watchdog(watchdog: Watchdog) -> Self {
        let (completion_tx, completion_rx) = channel();
        let watchdog_thread = watchdog.start_monitoring_thread();
        info!(
            "Watchdog enabled - will report links blocked >{:.1}s",
            watchdog.threshold().as_secs_f64()
        );
        Self {
            threads: Vec::new(),
            stop_signal: Arc::new(AtomicBool::new(false)),
            completion_tx,
            completion_rx,
            watchdog,
            watchdog_thread,
        }
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Run `node` on its own thread until it finishes.
    pub fn start_process(
        &mut self,
        mut node: Box<dyn ProcessNode>,
        inputs: Vec<InputPort>,
        outputs: Vec<OutputPort>,
    ) -> Result<(), ConnectionError> {
        let stop_signal = Arc::clone(&self.stop_signal);
        let completion_tx = self.completion_tx.clone();
        let name = node.name().to_string();
        let thread_name = name.clone();

        debug!("Starting node: {}", name);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut produced = 0usize;
                let exit = loop {
                    if stop_signal.load(Ordering::Relaxed) || node.should_stop() {
                        break NodeExit::Finished { produced };
                    }

                    match node.work(&inputs, &outputs) {
                        Ok(n) => produced += n,
                        Err(WorkError::Shutdown) => {
                            debug!("[{}] Inputs ended", thread_name);
                            break NodeExit::Finished { produced };
                        }
                        Err(e) => {
                            error!("[{}] Work error: {}", thread_name, e);
                            break NodeExit::Failed {
                                produced,
                                reason: e.to_string(),
                            };
                        }
                    }
                };

                info!("[{}] Shutdown. Produced {} items.", thread_name, produced);

                // Closing the links lets downstream nodes see end-of-stream
                drop(outputs);
                drop(inputs);
                drop(node);

                let _ = completion_tx.send(thread_name);
                exit
            })
            .map_err(|source| ConnectionError::Spawn {
                node: name.clone(),
                source,
            })?;

        self.threads.push((name, handle));
        Ok(())
    }

    /// Ask every node to stop after its current `work()` call
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Handle that stops the scheduler from another thread
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    /// Join node threads as they finish and report how each one ended.
    pub fn wait(self) -> RunSummary {
        let Self {
            threads,
            completion_tx,
            completion_rx,
            watchdog,
            watchdog_thread,
            ..
        } = self;

        // Channel closes once every node thread has dropped its sender
        drop(completion_tx);

        let total = threads.len();
        let mut pending: HashMap<String, JoinHandle<NodeExit>> = threads.into_iter().collect();
        let mut summary = RunSummary::default();

        info!("Waiting for {} threads to complete...", total);

        while !pending.is_empty() {
            let Ok(name) = completion_rx.recv() else {
                break;
            };
            if let Some(handle) = pending.remove(&name) {
                let exit = handle.join().unwrap_or(NodeExit::Panicked);
                info!("[{}] Thread completed ({}/{})", name, summary.exits.len() + 1, total);
                summary.exits.insert(name, exit);
            }
        }

        // Threads that died without reporting (panic before the completion send)
        for (name, handle) in pending {
            let exit = handle.join().unwrap_or(NodeExit::Panicked);
            if exit == NodeExit::Panicked {
                error!("[{}] Thread panicked", name);
            }
            summary.exits.insert(name, exit);
        }

        info!("All {} threads completed", total);

        watchdog.stop();
        let _ = watchdog_thread.join();
        summary
    }

    /// Wait, but stop all nodes first if they are still running after `limit`.
    pub fn wait_or_stop_after(self, limit: Duration) -> RunSummary {
        let stop = self.stop_handle();
        let deadline = thread::spawn(move || {
            thread::sleep(limit);
            stop.store(true, Ordering::Relaxed);
        });
        let summary = self.wait();
        drop(deadline);
        summary
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn thread_names(&self) -> Vec<String> {
        self.threads.iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
