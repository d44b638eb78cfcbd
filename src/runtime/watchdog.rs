//! Link watchdog
//!
//! Every port records when a blocking send/recv started in an atomic. A monitor
//! thread scans those timestamps once a second and warns about links that have
//! been stuck longer than the configured threshold. A sensing node that stops
//! receiving samples, or a collector whose links went silent, shows up here.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default time a link operation may block before it is reported
pub const DEFAULT_BLOCK_THRESHOLD: Duration = Duration::from_secs(5);

struct PortState {
    /// Milliseconds since the watchdog origin when the current operation began, 0 if idle
    op_started: AtomicU64,
    warned: AtomicBool,
    origin: Instant,
    node_name: String,
    port_name: String,
    operation: &'static str,
}

impl PortState {
    #[inline(always)]
    fn stamp(&self) -> u64 {
        // +1 keeps a legitimately-started operation distinct from "idle"
        self.origin.elapsed().as_millis() as u64 + 1
    }
}

/// Handle held by a [`Sender`](super::Sender) or [`Receiver`](super::Receiver)
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<PortState>,
}

impl WatchdogHandle {
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.op_started.store(self.state.stamp(), Ordering::Relaxed);
        self.state.warned.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.warned.swap(false, Ordering::Relaxed) {
            info!(
                "UNBLOCKED: [{}] {} on port '{}'",
                self.state.node_name, self.state.operation, self.state.port_name
            );
        }
        self.state.op_started.store(0, Ordering::Relaxed);
    }
}

/// Shared watchdog registry
#[derive(Clone)]
pub struct Watchdog {
    origin: Instant,
    threshold: Duration,
    ports: Arc<Mutex<Vec<Weak<PortState>>>>,
    running: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_BLOCK_THRESHOLD)
    }

    pub fn with_threshold(threshold: Duration) -> Self {
        Self {
            origin: Instant::now(),
            threshold,
            ports: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Register a port; `operation` is "send" or "recv".
    pub fn register_port(
        &self,
        node_name: &str,
        operation: &'static str,
        port_name: &str,
    ) -> WatchdogHandle {
        let state = Arc::new(PortState {
            op_started: AtomicU64::new(0),
            warned: AtomicBool::new(false),
            origin: self.origin,
            node_name: node_name.to_string(),
            port_name: port_name.to_string(),
            operation,
        });

        if let Ok(mut ports) = self.ports.lock() {
            ports.push(Arc::downgrade(&state));
        }

        WatchdogHandle { state }
    }

    /// Warn once about every operation blocked past the threshold.
    /// Returns how many operations are currently over the threshold.
    pub fn check_for_blocked(&self) -> usize {
        let now = self.origin.elapsed().as_millis() as u64 + 1;
        let limit = self.threshold.as_millis() as u64;
        let mut blocked = 0;

        let Ok(mut ports) = self.ports.lock() else {
            return 0;
        };

        ports.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let started = state.op_started.load(Ordering::Relaxed);
            if started > 0 {
                let waited = now.saturating_sub(started);
                if waited > limit {
                    blocked += 1;
                    if !state.warned.swap(true, Ordering::Relaxed) {
                        warn!(
                            "BLOCKED: [{}] {} on port '{}' for {:.1}s",
                            state.node_name,
                            state.operation,
                            state.port_name,
                            waited as f64 / 1000.0
                        );
                    }
                }
            }
            true
        });

        blocked
    }

    /// Spawn the once-a-second monitor thread
    pub fn start_monitoring_thread(&self) -> JoinHandle<()> {
        let watchdog = self.clone();
        std::thread::spawn(move || {
            while watchdog.running.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_secs(1));
                watchdog.check_for_blocked();
            }
        })
    }

    /// Ask the monitor thread to exit after its current tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII marker around one blocking channel operation
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}
