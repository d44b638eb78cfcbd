//! Candidate rate limiter
//!
//! Electrical discharges show up as a rapid run of dips a few milliseconds
//! apart. When `count_limit` candidates arrive with no gap wider than
//! `window_ms`, the guard blocks new pulses for `block_ms`.

use crate::config::BurstConfig;
use crate::runtime::{Millis, elapsed_ms};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstDecision {
    /// Candidate may start a pulse
    Normal,
    /// This candidate completed a burst; the blackout starts now
    BlockNow,
    /// A blackout is already running
    AlreadyBlocked,
}

#[derive(Debug, Clone)]
pub struct BurstGuard {
    config: BurstConfig,
    last_candidate_ms: Option<Millis>,
    in_window: u8,
    blocked_since_ms: Option<Millis>,
}

impl BurstGuard {
    pub fn new(config: BurstConfig) -> Self {
        Self {
            config,
            last_candidate_ms: None,
            in_window: 0,
            blocked_since_ms: None,
        }
    }

    /// Register a candidate seen at `now`.
    pub fn observe_candidate(&mut self, now: Millis) -> BurstDecision {
        if self.blocked_since_ms.is_some() {
            return BurstDecision::AlreadyBlocked;
        }

        let chained = self
            .last_candidate_ms
            .is_some_and(|last| elapsed_ms(now, last) <= self.config.window_ms);
        self.in_window = if chained {
            self.in_window.saturating_add(1)
        } else {
            1
        };
        self.last_candidate_ms = Some(now);

        if self.in_window >= self.config.count_limit {
            self.in_window = 0;
            self.blocked_since_ms = Some(now);
            info!("Burst detected: blocking pulses for {} ms", self.config.block_ms);
            BurstDecision::BlockNow
        } else {
            BurstDecision::Normal
        }
    }

    /// Whether a blackout is running at `now`. An expired blackout is cleared here.
    pub fn is_blocked(&mut self, now: Millis) -> bool {
        match self.blocked_since_ms {
            Some(since) if elapsed_ms(now, since) >= self.config.block_ms => {
                self.blocked_since_ms = None;
                info!("Burst block ended");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Blackout state without clearing it
    pub fn blocked_since(&self) -> Option<Millis> {
        self.blocked_since_ms
    }

    pub fn candidates_in_window(&self) -> u8 {
        self.in_window
    }
}
