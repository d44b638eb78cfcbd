//! Pulse detection and classification
//!
//! - [`BaselineTracker`]: slowly adapting resting level
//! - [`BurstGuard`]: blackout after a rapid run of candidates
//! - [`PulseClassifier`]: Idle/Active/Refractory state machine and validity rules
//! - [`EventCounter`], [`PeriodicReporter`]: counting and the report schedule
//! - [`DetectionEngine`]: all of the above for one node, one `advance()` per sample

pub mod baseline;
pub mod burst;
pub mod classifier;
pub mod counter;
pub mod engine;
pub mod reporter;

pub use baseline::BaselineTracker;
pub use burst::{BurstDecision, BurstGuard};
pub use classifier::{
    ActivePulse, ClassifierStep, PulseClassifier, PulseEnd, PulseState, PulseVerdict, Rejection,
};
pub use counter::EventCounter;
pub use engine::{CycleOutcome, DetectionEngine};
pub use reporter::PeriodicReporter;
