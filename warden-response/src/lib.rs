//! # Warden Response
//!
//! The acting half of Warden: executes decided actions against live
//! processes, verifies their outcomes, keeps close watches through an
//! escalation sweep, and orchestrates the incident pipeline end to end.

pub mod actions;
pub mod engine;
pub mod monitor;
pub mod verify;

// Re-export commonly used types at the crate root.
pub use actions::{ActionExecutor, ActionOutcome};
pub use engine::ResponseEngine;
pub use monitor::{BatchSampler, MonitorRegistry, SignalSampler, SweepSummary};
pub use verify::{ProcessVerifier, Verifier};
