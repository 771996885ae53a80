//! # Warden Core
//!
//! Core library for the Warden endpoint response agent.
//! Provides threat evaluation and decision making, the AI analysis seam
//! with its rule-based fallback, alert admission and delivery,
//! configuration, and fundamental types.

pub mod alerting;
pub mod brain;
pub mod config;
pub mod decision;
pub mod error;
pub mod fallback;
pub mod nas;
pub mod policy;
pub mod providers;
pub mod types;

// Re-export commonly used types at the crate root.
pub use alerting::{Alert, AlertGate, AlertPriority, AlertSeverity, Notifier};
pub use brain::{HostProfile, IncidentSummary, MockBrain, ThreatBrain};
pub use config::{WardenConfig, load_config};
pub use decision::DecisionEngine;
pub use error::{Result, WardenError};
pub use nas::{HeuristicNasGuard, NasGuard, NasVerdict};
pub use policy::{Evaluation, PolicyEvaluator};
pub use providers::OllamaBrain;
pub use types::{
    ActionDecision, Confidence, Incident, IncidentStatus, MonitoringSession, ProcessSignal,
    RecommendedAction, ResponseAction, SystemContext, ThreatAssessment, ThreatType, TimelineEntry,
};
