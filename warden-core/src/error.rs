//! Error types for the Warden agent core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering the AI brain, incident store, response actions, alerting, and
//! configuration domains. The store retry loop keys off
//! [`StoreError::is_retryable`] so lock contention is retried while every
//! other failure propagates immediately.

use std::path::PathBuf;

/// Top-level error type for the Warden core library.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error("Brain error: {0}")]
    Brain(#[from] BrainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the AI assessment/decision backend.
///
/// Every variant is treated the same by callers: degrade to the rule-based
/// fallback. The variants exist so logs say what actually went wrong.
#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    #[error("AI backend connection failed: {message}")]
    Connection { message: String },

    #[error("AI request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("AI backend returned HTTP {status}")]
    Status { status: u16 },

    #[error("AI response did not match the expected schema: {message}")]
    MalformedResponse { message: String },
}

/// Errors from the incident store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database is locked: {message}")]
    Locked { message: String },

    #[error("Database is still locked after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Database query failed: {message}")]
    Query { message: String },

    #[error("Invalid record: {message}")]
    Validation { message: String },

    #[error("Incident {incident_id}: illegal status transition {from} -> {to}")]
    InvalidTransition {
        incident_id: String,
        from: String,
        to: String,
    },

    #[error("Incident not found: {incident_id}")]
    NotFound { incident_id: String },

    #[error("Store background task failed: {message}")]
    Background { message: String },
}

impl StoreError {
    /// Lock contention is the only transient class worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Locked { .. })
    }
}

/// Errors from response action execution.
///
/// These surface as the recorded `action_result` of an incident; their display
/// strings are what operators read in the timeline.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Action '{action}' is not implemented")]
    NotImplemented { action: String },

    #[error("Permission denied - requires elevated privileges")]
    PermissionDenied { pid: u32 },

    #[error("PID {pid} now belongs to '{found}', expected '{expected}'")]
    ProcessMismatch {
        pid: u32,
        expected: String,
        found: String,
    },

    #[error("Process survived SIGKILL")]
    Survived { pid: u32 },

    #[error("Failed to signal PID {pid}: {message}")]
    SignalFailed { pid: u32, message: String },
}

/// Errors from alert channel dispatch.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Channel '{channel}' send failed: {message}")]
    ChannelSend { channel: String, message: String },

    #[error("No channel accepted alert '{alert_id}'")]
    NoChannelAccepted { alert_id: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration load error: {message}")]
    Load { message: String },
}

/// A type alias for results using the top-level `WardenError`.
pub type Result<T> = std::result::Result<T, WardenError>;
