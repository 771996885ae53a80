//! Alerting: alert identity, the admission gate, and notifier channels.
//!
//! Every candidate notification flows through [`gate::AlertGate`], which is
//! the only component allowed to talk to notifiers. Identity is content-based:
//! two alerts with the same title, severity, and source collapse to the same
//! `alert_id` no matter when they were raised.

pub mod gate;
pub mod notify;

pub use gate::{Admission, AlertGate, GateStats, SuppressStage};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Urgency of delivery. Critical alerts punch through quiet hours, and the
/// verification-failure path may bypass rate limits entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertPriority::Low => write!(f, "low"),
            AlertPriority::Medium => write!(f, "medium"),
            AlertPriority::High => write!(f, "high"),
            AlertPriority::Critical => write!(f, "critical"),
        }
    }
}

/// Message severity, ordered: `info < warning < high < critical`.
/// Channels filter on this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info = 0,
    Warning = 1,
    High = 2,
    Critical = 3,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Per-channel admission filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelFilter {
    /// Only deliver critical-priority alerts.
    #[serde(default)]
    pub critical_only: bool,
    /// Drop anything below this severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<AlertSeverity>,
}

impl ChannelFilter {
    /// Whether this filter lets the alert through.
    pub fn accepts(&self, alert: &Alert) -> bool {
        if self.critical_only && alert.priority != AlertPriority::Critical {
            return false;
        }
        if let Some(min) = self.min_severity
            && alert.severity < min
        {
            return false;
        }
        true
    }
}

/// A candidate notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub priority: AlertPriority,
    pub severity: AlertSeverity,
    pub source: String,
    #[serde(default)]
    pub details: serde_json::Value,
    /// Content hash of `(title, severity, source)`; dedup identity.
    pub alert_id: String,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        priority: AlertPriority,
        severity: AlertSeverity,
        source: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let source = source.into();
        let alert_id = Self::content_id(&title, severity, &source);
        Self {
            title,
            message: message.into(),
            priority,
            severity,
            source,
            details: serde_json::Value::Null,
            alert_id,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// First 16 hex chars of SHA-256 over `"{title}:{severity}:{source}"`.
    fn content_id(title: &str, severity: AlertSeverity, source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(b":");
        hasher.update(severity.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(source.as_bytes());
        let digest = hasher.finalize();
        let mut id = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            id.push_str(&format!("{byte:02x}"));
        }
        id
    }
}
