//! Core type definitions for the Warden agent.
//!
//! Defines the data structures flowing through the response pipeline:
//! process signals, threat assessments, action decisions, incidents and
//! their append-only timelines, and monitoring sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single observation of a running process, produced by an external
/// collector. Immutable; identified by `(pid, observation_time)`. PIDs
/// recycle, so a signal is never a stable process identity on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSignal {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub cmdline: String,
    #[serde(default)]
    pub parent_name: String,
    #[serde(default)]
    pub cpu_percent: f32,
    #[serde(default)]
    pub memory_mb: f32,
    #[serde(default)]
    pub connections_count: u32,
    #[serde(default)]
    pub num_threads: u32,
    #[serde(default)]
    pub username: String,
    /// Heuristic suspicion score supplied by the collector, 0-100.
    #[serde(default)]
    pub rule_score: u8,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl ProcessSignal {
    /// Create a minimal signal; remaining fields start zeroed/empty.
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            cmdline: String::new(),
            parent_name: String::new(),
            cpu_percent: 0.0,
            memory_mb: 0.0,
            connections_count: 0,
            num_threads: 0,
            username: String::new(),
            rule_score: 0,
            observed_at: Utc::now(),
        }
    }
}

/// Confidence attached to an assessment or decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(s: &str) -> Option<Confidence> {
        match s {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

/// Classification of a scored threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    Benign,
    Suspicious,
    Malware,
    Ransomware,
    Cryptominer,
    DataExfil,
    PrivilegeEscalation,
}

impl ThreatType {
    pub fn parse(s: &str) -> Option<ThreatType> {
        match s {
            "benign" => Some(ThreatType::Benign),
            "suspicious" => Some(ThreatType::Suspicious),
            "malware" => Some(ThreatType::Malware),
            "ransomware" => Some(ThreatType::Ransomware),
            "cryptominer" => Some(ThreatType::Cryptominer),
            "data_exfil" => Some(ThreatType::DataExfil),
            "privilege_escalation" => Some(ThreatType::PrivilegeEscalation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatType::Benign => write!(f, "benign"),
            ThreatType::Suspicious => write!(f, "suspicious"),
            ThreatType::Malware => write!(f, "malware"),
            ThreatType::Ransomware => write!(f, "ransomware"),
            ThreatType::Cryptominer => write!(f, "cryptominer"),
            ThreatType::DataExfil => write!(f, "data_exfil"),
            ThreatType::PrivilegeEscalation => write!(f, "privilege_escalation"),
        }
    }
}

/// The action an assessment suggests, before the decision engine has spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Monitor,
    Alert,
    Kill,
    Quarantine,
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendedAction::Monitor => write!(f, "monitor"),
            RecommendedAction::Alert => write!(f, "alert"),
            RecommendedAction::Kill => write!(f, "kill"),
            RecommendedAction::Quarantine => write!(f, "quarantine"),
        }
    }
}

/// A scored judgment about one signal's maliciousness.
///
/// Either AI-produced (`ai_analyzed = true`, `model_id` set) or the
/// deterministic rule-based fallback. Never persisted standalone; always
/// attached to an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub threat_score: u8,
    pub confidence: Confidence,
    pub threat_type: ThreatType,
    pub recommended_action: RecommendedAction,
    pub reasoning: String,
    pub ai_analyzed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl ThreatAssessment {
    /// Build an assessment, clamping the score into [0, 100].
    pub fn new(
        raw_score: i64,
        confidence: Confidence,
        threat_type: ThreatType,
        recommended_action: RecommendedAction,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            threat_score: raw_score.clamp(0, 100) as u8,
            confidence,
            threat_type,
            recommended_action,
            reasoning: reasoning.into(),
            ai_analyzed: false,
            model_id: None,
        }
    }

    /// Mark this assessment as AI-produced by the given model.
    pub fn from_model(mut self, model_id: impl Into<String>) -> Self {
        self.ai_analyzed = true;
        self.model_id = Some(model_id.into());
        self
    }

    /// Raise the score to at least `floor` (used by the NAS ransomware guard).
    pub fn raise_score_to(&mut self, floor: u8) {
        if self.threat_score < floor {
            self.threat_score = floor.min(100);
        }
    }
}

/// The response the engine can take against a threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    LogOnly,
    MonitorClosely,
    AlertUser,
    KillNow,
    BlockNetwork,
    Quarantine,
}

impl ResponseAction {
    /// Actions that end the pipeline for this incident and get verified.
    /// `monitor_closely` defers to the escalation sweep instead.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseAction::MonitorClosely)
    }

    pub fn parse(s: &str) -> Option<ResponseAction> {
        match s {
            "log_only" => Some(ResponseAction::LogOnly),
            "monitor_closely" => Some(ResponseAction::MonitorClosely),
            "alert_user" => Some(ResponseAction::AlertUser),
            "kill_now" => Some(ResponseAction::KillNow),
            "block_network" => Some(ResponseAction::BlockNetwork),
            "quarantine" => Some(ResponseAction::Quarantine),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseAction::LogOnly => write!(f, "log_only"),
            ResponseAction::MonitorClosely => write!(f, "monitor_closely"),
            ResponseAction::AlertUser => write!(f, "alert_user"),
            ResponseAction::KillNow => write!(f, "kill_now"),
            ResponseAction::BlockNetwork => write!(f, "block_network"),
            ResponseAction::Quarantine => write!(f, "quarantine"),
        }
    }
}

/// One chosen response for an assessed threat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecision {
    pub action: ResponseAction,
    pub confidence: Confidence,
    pub reason: String,
    pub user_message: String,
    pub escalate: bool,
}

impl ActionDecision {
    pub fn new(
        action: ResponseAction,
        confidence: Confidence,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            confidence,
            reason: reason.into(),
            user_message: String::new(),
            escalate: false,
        }
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    pub fn escalating(mut self) -> Self {
        self.escalate = true;
        self
    }
}

/// Host-wide facts handed to the AI decision contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemContext {
    pub health_score: u8,
    pub active_threats: u32,
    pub user_active: bool,
}

impl Default for SystemContext {
    fn default() -> Self {
        Self {
            health_score: 100,
            active_threats: 0,
            user_active: false,
        }
    }
}

/// Lifecycle state of an incident. Ordered: a stored incident only ever
/// advances to a later state, except that a responded close-watch may
/// re-enter monitoring when the escalation sweep promotes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Detected = 0,
    Analyzing = 1,
    Monitoring = 2,
    Responded = 3,
    Verified = 4,
    Closed = 5,
}

impl IncidentStatus {
    /// Forward-only transition check, with the single escalation exception.
    pub fn can_advance_to(self, next: IncidentStatus) -> bool {
        next > self
            || (self == IncidentStatus::Responded && next == IncidentStatus::Monitoring)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Detected => "detected",
            IncidentStatus::Analyzing => "analyzing",
            IncidentStatus::Monitoring => "monitoring",
            IncidentStatus::Responded => "responded",
            IncidentStatus::Verified => "verified",
            IncidentStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<IncidentStatus> {
        match s {
            "detected" => Some(IncidentStatus::Detected),
            "analyzing" => Some(IncidentStatus::Analyzing),
            "monitoring" => Some(IncidentStatus::Monitoring),
            "responded" => Some(IncidentStatus::Responded),
            "verified" => Some(IncidentStatus::Verified),
            "closed" => Some(IncidentStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in an incident's append-only timeline ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub details: String,
}

impl TimelineEntry {
    pub fn now(event: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            details: details.into(),
        }
    }
}

/// The central entity: one detected threat tracked from detection to closure.
///
/// Created once, mutated only through the store's defined transitions, never
/// deleted. The timeline records every transition in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub created_at: DateTime<Utc>,
    pub process_name: String,
    pub process_pid: u32,
    pub threat_score: u8,
    pub threat_type: ThreatType,
    pub status: IncidentStatus,
    pub ai_analyzed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<ResponseAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nas_activity: bool,
    pub timeline: Vec<TimelineEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_incident_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_timestamp: Option<DateTime<Utc>>,
}

impl Incident {
    /// Open a new incident for an assessed signal. The id is the first eight
    /// hex chars of a v4 UUID; the timeline starts with the detection entry.
    pub fn open(signal: &ProcessSignal, assessment: &ThreatAssessment) -> Self {
        let incident_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            incident_id,
            created_at: Utc::now(),
            process_name: signal.name.clone(),
            process_pid: signal.pid,
            threat_score: assessment.threat_score,
            threat_type: assessment.threat_type,
            status: IncidentStatus::Detected,
            ai_analyzed: assessment.ai_analyzed,
            ai_confidence: Some(assessment.confidence),
            ai_reasoning: Some(assessment.reasoning.clone()),
            ai_model: assessment.model_id.clone(),
            action_taken: None,
            action_result: None,
            action_timestamp: None,
            verified: None,
            verification_timestamp: None,
            nas_activity: false,
            timeline: vec![TimelineEntry::now(
                "detected",
                "Threat detected by monitoring system",
            )],
            post_incident_analysis: None,
            closed_timestamp: None,
        }
    }

    pub fn with_nas_activity(mut self, flagged: bool) -> Self {
        self.nas_activity = flagged;
        self
    }
}

/// An in-flight close-watch on one process, keyed by PID.
///
/// Lives only in memory. An agent restart drops these on the floor; the
/// matching incidents stay open in the store.
#[derive(Debug, Clone)]
pub struct MonitoringSession {
    pub pid: u32,
    pub name: String,
    pub incident_id: String,
    pub start_time: DateTime<Utc>,
    pub check_count: u32,
}

impl MonitoringSession {
    pub fn start(pid: u32, name: impl Into<String>, incident_id: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            incident_id: incident_id.into(),
            start_time: Utc::now(),
            check_count: 0,
        }
    }
}
