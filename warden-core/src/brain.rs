//! AI threat-engine abstraction.
//!
//! Defines the `ThreatBrain` trait that the policy evaluator and decision
//! engine call through, so the AI backend is an injected dependency rather
//! than hidden shared state. The production implementation lives in
//! `providers::ollama`; `MockBrain` scripts responses for tests.

use crate::error::BrainError;
use crate::types::{ActionDecision, ProcessSignal, SystemContext, ThreatAssessment};
use async_trait::async_trait;

/// Static facts about the host, sent with every assessment request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HostProfile {
    pub os: String,
    /// Protected-asset IP the backend should treat as high-value, if any.
    pub protected_ip: String,
}

impl HostProfile {
    pub fn current(protected_ip: impl Into<String>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            protected_ip: protected_ip.into(),
        }
    }
}

/// Fields the alert-composition contract gets to work with.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IncidentSummary {
    pub process_name: String,
    pub pid: u32,
    pub threat_score: u8,
    pub threat_type: String,
    pub action: String,
    pub reasoning: String,
}

/// The AI backend seam: threat assessment, action decisions, and alert
/// composition. Implementations must be cheap to share behind an `Arc`.
///
/// Every error is recoverable by design: callers fall back to the
/// deterministic rule-based path on any `BrainError`.
#[async_trait]
pub trait ThreatBrain: Send + Sync {
    /// Score one signal. A conforming response carries `ai_analyzed = true`
    /// and the producing model id.
    async fn assess(
        &self,
        signal: &ProcessSignal,
        host: &HostProfile,
    ) -> Result<ThreatAssessment, BrainError>;

    /// Choose a response action given the merged signal and assessment.
    async fn decide(
        &self,
        signal: &ProcessSignal,
        assessment: &ThreatAssessment,
        ctx: &SystemContext,
    ) -> Result<ActionDecision, BrainError>;

    /// Compose a human-readable alert body for a handled incident.
    async fn compose_alert(&self, summary: &IncidentSummary) -> Result<String, BrainError>;

    /// Identifier of the backing model (recorded on incidents).
    fn model_id(&self) -> &str;
}

/// A scripted brain for tests and development.
///
/// Queued responses are consumed in order; an empty queue yields
/// `BrainError::Connection`, which exercises the fallback path.
pub struct MockBrain {
    model: String,
    assessments: std::sync::Mutex<Vec<Result<ThreatAssessment, BrainError>>>,
    decisions: std::sync::Mutex<Vec<Result<ActionDecision, BrainError>>>,
    compositions: std::sync::Mutex<Vec<Result<String, BrainError>>>,
    assess_calls: std::sync::atomic::AtomicU32,
    decide_calls: std::sync::atomic::AtomicU32,
}

impl MockBrain {
    pub fn new() -> Self {
        Self {
            model: "mock-brain".to_string(),
            assessments: std::sync::Mutex::new(Vec::new()),
            decisions: std::sync::Mutex::new(Vec::new()),
            compositions: std::sync::Mutex::new(Vec::new()),
            assess_calls: std::sync::atomic::AtomicU32::new(0),
            decide_calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// A brain whose every call fails, as if the backend were down.
    pub fn unreachable() -> Self {
        Self::new()
    }

    pub fn queue_assessment(&self, assessment: ThreatAssessment) {
        self.assessments
            .lock()
            .unwrap()
            .push(Ok(assessment.from_model("mock-brain")));
    }

    pub fn queue_assessment_error(&self, err: BrainError) {
        self.assessments.lock().unwrap().push(Err(err));
    }

    pub fn queue_decision(&self, decision: ActionDecision) {
        self.decisions.lock().unwrap().push(Ok(decision));
    }

    pub fn queue_decision_error(&self, err: BrainError) {
        self.decisions.lock().unwrap().push(Err(err));
    }

    pub fn queue_composition(&self, body: impl Into<String>) {
        self.compositions.lock().unwrap().push(Ok(body.into()));
    }

    pub fn assess_calls(&self) -> u32 {
        self.assess_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn decide_calls(&self) -> u32 {
        self.decide_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn down() -> BrainError {
        BrainError::Connection {
            message: "mock brain has no queued response".into(),
        }
    }
}

impl Default for MockBrain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThreatBrain for MockBrain {
    async fn assess(
        &self,
        _signal: &ProcessSignal,
        _host: &HostProfile,
    ) -> Result<ThreatAssessment, BrainError> {
        self.assess_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut queue = self.assessments.lock().unwrap();
        if queue.is_empty() {
            Err(Self::down())
        } else {
            queue.remove(0)
        }
    }

    async fn decide(
        &self,
        _signal: &ProcessSignal,
        _assessment: &ThreatAssessment,
        _ctx: &SystemContext,
    ) -> Result<ActionDecision, BrainError> {
        self.decide_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut queue = self.decisions.lock().unwrap();
        if queue.is_empty() {
            Err(Self::down())
        } else {
            queue.remove(0)
        }
    }

    async fn compose_alert(&self, _summary: &IncidentSummary) -> Result<String, BrainError> {
        let mut queue = self.compositions.lock().unwrap();
        if queue.is_empty() {
            Err(Self::down())
        } else {
            queue.remove(0)
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confidence, RecommendedAction, ResponseAction, ThreatType};

    fn make_signal() -> ProcessSignal {
        ProcessSignal::new(4242, "susproc")
    }

    #[tokio::test]
    async fn test_mock_brain_empty_queue_reports_down() {
        let brain = MockBrain::unreachable();
        let host = HostProfile::current("");
        let err = brain.assess(&make_signal(), &host).await.unwrap_err();
        assert!(matches!(err, BrainError::Connection { .. }));
        assert_eq!(brain.assess_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_brain_queued_assessment_marks_model() {
        let brain = MockBrain::new();
        brain.queue_assessment(ThreatAssessment::new(
            72,
            Confidence::High,
            ThreatType::Malware,
            RecommendedAction::Alert,
            "scripted",
        ));

        let host = HostProfile::current("192.168.1.50");
        let assessment = brain.assess(&make_signal(), &host).await.unwrap();
        assert!(assessment.ai_analyzed);
        assert_eq!(assessment.model_id.as_deref(), Some("mock-brain"));
        assert_eq!(assessment.threat_score, 72);
    }

    #[tokio::test]
    async fn test_mock_brain_decisions_consumed_in_order() {
        let brain = MockBrain::new();
        brain.queue_decision(ActionDecision::new(
            ResponseAction::AlertUser,
            Confidence::Medium,
            "first",
        ));
        brain.queue_decision(ActionDecision::new(
            ResponseAction::KillNow,
            Confidence::High,
            "second",
        ));

        let signal = make_signal();
        let assessment = ThreatAssessment::new(
            90,
            Confidence::High,
            ThreatType::Ransomware,
            RecommendedAction::Kill,
            "scripted",
        );
        let ctx = SystemContext::default();

        let d1 = brain.decide(&signal, &assessment, &ctx).await.unwrap();
        let d2 = brain.decide(&signal, &assessment, &ctx).await.unwrap();
        assert_eq!(d1.reason, "first");
        assert_eq!(d2.reason, "second");
        assert_eq!(brain.decide_calls(), 2);
    }
}
