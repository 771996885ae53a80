//! Policy evaluator: whitelist, AI assessment, rule fallback.
//!
//! The first stage of the pipeline. Pure evaluation: no store writes, no
//! sessions, no alerts; just a judgment and a yes/no on whether the response
//! engine should engage.

use crate::brain::{HostProfile, ThreatBrain};
use crate::config::WardenConfig;
use crate::fallback;
use crate::types::{ProcessSignal, ThreatAssessment};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of evaluating one signal.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub should_respond: bool,
    pub assessment: Option<ThreatAssessment>,
}

impl Evaluation {
    fn skipped() -> Self {
        Self {
            should_respond: false,
            assessment: None,
        }
    }
}

/// Scores signals through the injected brain, falling back to the
/// deterministic rules when it fails.
pub struct PolicyEvaluator {
    brain: Arc<dyn ThreatBrain>,
    host: HostProfile,
    whitelist: Vec<String>,
    medium_threshold: u8,
    brain_enabled: bool,
}

impl PolicyEvaluator {
    pub fn new(brain: Arc<dyn ThreatBrain>, config: &WardenConfig) -> Self {
        Self {
            brain,
            host: HostProfile::current(config.nas.nas_ip.clone()),
            whitelist: config
                .response
                .whitelist
                .iter()
                .map(|name| name.to_lowercase())
                .collect(),
            medium_threshold: config.thresholds.medium,
            brain_enabled: config.brain.enabled,
        }
    }

    /// Evaluate one signal. Whitelisted names short-circuit with no
    /// assessment; every other signal gets one, AI-scored or rule-scored.
    pub async fn evaluate(&self, signal: &ProcessSignal) -> Evaluation {
        if self.is_whitelisted(&signal.name) {
            debug!(pid = signal.pid, name = %signal.name, "Whitelisted process, skipping");
            return Evaluation::skipped();
        }

        let assessment = if self.brain_enabled {
            match self.brain.assess(signal, &self.host).await {
                Ok(assessment) => assessment,
                Err(e) => {
                    warn!(
                        pid = signal.pid,
                        name = %signal.name,
                        error = %e,
                        "AI assessment unavailable, using rule-based fallback"
                    );
                    fallback::assess(signal)
                }
            }
        } else {
            fallback::assess(signal)
        };

        let should_respond = assessment.threat_score >= self.medium_threshold;
        if should_respond {
            info!(
                pid = signal.pid,
                name = %signal.name,
                score = assessment.threat_score,
                threat_type = %assessment.threat_type,
                ai = assessment.ai_analyzed,
                "Signal crossed response threshold"
            );
        } else {
            debug!(
                pid = signal.pid,
                name = %signal.name,
                score = assessment.threat_score,
                "Signal below response threshold"
            );
        }

        Evaluation {
            should_respond,
            assessment: Some(assessment),
        }
    }

    fn is_whitelisted(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.whitelist.iter().any(|entry| *entry == lowered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockBrain;
    use crate::types::{Confidence, RecommendedAction, ThreatType};

    fn make_config(whitelist: &[&str]) -> WardenConfig {
        let mut config = WardenConfig::default();
        config.response.whitelist = whitelist.iter().map(|s| s.to_string()).collect();
        config
    }

    fn busy_signal() -> ProcessSignal {
        let mut signal = ProcessSignal::new(808, "mine3r");
        signal.cpu_percent = 95.0;
        signal.connections_count = 30;
        signal
    }

    #[tokio::test]
    async fn test_whitelisted_process_short_circuits() {
        let brain = Arc::new(MockBrain::new());
        let evaluator = PolicyEvaluator::new(brain.clone(), &make_config(&["Backupd"]));

        let evaluation = evaluator.evaluate(&ProcessSignal::new(1, "backupd")).await;
        assert!(!evaluation.should_respond);
        assert!(evaluation.assessment.is_none());
        // The brain was never consulted.
        assert_eq!(brain.assess_calls(), 0);
    }

    #[tokio::test]
    async fn test_ai_assessment_preferred_when_available() {
        let brain = Arc::new(MockBrain::new());
        brain.queue_assessment(ThreatAssessment::new(
            77,
            Confidence::High,
            ThreatType::Malware,
            RecommendedAction::Alert,
            "known bad hash behavior",
        ));
        let evaluator = PolicyEvaluator::new(brain.clone(), &make_config(&[]));

        let evaluation = evaluator.evaluate(&busy_signal()).await;
        let assessment = evaluation.assessment.unwrap();
        assert!(evaluation.should_respond);
        assert!(assessment.ai_analyzed);
        assert_eq!(assessment.threat_score, 77);
    }

    #[tokio::test]
    async fn test_brain_failure_degrades_to_rules() {
        let brain = Arc::new(MockBrain::unreachable());
        let evaluator = PolicyEvaluator::new(brain.clone(), &make_config(&[]));

        let evaluation = evaluator.evaluate(&busy_signal()).await;
        let assessment = evaluation.assessment.unwrap();
        assert!(!assessment.ai_analyzed);
        // cpu 95 -> +30, conns 30 -> +15
        assert_eq!(assessment.threat_score, 45);
        assert!(!evaluation.should_respond);
        assert_eq!(brain.assess_calls(), 1);
    }

    #[tokio::test]
    async fn test_brain_disabled_never_calls_it() {
        let brain = Arc::new(MockBrain::new());
        let mut config = make_config(&[]);
        config.brain.enabled = false;
        let evaluator = PolicyEvaluator::new(brain.clone(), &config);

        let evaluation = evaluator.evaluate(&busy_signal()).await;
        assert!(evaluation.assessment.is_some());
        assert_eq!(brain.assess_calls(), 0);
    }

    #[tokio::test]
    async fn test_response_threshold_is_inclusive() {
        let brain = Arc::new(MockBrain::new());
        brain.queue_assessment(ThreatAssessment::new(
            50,
            Confidence::Medium,
            ThreatType::Suspicious,
            RecommendedAction::Monitor,
            "right at the line",
        ));
        let evaluator = PolicyEvaluator::new(brain, &make_config(&[]));

        let evaluation = evaluator.evaluate(&busy_signal()).await;
        assert!(evaluation.should_respond);
    }
}
