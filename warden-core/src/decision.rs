//! Decision engine: one assessment in, one action out.
//!
//! A threshold ladder over the configured critical/high/medium scores, with
//! two twists the ladder must honor:
//! - the NAS ransomware guard runs before any threshold comparison and can
//!   force the effective score to 90+;
//! - at critical scores the AI may override the default kill, the only path
//!   where a higher score yields a softer action.

use crate::brain::ThreatBrain;
use crate::config::{ThresholdConfig, WardenConfig};
use crate::fallback;
use crate::nas::{NAS_SCORE_FLOOR, NasGuard, NasVerdict};
use crate::types::{
    ActionDecision, Confidence, ProcessSignal, ResponseAction, SystemContext, ThreatAssessment,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns assessments into response actions.
pub struct DecisionEngine {
    brain: Arc<dyn ThreatBrain>,
    nas_guard: Option<Arc<dyn NasGuard>>,
    thresholds: ThresholdConfig,
    enable_ai_decisions: bool,
    ai_override_at_critical: bool,
}

impl DecisionEngine {
    pub fn new(brain: Arc<dyn ThreatBrain>, config: &WardenConfig) -> Self {
        Self {
            brain,
            nas_guard: None,
            thresholds: config.thresholds.clone(),
            enable_ai_decisions: config.brain.enabled && config.response.enable_ai_decisions,
            ai_override_at_critical: config.response.ai_override_at_critical,
        }
    }

    pub fn with_nas_guard(mut self, guard: Arc<dyn NasGuard>) -> Self {
        self.nas_guard = Some(guard);
        self
    }

    /// Run the NAS guard against the signal, raising the assessment's score
    /// to the floor and overriding its threat type when flagged. Idempotent;
    /// callers persist the adjusted assessment before deciding.
    pub fn apply_nas_guard(
        &self,
        signal: &ProcessSignal,
        assessment: &mut ThreatAssessment,
    ) -> Option<NasVerdict> {
        let guard = self.nas_guard.as_ref()?;
        let verdict = guard.inspect(signal)?;
        warn!(
            pid = signal.pid,
            name = %signal.name,
            previous_score = assessment.threat_score,
            threat_type = %verdict.threat_type,
            "NAS guard flagged signal, forcing score floor"
        );
        assessment.raise_score_to(NAS_SCORE_FLOOR);
        assessment.threat_type = verdict.threat_type;
        Some(verdict)
    }

    /// Pick the action for an assessed signal. The NAS guard is applied
    /// first so a forced score hits the ladder, not the original one.
    pub async fn decide(
        &self,
        signal: &ProcessSignal,
        assessment: &mut ThreatAssessment,
        ctx: &SystemContext,
    ) -> ActionDecision {
        self.apply_nas_guard(signal, assessment);
        let score = assessment.threat_score;

        if score >= self.thresholds.critical {
            return self.decide_critical(signal, assessment, ctx).await;
        }

        if score >= self.thresholds.high {
            if self.enable_ai_decisions {
                match self.brain.decide(signal, assessment, ctx).await {
                    Ok(decision) => {
                        debug!(
                            pid = signal.pid,
                            action = %decision.action,
                            "AI decision at high band"
                        );
                        return decision;
                    }
                    Err(e) => {
                        warn!(pid = signal.pid, error = %e, "AI decision unavailable, using default");
                        return ActionDecision::new(
                            ResponseAction::AlertUser,
                            Confidence::Medium,
                            "High threat score - user attention required",
                        );
                    }
                }
            }
            return ActionDecision::new(
                ResponseAction::AlertUser,
                Confidence::Medium,
                "High threat score - user attention required",
            );
        }

        if score >= self.thresholds.medium {
            return ActionDecision::new(
                ResponseAction::MonitorClosely,
                Confidence::Medium,
                "Elevated threat score - watching for escalation",
            );
        }

        ActionDecision::new(
            ResponseAction::LogOnly,
            Confidence::Low,
            "Below response thresholds",
        )
    }

    /// Critical band: default is an escalating kill. With the override
    /// enabled the AI is consulted and a non-kill answer wins. There is no
    /// floor under the override; it may go as soft as log_only.
    async fn decide_critical(
        &self,
        signal: &ProcessSignal,
        assessment: &ThreatAssessment,
        ctx: &SystemContext,
    ) -> ActionDecision {
        let default = fallback::decide(assessment);

        if !(self.ai_override_at_critical && self.enable_ai_decisions) {
            return default;
        }

        match self.brain.decide(signal, assessment, ctx).await {
            Ok(decision) if decision.action != ResponseAction::KillNow => {
                warn!(
                    pid = signal.pid,
                    name = %signal.name,
                    score = assessment.threat_score,
                    overridden_to = %decision.action,
                    reason = %decision.reason,
                    "AI overrode critical auto-kill"
                );
                decision
            }
            Ok(_) => default,
            Err(e) => {
                warn!(
                    pid = signal.pid,
                    error = %e,
                    "AI unavailable for critical override, proceeding with kill"
                );
                default
            }
        }
    }
}
