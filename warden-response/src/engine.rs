//! The incident orchestrator.
//!
//! One entry point, [`ResponseEngine::handle_threat`], sequences the whole
//! pipeline for a signal: evaluate, open the incident, decide, act, notify,
//! verify, close. Non-store steps degrade (log and record what they can);
//! store failures propagate so the daemon can count the cycle as failed.

use crate::actions::{ActionExecutor, ActionOutcome};
use crate::monitor::{MonitorRegistry, SignalSampler, SweepSummary};
use crate::verify::{ProcessVerifier, Verifier};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_core::alerting::{Admission, Alert, AlertGate, AlertPriority, AlertSeverity};
use warden_core::brain::{IncidentSummary, ThreatBrain};
use warden_core::config::WardenConfig;
use warden_core::decision::DecisionEngine;
use warden_core::error::Result;
use warden_core::fallback;
use warden_core::nas::{HeuristicNasGuard, NasGuard};
use warden_core::policy::PolicyEvaluator;
use warden_core::types::{
    ActionDecision, Incident, IncidentStatus, ProcessSignal, ResponseAction, SystemContext,
    ThreatAssessment,
};
use warden_store::IncidentStore;

pub struct ResponseEngine {
    evaluator: Arc<PolicyEvaluator>,
    decider: DecisionEngine,
    executor: Arc<ActionExecutor>,
    verifier: Arc<dyn Verifier>,
    monitors: MonitorRegistry,
    store: IncidentStore,
    gate: Arc<AlertGate>,
    brain: Arc<dyn ThreatBrain>,
    compose_with_brain: bool,
    settle_delay: Duration,
}

impl ResponseEngine {
    pub fn new(
        brain: Arc<dyn ThreatBrain>,
        store: IncidentStore,
        gate: Arc<AlertGate>,
        config: &WardenConfig,
    ) -> Self {
        let evaluator = Arc::new(PolicyEvaluator::new(brain.clone(), config));
        let mut decider = DecisionEngine::new(brain.clone(), config);
        if config.nas.enabled {
            decider = decider.with_nas_guard(Arc::new(HeuristicNasGuard::new(&config.nas)));
        }
        let executor = Arc::new(if config.response.dry_run {
            ActionExecutor::new()
        } else {
            ActionExecutor::live()
        });
        let monitors = MonitorRegistry::new(
            store.clone(),
            executor.clone(),
            evaluator.clone(),
            config,
        );
        Self {
            evaluator,
            decider,
            executor,
            verifier: Arc::new(ProcessVerifier),
            monitors,
            store,
            gate,
            brain,
            compose_with_brain: config.brain.enabled && config.brain.enable_alert_composition,
            settle_delay: Duration::from_secs(1),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_nas_guard(mut self, guard: Arc<dyn NasGuard>) -> Self {
        self.decider = self.decider.with_nas_guard(guard);
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn watching(&self, pid: u32) -> bool {
        self.monitors.watching(pid)
    }

    pub fn active_sessions(&self) -> usize {
        self.monitors.active_sessions()
    }

    /// Run the escalation sweep over every active monitoring session.
    pub async fn sweep(&self, sampler: &dyn SignalSampler) -> SweepSummary {
        self.monitors.sweep(sampler).await
    }

    /// Run the full pipeline for one signal. Returns the final incident
    /// state, or `None` when the signal is whitelisted or below the
    /// response threshold.
    pub async fn handle_threat(
        &self,
        signal: &ProcessSignal,
        ctx: &SystemContext,
    ) -> Result<Option<Incident>> {
        let evaluation = self.evaluator.evaluate(signal).await;
        let Some(mut assessment) = evaluation.assessment else {
            return Ok(None);
        };
        if !evaluation.should_respond {
            return Ok(None);
        }

        // Applied before the incident is opened so the stored score and
        // threat type already reflect a guard hit.
        let nas_hit = self
            .decider
            .apply_nas_guard(signal, &mut assessment)
            .is_some();

        let incident = self
            .store
            .create_incident(signal, &assessment, nas_hit)
            .await?;
        info!(
            incident_id = %incident.incident_id,
            pid = signal.pid,
            name = %signal.name,
            score = assessment.threat_score,
            threat_type = %assessment.threat_type,
            "Incident opened"
        );

        self.store
            .update_status(&incident.incident_id, IncidentStatus::Analyzing, None)
            .await?;

        let decision = self.decider.decide(signal, &mut assessment, ctx).await;
        debug!(
            incident_id = %incident.incident_id,
            action = %decision.action,
            reason = %decision.reason,
            "Response decided"
        );

        let (result_text, action_ok) = self
            .execute_decision(&incident.incident_id, signal, &assessment, &decision)
            .await;
        self.store
            .record_action(&incident.incident_id, decision.action, &result_text)
            .await?;

        if action_ok && decision.action == ResponseAction::KillNow {
            self.notify_response(signal, &assessment, &decision).await;
        }

        if let Some(verified) = self.verify_outcome(signal, &decision).await {
            self.store
                .record_verification(&incident.incident_id, verified)
                .await?;
            if verified {
                if decision.action == ResponseAction::KillNow {
                    let analysis = format!(
                        "Process '{}' (PID {}) terminated and confirmed gone. \
                         Threat score {}/100, type {}.",
                        signal.name, signal.pid, assessment.threat_score, assessment.threat_type
                    );
                    self.store
                        .close_incident(&incident.incident_id, Some(analysis))
                        .await?;
                }
            } else {
                self.raise_verification_alarm(signal, &decision).await;
            }
        }

        let final_state = self.store.get_incident(&incident.incident_id).await?;
        Ok(Some(final_state))
    }

    async fn execute_decision(
        &self,
        incident_id: &str,
        signal: &ProcessSignal,
        assessment: &ThreatAssessment,
        decision: &ActionDecision,
    ) -> (String, bool) {
        match decision.action {
            ResponseAction::MonitorClosely => {
                self.monitors.watch(incident_id, signal);
                ("Monitoring session started".to_string(), true)
            }
            ResponseAction::AlertUser => {
                let alert = self.compose_user_alert(signal, assessment, decision).await;
                let admission = self.gate.send(&alert).await;
                self.record_alert_history(&alert, &admission).await;
                let text = match &admission {
                    Admission::Admitted { channels } => {
                        format!("User alert dispatched via {}", channels.join(", "))
                    }
                    Admission::Suppressed { stage } => {
                        format!("User alert suppressed ({stage})")
                    }
                };
                (text, true)
            }
            action => match self.executor.execute(action, signal).await {
                Ok(ActionOutcome { detail, .. }) => (detail, true),
                Err(e) => {
                    warn!(incident_id, action = %action, error = %e, "Response action failed");
                    (format!("FAILED: {e}"), false)
                }
            },
        }
    }

    /// Kills get a settle window before the liveness probe. Dry-run kills are
    /// not verifiable (nothing was delivered), so the step is skipped.
    async fn verify_outcome(
        &self,
        signal: &ProcessSignal,
        decision: &ActionDecision,
    ) -> Option<bool> {
        if decision.action == ResponseAction::KillNow {
            if self.executor.is_dry_run() {
                debug!(pid = signal.pid, "Dry run, skipping verification");
                return None;
            }
            tokio::time::sleep(self.settle_delay).await;
        }
        self.verifier.verify(decision.action, signal).await
    }

    async fn notify_response(
        &self,
        signal: &ProcessSignal,
        assessment: &ThreatAssessment,
        decision: &ActionDecision,
    ) {
        let alert = self.compose_user_alert(signal, assessment, decision).await;
        let admission = self.gate.send(&alert).await;
        if let Admission::Suppressed { stage } = &admission {
            debug!(alert_id = %alert.alert_id, %stage, "Response notification suppressed");
        }
        self.record_alert_history(&alert, &admission).await;
    }

    async fn raise_verification_alarm(&self, signal: &ProcessSignal, decision: &ActionDecision) {
        warn!(
            pid = signal.pid,
            name = %signal.name,
            action = %decision.action,
            "Verification failed, requesting manual intervention"
        );
        let alert = Alert::new(
            "Threat Elimination Failed",
            format!(
                "Action '{}' against '{}' (PID {}) could not be verified - \
                 manual intervention required",
                decision.action, signal.name, signal.pid
            ),
            AlertPriority::Critical,
            AlertSeverity::Critical,
            "response_engine",
        );
        let admission = self.gate.send_critical(&alert).await;
        self.record_alert_history(&alert, &admission).await;
    }

    async fn compose_user_alert(
        &self,
        signal: &ProcessSignal,
        assessment: &ThreatAssessment,
        decision: &ActionDecision,
    ) -> Alert {
        let summary = IncidentSummary {
            process_name: signal.name.clone(),
            pid: signal.pid,
            threat_score: assessment.threat_score,
            threat_type: assessment.threat_type.to_string(),
            action: decision.action.to_string(),
            reasoning: assessment.reasoning.clone(),
        };
        let message = if !decision.user_message.is_empty() {
            decision.user_message.clone()
        } else if self.compose_with_brain {
            match self.brain.compose_alert(&summary).await {
                Ok(body) => body,
                Err(e) => {
                    debug!(error = %e, "Alert composition unavailable, using template");
                    fallback::compose_alert(&summary)
                }
            }
        } else {
            fallback::compose_alert(&summary)
        };

        let (priority, severity) = if decision.action == ResponseAction::KillNow {
            (AlertPriority::Critical, AlertSeverity::Critical)
        } else {
            (AlertPriority::High, AlertSeverity::High)
        };
        Alert::new(
            format!("Threat response: {}", signal.name),
            message,
            priority,
            severity,
            "response_engine",
        )
        .with_details(json!({
            "pid": signal.pid,
            "action": decision.action.to_string(),
            "score": assessment.threat_score,
        }))
    }

    async fn record_alert_history(&self, alert: &Alert, admission: &Admission) {
        let channels = match admission {
            Admission::Admitted { channels } => channels.clone(),
            Admission::Suppressed { .. } => Vec::new(),
        };
        if let Err(e) = self
            .store
            .record_alert(alert, admission.is_admitted(), &channels)
            .await
        {
            warn!(alert_id = %alert.alert_id, error = %e, "Failed to record alert history");
        }
    }
}
