//! Monitoring sessions and the escalation sweep.
//!
//! A `monitor_closely` decision parks the process here instead of ending the
//! pipeline. Each cycle the sweep re-samples every watched PID: processes
//! that exited are dropped, ones that crossed the escalation threshold are
//! killed with the incident re-marked monitoring first, and quiet ones are
//! closed out once the watch window expires. Sessions live in memory only;
//! an agent restart forgets them.

use crate::actions::ActionExecutor;
use chrono::{Duration as TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use warden_core::config::WardenConfig;
use warden_core::policy::PolicyEvaluator;
use warden_core::types::{IncidentStatus, MonitoringSession, ProcessSignal, ResponseAction};
use warden_store::IncidentStore;

/// Re-samples a watched process. `None` means the process is gone.
pub trait SignalSampler: Send + Sync {
    fn sample(&self, pid: u32) -> Option<ProcessSignal>;
}

/// Sampler over one collection cycle's batch of signals.
pub struct BatchSampler {
    by_pid: HashMap<u32, ProcessSignal>,
}

impl BatchSampler {
    pub fn from_signals(signals: &[ProcessSignal]) -> Self {
        Self {
            by_pid: signals.iter().map(|s| (s.pid, s.clone())).collect(),
        }
    }
}

impl SignalSampler for BatchSampler {
    fn sample(&self, pid: u32) -> Option<ProcessSignal> {
        self.by_pid.get(&pid).cloned()
    }
}

/// What one sweep did, for the daemon's cycle log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub exited: usize,
    pub escalated: usize,
    pub completed: usize,
}

/// Close watches keyed by PID, shared between the orchestrator and the sweep.
pub struct MonitorRegistry {
    store: IncidentStore,
    executor: Arc<ActionExecutor>,
    evaluator: Arc<PolicyEvaluator>,
    sessions: Mutex<HashMap<u32, MonitoringSession>>,
    escalation_threshold: u8,
    max_duration: TimeDelta,
}

impl MonitorRegistry {
    pub fn new(
        store: IncidentStore,
        executor: Arc<ActionExecutor>,
        evaluator: Arc<PolicyEvaluator>,
        config: &WardenConfig,
    ) -> Self {
        Self {
            store,
            executor,
            evaluator,
            sessions: Mutex::new(HashMap::new()),
            escalation_threshold: config.response.escalation_threshold,
            max_duration: TimeDelta::seconds(config.response.monitor_max_duration_secs as i64),
        }
    }

    /// Start the close watch for a process. A PID already under watch gets
    /// its session replaced; the newer incident owns the watch.
    pub fn watch(&self, incident_id: &str, signal: &ProcessSignal) {
        let session = MonitoringSession::start(signal.pid, signal.name.clone(), incident_id);
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(previous) = sessions.insert(signal.pid, session) {
            warn!(
                pid = signal.pid,
                previous_incident = %previous.incident_id,
                incident_id,
                "Replaced existing monitoring session"
            );
        } else {
            info!(
                pid = signal.pid,
                name = %signal.name,
                incident_id,
                "Monitoring session started"
            );
        }
    }

    pub fn watching(&self, pid: u32) -> bool {
        self.sessions.lock().unwrap().contains_key(&pid)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// One pass over every session: drop watches whose process exited,
    /// escalate the ones that crossed the threshold, close out expired ones.
    pub async fn sweep(&self, sampler: &dyn SignalSampler) -> SweepSummary {
        let watched: Vec<MonitoringSession> = {
            let sessions = self.sessions.lock().unwrap();
            sessions.values().cloned().collect()
        };
        let mut summary = SweepSummary {
            checked: watched.len(),
            ..SweepSummary::default()
        };

        for session in watched {
            let Some(signal) = sampler.sample(session.pid) else {
                debug!(
                    pid = session.pid,
                    incident_id = %session.incident_id,
                    "Watched process exited quietly"
                );
                self.drop_session(session.pid);
                summary.exited += 1;
                continue;
            };

            let evaluation = self.evaluator.evaluate(&signal).await;
            let score = evaluation.assessment.as_ref().map_or(0, |a| a.threat_score);

            if score >= self.escalation_threshold {
                self.drop_session(session.pid);
                self.escalate(&session, &signal, score).await;
                summary.escalated += 1;
            } else if Utc::now().signed_duration_since(session.start_time) > self.max_duration {
                self.drop_session(session.pid);
                self.complete(&session).await;
                summary.completed += 1;
            } else {
                let mut sessions = self.sessions.lock().unwrap();
                if let Some(live) = sessions.get_mut(&session.pid) {
                    live.check_count += 1;
                }
                debug!(pid = session.pid, score, "Watched process still quiet");
            }
        }
        summary
    }

    fn drop_session(&self, pid: u32) {
        self.sessions.lock().unwrap().remove(&pid);
    }

    /// A failed bookkeeping write never blocks the kill; protection first.
    async fn escalate(&self, session: &MonitoringSession, signal: &ProcessSignal, score: u8) {
        warn!(
            pid = session.pid,
            name = %session.name,
            incident_id = %session.incident_id,
            score,
            "Watched process escalated, terminating"
        );
        if let Err(e) = self
            .store
            .update_status(
                &session.incident_id,
                IncidentStatus::Monitoring,
                Some(format!("Threat escalated to {score}/100")),
            )
            .await
        {
            warn!(incident_id = %session.incident_id, error = %e, "Failed to record escalation");
        }

        let result = match self.executor.execute(ResponseAction::KillNow, signal).await {
            Ok(outcome) => outcome.detail,
            Err(e) => format!("FAILED: {e}"),
        };
        if let Err(e) = self
            .store
            .record_action(&session.incident_id, ResponseAction::KillNow, &result)
            .await
        {
            warn!(
                incident_id = %session.incident_id,
                error = %e,
                "Failed to record escalation kill"
            );
        }
    }

    async fn complete(&self, session: &MonitoringSession) {
        info!(
            pid = session.pid,
            incident_id = %session.incident_id,
            checks = session.check_count,
            "Monitoring period expired without escalation"
        );
        if let Err(e) = self
            .store
            .close_incident(
                &session.incident_id,
                Some("Monitoring period completed, no escalation".to_string()),
            )
            .await
        {
            warn!(
                incident_id = %session.incident_id,
                error = %e,
                "Failed to close monitored incident"
            );
        }
    }
}
