//! End-to-end pipeline scenarios over a real store and real processes.

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use warden_core::alerting::{AlertGate, LogNotifier};
use warden_core::brain::MockBrain;
use warden_core::config::WardenConfig;
use warden_core::nas::{NasGuard, NasVerdict};
use warden_core::types::{
    IncidentStatus, ProcessSignal, ResponseAction, SystemContext, ThreatType,
};
use warden_response::{BatchSampler, ResponseEngine, Verifier};
use warden_store::IncidentStore;

/// Armed executor, no quiet hours; what an always-on deployment runs with.
fn live_config() -> WardenConfig {
    let mut config = WardenConfig::default();
    config.response.dry_run = false;
    config.alerting.quiet_hours_enabled = false;
    config
}

async fn make_engine(
    dir: &TempDir,
    config: &WardenConfig,
    brain: Arc<MockBrain>,
) -> (ResponseEngine, IncidentStore, Arc<AlertGate>) {
    let store = IncidentStore::open(dir.path().join("warden.db"), &config.store)
        .await
        .unwrap();
    let gate = Arc::new(
        AlertGate::new(config.alerting.clone()).with_notifier(Arc::new(LogNotifier::new())),
    );
    let engine = ResponseEngine::new(brain, store.clone(), gate.clone(), config)
        .with_settle_delay(Duration::from_millis(50));
    (engine, store, gate)
}

/// Over the critical threshold through the rule scorer alone:
/// rule 45 + cpu 30 + mem 20 + conns 30, capped at 100.
fn miner_signal(pid: u32, name: &str) -> ProcessSignal {
    let mut signal = ProcessSignal::new(pid, name);
    signal.cmdline = format!("./{name} --pool stratum+tcp://pool.example:3333");
    signal.cpu_percent = 96.5;
    signal.memory_mb = 2400.0;
    signal.connections_count = 55;
    signal.rule_score = 45;
    signal
}

/// Medium band (55): monitor_closely.
fn watch_signal(pid: u32, name: &str) -> ProcessSignal {
    let mut signal = ProcessSignal::new(pid, name);
    signal.cpu_percent = 60.0;
    signal.rule_score = 40;
    signal
}

fn spawn_sleeper() -> Child {
    Command::new("sleep").arg("30").spawn().expect("spawn sleep")
}

fn reaped_pid() -> u32 {
    let mut child = Command::new("true").spawn().expect("spawn true");
    let pid = child.id();
    child.wait().expect("reap child");
    pid
}

fn timeline_events(incident: &warden_core::types::Incident) -> Vec<&str> {
    incident.timeline.iter().map(|t| t.event.as_str()).collect()
}

#[tokio::test]
async fn test_critical_threat_killed_verified_closed() {
    let dir = TempDir::new().unwrap();
    let config = live_config();
    let (engine, _store, gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;

    let mut child = spawn_sleeper();
    let signal = miner_signal(child.id(), "sleep");
    let incident = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap()
        .expect("incident opened");

    assert_eq!(incident.status, IncidentStatus::Closed);
    assert_eq!(incident.action_taken, Some(ResponseAction::KillNow));
    assert_eq!(incident.verified, Some(true));
    assert_eq!(incident.threat_score, 100);
    assert!(incident.post_incident_analysis.is_some());
    assert_eq!(
        timeline_events(&incident),
        ["detected", "analyzing", "responded", "verified", "closed"]
    );

    // The kill was announced to the user.
    let history = gate.history_since(Utc::now() - chrono::Duration::minutes(5));
    assert!(history.iter().any(|r| r.title == "Threat response: sleep"));
    child.wait().unwrap();
}

#[tokio::test]
async fn test_below_threshold_leaves_no_incident() {
    let dir = TempDir::new().unwrap();
    let config = live_config();
    let (engine, store, _gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;

    let signal = ProcessSignal::new(4242, "idleproc");
    let handled = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap();

    assert!(handled.is_none());
    assert!(store.active_incidents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_whitelisted_process_skipped() {
    let dir = TempDir::new().unwrap();
    let mut config = live_config();
    config.response.whitelist = vec!["backup-agent".to_string()];
    let (engine, store, _gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;

    // Even a signal that would score critical is ignored by name.
    let signal = miner_signal(9999, "backup-agent");
    let handled = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap();

    assert!(handled.is_none());
    assert!(store.active_incidents().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_already_exited_kill_closes_incident() {
    let dir = TempDir::new().unwrap();
    let config = live_config();
    let (engine, _store, _gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;

    let signal = miner_signal(reaped_pid(), "mine3r");
    let incident = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap()
        .expect("incident opened");

    assert_eq!(incident.status, IncidentStatus::Closed);
    assert_eq!(incident.verified, Some(true));
    assert_eq!(
        incident.action_result.as_deref(),
        Some("Process already terminated")
    );
}

#[tokio::test]
async fn test_nas_guard_forces_kill_from_medium_score() {
    struct FlagShareWriter;
    impl NasGuard for FlagShareWriter {
        fn inspect(&self, signal: &ProcessSignal) -> Option<NasVerdict> {
            signal.cmdline.contains("192.168.1.50").then(|| NasVerdict {
                threat_type: ThreatType::Ransomware,
                detail: "rapid writes against protected share".to_string(),
            })
        }
    }

    let dir = TempDir::new().unwrap();
    let config = live_config();
    let (engine, _store, _gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;
    let engine = engine.with_nas_guard(Arc::new(FlagShareWriter));

    // Raw score 55 (rule 40 + cpu 15) would only be a close watch.
    let mut signal = watch_signal(reaped_pid(), "cryptolock");
    signal.cmdline = "cryptolock --target //192.168.1.50/backup".to_string();

    let incident = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap()
        .expect("incident opened");

    assert_eq!(incident.threat_score, 90);
    assert_eq!(incident.threat_type, ThreatType::Ransomware);
    assert!(incident.nas_activity);
    assert_eq!(incident.action_taken, Some(ResponseAction::KillNow));
    assert_eq!(incident.status, IncidentStatus::Closed);
}

#[tokio::test]
async fn test_medium_band_watch_then_escalation() {
    let dir = TempDir::new().unwrap();
    let config = live_config();
    let (engine, store, _gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;

    let pid = reaped_pid();
    let signal = watch_signal(pid, "slowburn");
    let incident = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap()
        .expect("incident opened");

    assert_eq!(incident.status, IncidentStatus::Responded);
    assert_eq!(incident.action_taken, Some(ResponseAction::MonitorClosely));
    assert_eq!(incident.verified, None);
    assert!(engine.watching(pid));

    // Next cycle the watched process runs hot and gets terminated.
    let summary = engine
        .sweep(&BatchSampler::from_signals(&[miner_signal(pid, "slowburn")]))
        .await;
    assert_eq!(summary.escalated, 1);
    assert!(!engine.watching(pid));

    let fetched = store.get_incident(&incident.incident_id).await.unwrap();
    assert_eq!(fetched.status, IncidentStatus::Responded);
    assert_eq!(fetched.action_taken, Some(ResponseAction::KillNow));
    assert_eq!(
        timeline_events(&fetched),
        ["detected", "analyzing", "responded", "monitoring", "responded"]
    );
    assert!(fetched.timeline[3].details.starts_with("Threat escalated to"));
}

#[tokio::test]
async fn test_monitor_timeout_closes_quiet_incident() {
    let dir = TempDir::new().unwrap();
    let mut config = live_config();
    config.response.monitor_max_duration_secs = 0;
    let (engine, store, _gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;

    let signal = watch_signal(7001, "slowburn");
    let incident = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap()
        .expect("incident opened");

    let summary = engine
        .sweep(&BatchSampler::from_signals(&[signal]))
        .await;
    assert_eq!(summary.completed, 1);

    let fetched = store.get_incident(&incident.incident_id).await.unwrap();
    assert_eq!(fetched.status, IncidentStatus::Closed);
    assert_eq!(
        fetched.post_incident_analysis.as_deref(),
        Some("Monitoring period completed, no escalation")
    );
}

#[tokio::test]
async fn test_failed_verification_raises_critical_alert() {
    struct NeverVerifies;
    #[async_trait]
    impl Verifier for NeverVerifies {
        async fn verify(&self, _action: ResponseAction, _signal: &ProcessSignal) -> Option<bool> {
            Some(false)
        }
    }

    let dir = TempDir::new().unwrap();
    let config = live_config();
    let (engine, _store, gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;
    let engine = engine.with_verifier(Arc::new(NeverVerifies));

    let signal = miner_signal(reaped_pid(), "mine3r");
    let incident = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap()
        .expect("incident opened");

    // Verification failure leaves the incident at responded, unverified.
    assert_eq!(incident.status, IncidentStatus::Responded);
    assert_eq!(incident.verified, Some(false));
    assert_eq!(
        incident.timeline.last().unwrap().details,
        "Verification failed - threat may persist"
    );

    let history = gate.history_since(Utc::now() - chrono::Duration::minutes(5));
    assert!(
        history
            .iter()
            .any(|r| r.title == "Threat Elimination Failed")
    );
}

#[tokio::test]
async fn test_high_band_alerts_user() {
    let dir = TempDir::new().unwrap();
    let config = live_config();
    let (engine, _store, gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;

    // Rule 40 + cpu 30 = 70: high band, AI down, default alert_user.
    let mut signal = ProcessSignal::new(6001, "oddproc");
    signal.cpu_percent = 95.0;
    signal.rule_score = 40;

    let incident = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap()
        .expect("incident opened");

    assert_eq!(incident.action_taken, Some(ResponseAction::AlertUser));
    assert_eq!(
        incident.action_result.as_deref(),
        Some("User alert dispatched via log")
    );
    // Trivially verified, but never auto-closed: an operator still looks.
    assert_eq!(incident.status, IncidentStatus::Verified);
    assert_eq!(incident.verified, Some(true));
    assert_eq!(gate.stats().sent_total, 1);
}

#[tokio::test]
async fn test_dry_run_records_without_killing() {
    let dir = TempDir::new().unwrap();
    let mut config = live_config();
    config.response.dry_run = true;
    let (engine, _store, _gate) = make_engine(&dir, &config, Arc::new(MockBrain::new())).await;

    let mut child = spawn_sleeper();
    let signal = miner_signal(child.id(), "sleep");
    let incident = engine
        .handle_threat(&signal, &SystemContext::default())
        .await
        .unwrap()
        .expect("incident opened");

    assert_eq!(incident.status, IncidentStatus::Responded);
    assert_eq!(incident.verified, None);
    assert!(
        incident
            .action_result
            .as_deref()
            .unwrap()
            .starts_with("[DRY RUN]")
    );

    // The process was never touched.
    child.kill().unwrap();
    child.wait().unwrap();
}
