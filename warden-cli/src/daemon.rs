//! The collection-cycle daemon.
//!
//! Owns the wired component graph and drives the fixed-interval loop:
//! pull a batch from the feed, run the pipeline per signal, sweep the
//! close watches, and keep the error-containment counters. Store
//! failures inside a cycle mark the whole cycle failed; a configurable
//! streak of failed cycles stops the daemon with a critical alert.

use crate::source::SignalSource;
use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use warden_core::OllamaBrain;
use warden_core::alerting::notify::create_webhook_notifier;
use warden_core::alerting::{Alert, AlertGate, AlertPriority, AlertSeverity, LogNotifier};
use warden_core::brain::ThreatBrain;
use warden_core::config::{WardenConfig, default_store_path};
use warden_core::types::{IncidentStatus, ProcessSignal, SystemContext};
use warden_response::{BatchSampler, ResponseEngine};
use warden_store::IncidentStore;

/// One cycle's accounting, for the log line.
#[derive(Debug, Default, Clone, Copy)]
struct CycleReport {
    signals: usize,
    incidents: usize,
    failures: usize,
}

pub struct Daemon {
    engine: ResponseEngine,
    store: IncidentStore,
    gate: Arc<AlertGate>,
    config: WardenConfig,
    cycle: u64,
    consecutive_failures: u32,
}

impl Daemon {
    pub fn new(
        engine: ResponseEngine,
        store: IncidentStore,
        gate: Arc<AlertGate>,
        config: WardenConfig,
    ) -> Self {
        Self {
            engine,
            store,
            gate,
            config,
            cycle: 0,
            consecutive_failures: 0,
        }
    }

    /// Wire the production component graph from configuration.
    pub async fn from_config(config: WardenConfig) -> anyhow::Result<Self> {
        let brain: Arc<dyn ThreatBrain> = Arc::new(OllamaBrain::new(&config.brain)?);

        let store_path = config
            .store
            .path
            .clone()
            .unwrap_or_else(default_store_path);
        let store = IncidentStore::open(&store_path, &config.store)
            .await
            .context("cannot open incident store")?;

        let mut gate =
            AlertGate::new(config.alerting.clone()).with_notifier(Arc::new(LogNotifier::new()));
        if let Some(webhook) = &config.alerting.webhook
            && webhook.enabled
        {
            gate = gate.with_notifier(Arc::new(create_webhook_notifier(webhook)));
        }
        let gate = Arc::new(gate);

        let engine = ResponseEngine::new(brain, store.clone(), gate.clone(), &config);
        info!(
            store = %store_path.display(),
            model = %config.brain.model,
            brain_enabled = config.brain.enabled,
            dry_run = config.response.dry_run,
            "Component graph ready"
        );
        Ok(Self::new(engine, store, gate, config))
    }

    /// Drive the cycle loop until the feed drains, a failure streak
    /// stops us, `max_cycles` is reached, or SIGINT/SIGTERM arrives.
    /// A signal received mid-cycle lets the cycle finish first.
    pub async fn run(
        mut self,
        mut source: Box<dyn SignalSource>,
        max_cycles: Option<u64>,
    ) -> anyhow::Result<()> {
        let interval = Duration::from_secs(self.config.daemon.cycle_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut sigint =
            signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;

        info!(
            interval_secs = interval.as_secs(),
            "Warden daemon started"
        );

        let mut feed_done = false;
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!(cycles = self.cycle, "SIGINT received, shutting down");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!(cycles = self.cycle, "SIGTERM received, shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            self.cycle += 1;
            let started = Instant::now();

            let cycle_result = match self.pull_batch(&mut source, &mut feed_done).await {
                Ok(batch) => self.run_cycle(&batch).await,
                Err(e) => Err(e),
            };

            match cycle_result {
                Ok(report) => {
                    self.consecutive_failures = 0;
                    if report.signals > 0 || report.incidents > 0 {
                        info!(
                            cycle = self.cycle,
                            signals = report.signals,
                            incidents = report.incidents,
                            failures = report.failures,
                            "Cycle complete"
                        );
                    }
                }
                Err(e) => {
                    if self.note_cycle_failure(&e).await {
                        anyhow::bail!(
                            "daemon stopped after {} consecutive failed cycles: {e:#}",
                            self.consecutive_failures
                        );
                    }
                }
            }

            if self.cycle % self.config.daemon.status_every_cycles.max(1) == 0 {
                self.log_status().await;
                self.prune_old_events().await;
            }

            let elapsed = started.elapsed();
            if elapsed > interval {
                warn!(
                    cycle = self.cycle,
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "Cycle overran the interval"
                );
            }

            if feed_done && self.engine.active_sessions() == 0 {
                info!(cycles = self.cycle, "Feed drained and watches closed, exiting");
                return Ok(());
            }
            if let Some(max) = max_cycles
                && self.cycle >= max
            {
                info!(cycles = self.cycle, "Cycle limit reached, exiting");
                return Ok(());
            }
        }
    }

    /// Fetch the next batch; an exhausted feed yields empty batches so
    /// the sweep keeps running until the remaining watches close.
    async fn pull_batch(
        &self,
        source: &mut Box<dyn SignalSource>,
        feed_done: &mut bool,
    ) -> anyhow::Result<Vec<ProcessSignal>> {
        if *feed_done {
            return Ok(Vec::new());
        }
        match source.next_batch().await? {
            Some(batch) => Ok(batch),
            None => {
                *feed_done = true;
                info!(cycle = self.cycle, "Signal feed exhausted");
                Ok(Vec::new())
            }
        }
    }

    async fn run_cycle(&self, batch: &[ProcessSignal]) -> anyhow::Result<CycleReport> {
        let ctx = SystemContext {
            active_threats: self.engine.active_sessions() as u32,
            ..SystemContext::default()
        };
        let mut report = CycleReport {
            signals: batch.len(),
            ..CycleReport::default()
        };
        let mut first_err: Option<anyhow::Error> = None;

        for signal in batch {
            // Raw telemetry goes to the event log whether or not the
            // signal opens an incident.
            if let Err(e) = self.store.record_event(signal).await {
                warn!(pid = signal.pid, error = %e, "Event recording failed");
                report.failures += 1;
                if first_err.is_none() {
                    first_err = Some(e.into());
                }
            }
            match self.engine.handle_threat(signal, &ctx).await {
                Ok(Some(_)) => report.incidents += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(
                        pid = signal.pid,
                        name = %signal.name,
                        error = %e,
                        "Pipeline failed for signal"
                    );
                    report.failures += 1;
                    if first_err.is_none() {
                        first_err = Some(e.into());
                    }
                }
            }
        }

        let sweep = self.engine.sweep(&BatchSampler::from_signals(batch)).await;
        if sweep.checked > 0 {
            info!(
                checked = sweep.checked,
                exited = sweep.exited,
                escalated = sweep.escalated,
                completed = sweep.completed,
                "Escalation sweep"
            );
        }

        match first_err {
            Some(e) => Err(e.context("cycle had pipeline failures")),
            None => Ok(report),
        }
    }

    /// Returns true when the failure streak says the daemon must stop.
    /// The stop itself is announced through the bypass path so rate
    /// limits and quiet hours cannot swallow it.
    async fn note_cycle_failure(&mut self, err: &anyhow::Error) -> bool {
        self.consecutive_failures += 1;
        error!(
            streak = self.consecutive_failures,
            limit = self.config.daemon.max_consecutive_failures,
            error = %err,
            "Cycle failed"
        );
        if self.consecutive_failures < self.config.daemon.max_consecutive_failures {
            return false;
        }
        let alert = Alert::new(
            "Warden daemon stopping",
            format!(
                "{} consecutive cycle failures; last error: {err:#}. \
                 Autonomous response is offline until the daemon is restarted.",
                self.consecutive_failures
            ),
            AlertPriority::Critical,
            AlertSeverity::Critical,
            "warden-daemon",
        );
        self.gate.send_critical(&alert).await;
        true
    }

    async fn log_status(&self) {
        let stats = self.gate.stats();
        let suppressed = stats.suppressed_rate_limit
            + stats.suppressed_quiet_hours
            + stats.suppressed_duplicate
            + stats.suppressed_no_channel;
        match self.store.counts_by_status().await {
            Ok(counts) => {
                let closed = counts.get(&IncidentStatus::Closed).copied().unwrap_or(0);
                let active: u32 = counts
                    .iter()
                    .filter(|(status, _)| **status != IncidentStatus::Closed)
                    .map(|(_, n)| *n)
                    .sum();
                info!(
                    cycle = self.cycle,
                    active_incidents = active,
                    closed_incidents = closed,
                    watches = self.engine.active_sessions(),
                    alerts_sent = stats.sent_total,
                    alerts_suppressed = suppressed,
                    "Status"
                );
            }
            Err(e) => warn!(cycle = self.cycle, error = %e, "Status query failed"),
        }
    }

    async fn prune_old_events(&self) {
        let days = i64::from(self.config.store.prune_events_after_days);
        if days == 0 {
            return;
        }
        let cutoff = Utc::now() - ChronoDuration::days(days);
        match self.store.prune_events_before(cutoff).await {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "Pruned old process events"),
            Err(e) => warn!(error = %e, "Event pruning failed"),
        }
    }
}
