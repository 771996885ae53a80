//! Alert admission gate.
//!
//! Pipeline, in order: rate limit -> quiet hours -> dedup -> per-channel
//! filters. Any stage can suppress the alert entirely. Side effects
//! (counters, dedup stamp, history ring) land only when the alert is
//! actually admitted to at least one channel.

use super::notify::Notifier;
use super::{Alert, AlertPriority};
use crate::config::AlertingConfig;
use chrono::{DateTime, Timelike, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Bounded history ring size.
const MAX_HISTORY: usize = 1000;

/// Dedup map cap; expired entries are pruned once it is exceeded.
const MAX_DEDUP_ENTRIES: usize = 1000;

/// Which stage rejected an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressStage {
    RateLimit,
    QuietHours,
    Duplicate,
    NoChannel,
}

impl std::fmt::Display for SuppressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuppressStage::RateLimit => write!(f, "rate_limit"),
            SuppressStage::QuietHours => write!(f, "quiet_hours"),
            SuppressStage::Duplicate => write!(f, "duplicate"),
            SuppressStage::NoChannel => write!(f, "no_channel"),
        }
    }
}

/// Gate verdict for one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Accepted; lists the channel names that will carry it.
    Admitted { channels: Vec<String> },
    /// Rejected at the named stage.
    Suppressed { stage: SuppressStage },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// One line of the gate's bounded send history.
#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub alert_id: String,
    pub title: String,
    pub priority: AlertPriority,
    pub severity: super::AlertSeverity,
    pub source: String,
    pub sent_at: DateTime<Utc>,
    pub channels: Vec<String>,
}

/// Counters snapshot for status logging.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GateStats {
    pub sent_total: u64,
    pub sent_today: u32,
    pub sent_this_hour: u32,
    pub suppressed_rate_limit: u64,
    pub suppressed_quiet_hours: u64,
    pub suppressed_duplicate: u64,
    pub suppressed_no_channel: u64,
    pub tracked_alert_ids: usize,
}

#[derive(Debug, Default)]
struct SuppressedCounts {
    rate_limit: u64,
    quiet_hours: u64,
    duplicate: u64,
    no_channel: u64,
}

struct GateState {
    /// Sends per hour-of-day, cleared on day rollover.
    hourly: HashMap<u32, u32>,
    daily: u32,
    last_reset: DateTime<Utc>,
    /// alert_id -> last admitted time, for dedup.
    recent: HashMap<String, DateTime<Utc>>,
    history: VecDeque<AlertRecord>,
    suppressed: SuppressedCounts,
    sent_total: u64,
}

impl GateState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            hourly: HashMap::new(),
            daily: 0,
            last_reset: now,
            recent: HashMap::new(),
            history: VecDeque::with_capacity(128),
            suppressed: SuppressedCounts::default(),
            sent_total: 0,
        }
    }

    /// Clear counters when the UTC date changes.
    fn roll_day(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.last_reset.date_naive() {
            debug!(previous_daily = self.daily, "Alert counters reset on day rollover");
            self.hourly.clear();
            self.daily = 0;
            self.last_reset = now;
        }
    }

    fn prune_recent(&mut self, now: DateTime<Utc>, window_secs: i64) {
        if self.recent.len() <= MAX_DEDUP_ENTRIES {
            return;
        }
        self.recent
            .retain(|_, last| now.signed_duration_since(*last).num_seconds() < window_secs);
    }
}

/// Is `hour` inside the quiet window `[start, end)`?
/// The window may wrap past midnight; equal bounds quiet the whole day.
fn in_quiet_hours(hour: u8, start: u8, end: u8) -> bool {
    if start < end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// The admission gate plus the notifiers it feeds.
pub struct AlertGate {
    config: AlertingConfig,
    notifiers: Vec<Arc<dyn Notifier>>,
    state: Mutex<GateState>,
}

impl AlertGate {
    pub fn new(config: AlertingConfig) -> Self {
        Self {
            config,
            notifiers: Vec::new(),
            state: Mutex::new(GateState::new(Utc::now())),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Run the full admission pipeline without dispatching.
    pub fn admit(&self, alert: &Alert) -> Admission {
        self.admit_at(alert, Utc::now(), false)
    }

    /// Admission for the verification-failure class: skips rate limits and
    /// quiet hours, still deduplicates.
    pub fn admit_bypassing_limits(&self, alert: &Alert) -> Admission {
        self.admit_at(alert, Utc::now(), true)
    }

    /// Admit and, on success, dispatch to every accepted channel.
    pub async fn send(&self, alert: &Alert) -> Admission {
        let admission = self.admit(alert);
        if let Admission::Admitted { channels } = &admission {
            self.dispatch(alert, channels).await;
        }
        admission
    }

    /// [`Self::send`] on the limit-bypassing path.
    pub async fn send_critical(&self, alert: &Alert) -> Admission {
        let admission = self.admit_bypassing_limits(alert);
        if let Admission::Admitted { channels } = &admission {
            self.dispatch(alert, channels).await;
        }
        admission
    }

    fn admit_at(&self, alert: &Alert, now: DateTime<Utc>, bypass_limits: bool) -> Admission {
        let mut state = self.state.lock().unwrap();
        state.roll_day(now);

        if !bypass_limits {
            let hour_count = state.hourly.get(&now.hour()).copied().unwrap_or(0);
            if hour_count >= self.config.max_per_hour || state.daily >= self.config.max_per_day {
                state.suppressed.rate_limit += 1;
                debug!(
                    alert_id = %alert.alert_id,
                    hour_count,
                    daily = state.daily,
                    "Alert suppressed by rate limit"
                );
                return Admission::Suppressed {
                    stage: SuppressStage::RateLimit,
                };
            }

            if self.config.quiet_hours_enabled
                && alert.priority != AlertPriority::Critical
                && in_quiet_hours(
                    now.hour() as u8,
                    self.config.quiet_hours_start,
                    self.config.quiet_hours_end,
                )
            {
                state.suppressed.quiet_hours += 1;
                debug!(alert_id = %alert.alert_id, hour = now.hour(), "Alert suppressed by quiet hours");
                return Admission::Suppressed {
                    stage: SuppressStage::QuietHours,
                };
            }
        }

        let window_secs = self.config.dedup_window_secs as i64;
        if let Some(last) = state.recent.get(&alert.alert_id)
            && now.signed_duration_since(*last).num_seconds() < window_secs
        {
            state.suppressed.duplicate += 1;
            debug!(alert_id = %alert.alert_id, "Duplicate alert suppressed");
            return Admission::Suppressed {
                stage: SuppressStage::Duplicate,
            };
        }

        let channels: Vec<String> = self
            .notifiers
            .iter()
            .filter(|n| n.filter().accepts(alert))
            .map(|n| n.name().to_string())
            .collect();
        if channels.is_empty() {
            state.suppressed.no_channel += 1;
            debug!(alert_id = %alert.alert_id, "No channel accepted alert");
            return Admission::Suppressed {
                stage: SuppressStage::NoChannel,
            };
        }

        *state.hourly.entry(now.hour()).or_insert(0) += 1;
        state.daily += 1;
        state.sent_total += 1;
        state.recent.insert(alert.alert_id.clone(), now);
        state.prune_recent(now, window_secs);
        state.history.push_back(AlertRecord {
            alert_id: alert.alert_id.clone(),
            title: alert.title.clone(),
            priority: alert.priority,
            severity: alert.severity,
            source: alert.source.clone(),
            sent_at: now,
            channels: channels.clone(),
        });
        while state.history.len() > MAX_HISTORY {
            state.history.pop_front();
        }

        info!(
            alert_id = %alert.alert_id,
            title = %alert.title,
            priority = %alert.priority,
            channels = ?channels,
            "Alert admitted"
        );
        Admission::Admitted { channels }
    }

    async fn dispatch(&self, alert: &Alert, channels: &[String]) {
        for notifier in &self.notifiers {
            if !channels.iter().any(|c| c == notifier.name()) {
                continue;
            }
            if let Err(e) = notifier.send(alert).await {
                // One bad channel never blocks the others.
                warn!(channel = notifier.name(), error = %e, "Channel send failed");
            }
        }
    }

    pub fn stats(&self) -> GateStats {
        self.stats_at(Utc::now())
    }

    fn stats_at(&self, now: DateTime<Utc>) -> GateStats {
        let state = self.state.lock().unwrap();
        GateStats {
            sent_total: state.sent_total,
            sent_today: state.daily,
            sent_this_hour: state.hourly.get(&now.hour()).copied().unwrap_or(0),
            suppressed_rate_limit: state.suppressed.rate_limit,
            suppressed_quiet_hours: state.suppressed.quiet_hours,
            suppressed_duplicate: state.suppressed.duplicate,
            suppressed_no_channel: state.suppressed.no_channel,
            tracked_alert_ids: state.recent.len(),
        }
    }

    /// Admitted alerts since `since`, oldest first.
    pub fn history_since(&self, since: DateTime<Utc>) -> Vec<AlertRecord> {
        let state = self.state.lock().unwrap();
        state
            .history
            .iter()
            .filter(|record| record.sent_at >= since)
            .cloned()
            .collect()
    }
}
