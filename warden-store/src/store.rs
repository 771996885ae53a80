//! The durable incident, event, and alert ledger.
//!
//! Every operation opens its own connection on the blocking pool, so
//! concurrent in-process callers coordinate through SQLite's WAL locking
//! instead of a process-wide lock. Writes that read current state first
//! (status transitions, timeline appends) run inside a transaction. Lock
//! contention is retried with exponential backoff up to a configured cap;
//! every other error propagates immediately.

use crate::schema;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_core::alerting::Alert;
use warden_core::config::StoreConfig;
use warden_core::error::{Result, StoreError, WardenError};
use warden_core::types::{
    Confidence, Incident, IncidentStatus, ProcessSignal, ResponseAction, ThreatAssessment,
    ThreatType, TimelineEntry,
};

/// Field length caps applied before an event row is written.
const MAX_NAME_LEN: usize = 255;
const MAX_CMDLINE_LEN: usize = 2048;
const MAX_USERNAME_LEN: usize = 100;

const INCIDENT_COLUMNS: &str = "incident_id, created_at, process_name, process_pid, \
     threat_score, threat_type, status, ai_analyzed, ai_confidence, ai_reasoning, \
     ai_model, action_taken, action_result, action_timestamp, verified, \
     verification_timestamp, nas_activity, timeline, post_incident_analysis, \
     closed_timestamp";

/// Handle to the SQLite ledger. Cheap to clone and share across tasks.
#[derive(Clone)]
pub struct IncidentStore {
    path: PathBuf,
    busy_timeout_ms: u64,
    max_retries: u32,
    retry_base: Duration,
}

impl IncidentStore {
    /// Open the ledger at `path`, creating the file and schema if needed.
    pub async fn open(path: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = Self {
            path,
            busy_timeout_ms: config.busy_timeout_ms,
            max_retries: config.max_retries.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
        };
        store
            .run("init_schema", |conn| {
                conn.execute_batch(schema::SCHEMA).map_err(sql_err)
            })
            .await?;
        info!(path = %store.path.display(), "Incident store ready");
        Ok(store)
    }

    /// Open a new incident for an assessed signal and persist it.
    pub async fn create_incident(
        &self,
        signal: &ProcessSignal,
        assessment: &ThreatAssessment,
        nas_activity: bool,
    ) -> Result<Incident> {
        if signal.name.trim().is_empty() {
            return Err(StoreError::Validation {
                message: "process name must not be empty".to_string(),
            }
            .into());
        }
        let incident = Incident::open(signal, assessment).with_nas_activity(nas_activity);
        let row = incident.clone();
        let timeline_json = timeline_to_json(&row.timeline)?;

        self.run("create_incident", move |conn| {
            conn.execute(
                "INSERT INTO incidents (incident_id, created_at, process_name, process_pid, \
                     threat_score, threat_type, status, ai_analyzed, ai_confidence, \
                     ai_reasoning, ai_model, nas_activity, timeline) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    row.incident_id,
                    row.created_at.to_rfc3339(),
                    row.process_name,
                    row.process_pid,
                    row.threat_score,
                    row.threat_type.to_string(),
                    row.status.as_str(),
                    row.ai_analyzed,
                    row.ai_confidence.map(|c| c.to_string()),
                    row.ai_reasoning,
                    row.ai_model,
                    row.nas_activity,
                    timeline_json,
                ],
            )
            .map_err(sql_err)?;
            Ok(())
        })
        .await?;

        debug!(
            incident_id = %incident.incident_id,
            process = %incident.process_name,
            score = incident.threat_score,
            "Incident created"
        );
        Ok(incident)
    }

    /// Advance an incident's status, appending the matching timeline entry.
    /// Falls back to "Status changed to {status}" when no details are given.
    pub async fn update_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        details: Option<String>,
    ) -> Result<()> {
        let id = incident_id.to_string();
        self.run("update_status", move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let (current, mut timeline) = load_status_and_timeline(&tx, &id)?;
            if !current.can_advance_to(status) {
                return Err(StoreError::InvalidTransition {
                    incident_id: id.clone(),
                    from: current.as_str().to_string(),
                    to: status.as_str().to_string(),
                });
            }
            let entry_details = details
                .clone()
                .unwrap_or_else(|| format!("Status changed to {status}"));
            timeline.push(TimelineEntry::now(status.as_str(), entry_details));
            let timeline_json = timeline_to_json(&timeline)?;
            tx.execute(
                "UPDATE incidents SET status = ?1, timeline = ?2 WHERE incident_id = ?3",
                params![status.as_str(), timeline_json, id],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    /// Record the executed action and its outcome; the incident moves to
    /// responded. Failed actions arrive here with a "FAILED: " result prefix.
    pub async fn record_action(
        &self,
        incident_id: &str,
        action: ResponseAction,
        result: &str,
    ) -> Result<()> {
        let id = incident_id.to_string();
        let result = result.to_string();
        self.run("record_action", move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let (current, mut timeline) = load_status_and_timeline(&tx, &id)?;
            let next = IncidentStatus::Responded;
            if !current.can_advance_to(next) {
                return Err(StoreError::InvalidTransition {
                    incident_id: id.clone(),
                    from: current.as_str().to_string(),
                    to: next.as_str().to_string(),
                });
            }
            timeline.push(TimelineEntry::now(
                next.as_str(),
                format!("Action: {action} - {result}"),
            ));
            let timeline_json = timeline_to_json(&timeline)?;
            tx.execute(
                "UPDATE incidents SET status = ?1, action_taken = ?2, action_result = ?3, \
                     action_timestamp = ?4, timeline = ?5 \
                 WHERE incident_id = ?6",
                params![
                    next.as_str(),
                    action.to_string(),
                    result,
                    Utc::now().to_rfc3339(),
                    timeline_json,
                    id,
                ],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    /// Record the verification outcome. Success advances to verified;
    /// failure keeps the current status and only marks `verified = false`.
    pub async fn record_verification(&self, incident_id: &str, verified: bool) -> Result<()> {
        let id = incident_id.to_string();
        self.run("record_verification", move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let (current, mut timeline) = load_status_and_timeline(&tx, &id)?;

            let (next, event, details) = if verified {
                let next = IncidentStatus::Verified;
                if !current.can_advance_to(next) {
                    return Err(StoreError::InvalidTransition {
                        incident_id: id.clone(),
                        from: current.as_str().to_string(),
                        to: next.as_str().to_string(),
                    });
                }
                (Some(next), "verified", "Threat successfully eliminated")
            } else {
                (
                    None,
                    "verification_failed",
                    "Verification failed - threat may persist",
                )
            };

            timeline.push(TimelineEntry::now(event, details));
            let timeline_json = timeline_to_json(&timeline)?;
            let status_text = next.map_or(current.as_str(), IncidentStatus::as_str);
            tx.execute(
                "UPDATE incidents SET status = ?1, verified = ?2, \
                     verification_timestamp = ?3, timeline = ?4 \
                 WHERE incident_id = ?5",
                params![
                    status_text,
                    verified,
                    Utc::now().to_rfc3339(),
                    timeline_json,
                    id,
                ],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    /// Close an incident, optionally attaching a post-incident analysis.
    pub async fn close_incident(&self, incident_id: &str, analysis: Option<String>) -> Result<()> {
        let id = incident_id.to_string();
        self.run("close_incident", move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            let (current, mut timeline) = load_status_and_timeline(&tx, &id)?;
            let next = IncidentStatus::Closed;
            if !current.can_advance_to(next) {
                return Err(StoreError::InvalidTransition {
                    incident_id: id.clone(),
                    from: current.as_str().to_string(),
                    to: next.as_str().to_string(),
                });
            }
            timeline.push(TimelineEntry::now(
                next.as_str(),
                "Incident resolved and closed",
            ));
            let timeline_json = timeline_to_json(&timeline)?;
            tx.execute(
                "UPDATE incidents SET status = ?1, closed_timestamp = ?2, \
                     post_incident_analysis = ?3, timeline = ?4 \
                 WHERE incident_id = ?5",
                params![
                    next.as_str(),
                    Utc::now().to_rfc3339(),
                    analysis,
                    timeline_json,
                    id,
                ],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    pub async fn get_incident(&self, incident_id: &str) -> Result<Incident> {
        let id = incident_id.to_string();
        self.run("get_incident", move |conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE incident_id = ?1"),
                    params![id],
                    RawIncident::from_row,
                )
                .optional()
                .map_err(sql_err)?
                .ok_or_else(|| StoreError::NotFound {
                    incident_id: id.clone(),
                })?;
            raw.into_incident()
        })
        .await
    }

    /// All incidents not yet closed, newest first.
    pub async fn active_incidents(&self) -> Result<Vec<Incident>> {
        self.run("active_incidents", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {INCIDENT_COLUMNS} FROM incidents \
                     WHERE status != 'closed' ORDER BY created_at DESC"
                ))
                .map_err(sql_err)?;
            let raws = stmt
                .query_map([], RawIncident::from_row)
                .map_err(sql_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_err)?;
            raws.into_iter().map(RawIncident::into_incident).collect()
        })
        .await
    }

    pub async fn counts_by_status(&self) -> Result<HashMap<IncidentStatus, u32>> {
        self.run("counts_by_status", |conn| {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM incidents GROUP BY status")
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
                })
                .map_err(sql_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_err)?;

            let mut counts = HashMap::new();
            for (status_text, count) in rows {
                let status =
                    IncidentStatus::parse(&status_text).ok_or_else(|| StoreError::Validation {
                        message: format!("unknown status '{status_text}' in store"),
                    })?;
                counts.insert(status, count);
            }
            Ok(counts)
        })
        .await
    }

    /// Append a raw process observation. Oversized text fields are clamped
    /// to the column caps rather than rejected.
    pub async fn record_event(&self, signal: &ProcessSignal) -> Result<()> {
        let signal = signal.clone();
        self.run("record_event", move |conn| {
            conn.execute(
                "INSERT INTO process_events (observed_at, pid, name, cmdline, parent_name, \
                     username, cpu_percent, memory_mb, connections_count, num_threads, rule_score) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    signal.observed_at.to_rfc3339(),
                    signal.pid,
                    clamp_chars(&signal.name, MAX_NAME_LEN),
                    clamp_chars(&signal.cmdline, MAX_CMDLINE_LEN),
                    clamp_chars(&signal.parent_name, MAX_NAME_LEN),
                    clamp_chars(&signal.username, MAX_USERNAME_LEN),
                    signal.cpu_percent as f64,
                    signal.memory_mb as f64,
                    signal.connections_count,
                    signal.num_threads,
                    signal.rule_score.min(100),
                ],
            )
            .map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    /// Append one line of alert history, admitted or suppressed.
    pub async fn record_alert(
        &self,
        alert: &Alert,
        admitted: bool,
        channels: &[String],
    ) -> Result<()> {
        let alert = alert.clone();
        let channels_json =
            serde_json::to_string(channels).map_err(|e| StoreError::Validation {
                message: format!("channel list not serializable: {e}"),
            })?;
        self.run("record_alert", move |conn| {
            conn.execute(
                "INSERT INTO alerts (alert_id, created_at, title, message, priority, \
                     severity, source, admitted, channels) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    alert.alert_id,
                    alert.created_at.to_rfc3339(),
                    alert.title,
                    alert.message,
                    alert.priority.to_string(),
                    alert.severity.to_string(),
                    alert.source,
                    admitted,
                    channels_json,
                ],
            )
            .map_err(sql_err)?;
            Ok(())
        })
        .await
    }

    /// Delete raw events observed before `cutoff`; returns the rows removed.
    pub async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_text = cutoff.to_rfc3339();
        let removed = self
            .run("prune_events", move |conn| {
                conn.execute(
                    "DELETE FROM process_events WHERE observed_at < ?1",
                    params![cutoff_text],
                )
                .map_err(sql_err)
            })
            .await?;
        if removed > 0 {
            debug!(removed, "Pruned old process events");
        }
        Ok(removed)
    }

    async fn run<T, F>(&self, label: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        let outcome = tokio::task::spawn_blocking(move || store.run_blocking(label, op))
            .await
            .map_err(|e| StoreError::Background {
                message: e.to_string(),
            })?;
        outcome.map_err(WardenError::from)
    }

    fn run_blocking<T, F>(&self, label: &str, op: F) -> std::result::Result<T, StoreError>
    where
        F: Fn(&mut Connection) -> std::result::Result<T, StoreError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = schema::open_connection(&self.path, self.busy_timeout_ms)
                .map_err(sql_err)
                .and_then(|mut conn| op(&mut conn));
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    if attempt >= self.max_retries {
                        warn!(label, attempts = attempt, "Store locked, giving up");
                        return Err(StoreError::RetriesExhausted { attempts: attempt });
                    }
                    let delay = self.retry_base * 2u32.pow(attempt - 1);
                    debug!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Store locked, backing off"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Bridge rusqlite failures into the store error taxonomy. Only lock and
/// busy conditions become the retryable `Locked` class.
fn sql_err(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, ref message) = e
        && matches!(
            inner.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    {
        return StoreError::Locked {
            message: message
                .clone()
                .unwrap_or_else(|| "database is locked".to_string()),
        };
    }
    StoreError::Query {
        message: e.to_string(),
    }
}

fn timeline_to_json(timeline: &[TimelineEntry]) -> std::result::Result<String, StoreError> {
    serde_json::to_string(timeline).map_err(|e| StoreError::Validation {
        message: format!("timeline not serializable: {e}"),
    })
}

fn timeline_from_json(json: &str) -> std::result::Result<Vec<TimelineEntry>, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Validation {
        message: format!("stored timeline is corrupt: {e}"),
    })
}

fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Validation {
            message: format!("bad stored timestamp '{text}': {e}"),
        })
}

fn load_status_and_timeline(
    conn: &Connection,
    incident_id: &str,
) -> std::result::Result<(IncidentStatus, Vec<TimelineEntry>), StoreError> {
    let row = conn
        .query_row(
            "SELECT status, timeline FROM incidents WHERE incident_id = ?1",
            params![incident_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(sql_err)?
        .ok_or_else(|| StoreError::NotFound {
            incident_id: incident_id.to_string(),
        })?;
    let status = IncidentStatus::parse(&row.0).ok_or_else(|| StoreError::Validation {
        message: format!("unknown status '{}' in store", row.0),
    })?;
    let timeline = timeline_from_json(&row.1)?;
    Ok((status, timeline))
}

fn clamp_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Column values exactly as stored, before enum and timestamp parsing.
struct RawIncident {
    incident_id: String,
    created_at: String,
    process_name: String,
    process_pid: u32,
    threat_score: u8,
    threat_type: String,
    status: String,
    ai_analyzed: bool,
    ai_confidence: Option<String>,
    ai_reasoning: Option<String>,
    ai_model: Option<String>,
    action_taken: Option<String>,
    action_result: Option<String>,
    action_timestamp: Option<String>,
    verified: Option<bool>,
    verification_timestamp: Option<String>,
    nas_activity: bool,
    timeline: String,
    post_incident_analysis: Option<String>,
    closed_timestamp: Option<String>,
}

impl RawIncident {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            incident_id: row.get(0)?,
            created_at: row.get(1)?,
            process_name: row.get(2)?,
            process_pid: row.get(3)?,
            threat_score: row.get(4)?,
            threat_type: row.get(5)?,
            status: row.get(6)?,
            ai_analyzed: row.get(7)?,
            ai_confidence: row.get(8)?,
            ai_reasoning: row.get(9)?,
            ai_model: row.get(10)?,
            action_taken: row.get(11)?,
            action_result: row.get(12)?,
            action_timestamp: row.get(13)?,
            verified: row.get(14)?,
            verification_timestamp: row.get(15)?,
            nas_activity: row.get(16)?,
            timeline: row.get(17)?,
            post_incident_analysis: row.get(18)?,
            closed_timestamp: row.get(19)?,
        })
    }

    fn into_incident(self) -> std::result::Result<Incident, StoreError> {
        let bad_enum = |field: &str, value: &str| StoreError::Validation {
            message: format!("unknown {field} '{value}' in store"),
        };

        let threat_type =
            ThreatType::parse(&self.threat_type).ok_or_else(|| bad_enum("threat_type", &self.threat_type))?;
        let status =
            IncidentStatus::parse(&self.status).ok_or_else(|| bad_enum("status", &self.status))?;
        let ai_confidence = self
            .ai_confidence
            .as_deref()
            .map(|c| Confidence::parse(c).ok_or_else(|| bad_enum("confidence", c)))
            .transpose()?;
        let action_taken = self
            .action_taken
            .as_deref()
            .map(|a| ResponseAction::parse(a).ok_or_else(|| bad_enum("action", a)))
            .transpose()?;

        Ok(Incident {
            incident_id: self.incident_id,
            created_at: parse_timestamp(&self.created_at)?,
            process_name: self.process_name,
            process_pid: self.process_pid,
            threat_score: self.threat_score,
            threat_type,
            status,
            ai_analyzed: self.ai_analyzed,
            ai_confidence,
            ai_reasoning: self.ai_reasoning,
            ai_model: self.ai_model,
            action_taken,
            action_result: self.action_result,
            action_timestamp: self
                .action_timestamp
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            verified: self.verified,
            verification_timestamp: self
                .verification_timestamp
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            nas_activity: self.nas_activity,
            timeline: timeline_from_json(&self.timeline)?,
            post_incident_analysis: self.post_incident_analysis,
            closed_timestamp: self
                .closed_timestamp
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}
