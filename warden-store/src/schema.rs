//! SQLite schema and connection setup for the Warden ledger.
//!
//! Three tables mirror the pipeline's persisted surface: `incidents` (one row
//! per detected threat, lifecycle fields plus the JSON timeline), raw
//! `process_events`, and the `alerts` send/suppress history. CHECK
//! constraints keep scores, statuses, and timeline JSON valid at the
//! database layer even if a future writer skips the application checks.

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS incidents (
    incident_id            TEXT PRIMARY KEY,
    created_at             TEXT NOT NULL,
    process_name           TEXT NOT NULL,
    process_pid            INTEGER NOT NULL,
    threat_score           INTEGER NOT NULL CHECK (threat_score BETWEEN 0 AND 100),
    threat_type            TEXT NOT NULL,
    status                 TEXT NOT NULL CHECK (status IN
        ('detected', 'analyzing', 'monitoring', 'responded', 'verified', 'closed')),
    ai_analyzed            INTEGER NOT NULL DEFAULT 0,
    ai_confidence          TEXT,
    ai_reasoning           TEXT,
    ai_model               TEXT,
    action_taken           TEXT,
    action_result          TEXT,
    action_timestamp       TEXT,
    verified               INTEGER,
    verification_timestamp TEXT,
    nas_activity           INTEGER NOT NULL DEFAULT 0,
    timeline               TEXT NOT NULL CHECK (json_valid(timeline)),
    post_incident_analysis TEXT,
    closed_timestamp       TEXT
);

CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status);
CREATE INDEX IF NOT EXISTS idx_incidents_created ON incidents(created_at);

CREATE TABLE IF NOT EXISTS process_events (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    observed_at       TEXT NOT NULL,
    pid               INTEGER NOT NULL,
    name              TEXT NOT NULL,
    cmdline           TEXT NOT NULL DEFAULT '',
    parent_name       TEXT NOT NULL DEFAULT '',
    username          TEXT NOT NULL DEFAULT '',
    cpu_percent       REAL NOT NULL DEFAULT 0,
    memory_mb         REAL NOT NULL DEFAULT 0,
    connections_count INTEGER NOT NULL DEFAULT 0,
    num_threads       INTEGER NOT NULL DEFAULT 0,
    rule_score        INTEGER NOT NULL DEFAULT 0 CHECK (rule_score BETWEEN 0 AND 100)
);

CREATE INDEX IF NOT EXISTS idx_events_observed ON process_events(observed_at);

CREATE TABLE IF NOT EXISTS alerts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id   TEXT NOT NULL,
    created_at TEXT NOT NULL,
    title      TEXT NOT NULL,
    message    TEXT NOT NULL,
    priority   TEXT NOT NULL,
    severity   TEXT NOT NULL,
    source     TEXT NOT NULL,
    admitted   INTEGER NOT NULL,
    channels   TEXT NOT NULL DEFAULT '[]' CHECK (json_valid(channels))
);

CREATE INDEX IF NOT EXISTS idx_alerts_alert_id ON alerts(alert_id);
"#;

/// Open a connection with the ledger's standing pragmas. WAL keeps readers
/// and the single writer from blocking each other; the busy timeout lets
/// SQLite wait out short lock windows before surfacing a locked error.
pub(crate) fn open_connection(path: &Path, busy_timeout_ms: u64) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}
