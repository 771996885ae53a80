//! Configuration system for Warden.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config -> environment. Configuration is loaded from
//! `~/.config/warden/config.toml` and/or `.warden/config.toml` in the working
//! directory, with `WARDEN_`-prefixed environment variables on top.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::alerting::AlertSeverity;
use crate::error::ConfigError;

/// Top-level configuration for the Warden agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    pub thresholds: ThresholdConfig,
    pub response: ResponseConfig,
    pub brain: BrainConfig,
    pub nas: NasGuardConfig,
    pub alerting: AlertingConfig,
    pub store: StoreConfig,
    pub daemon: DaemonConfig,
}

impl WardenConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if !(t.medium <= t.high && t.high <= t.critical) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "thresholds must be ordered medium <= high <= critical, got {}/{}/{}",
                    t.medium, t.high, t.critical
                ),
            });
        }
        if t.critical > 100 {
            return Err(ConfigError::Invalid {
                message: format!("critical threshold {} exceeds 100", t.critical),
            });
        }
        let a = &self.alerting;
        if a.quiet_hours_start > 23 || a.quiet_hours_end > 23 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "quiet hours must be 0-23, got start={} end={}",
                    a.quiet_hours_start, a.quiet_hours_end
                ),
            });
        }
        if self.response.escalation_threshold > 100 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "escalation threshold {} exceeds 100",
                    self.response.escalation_threshold
                ),
            });
        }
        Ok(())
    }
}

/// Score thresholds driving the decision ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub critical: u8,
    pub high: u8,
    pub medium: u8,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            critical: 85,
            high: 70,
            medium: 50,
        }
    }
}

/// Response pipeline behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// When true (the default), destructive actions are simulated.
    pub dry_run: bool,
    /// Process names never acted on.
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Allow the AI decision contract to pick actions at high scores.
    pub enable_ai_decisions: bool,
    /// Allow the AI to override the default kill at critical scores.
    pub ai_override_at_critical: bool,
    /// How long a monitoring session may run before closing quietly.
    pub monitor_max_duration_secs: u64,
    /// Re-evaluated score at which a monitored process is escalated to kill.
    pub escalation_threshold: u8,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            whitelist: Vec::new(),
            enable_ai_decisions: true,
            ai_override_at_critical: true,
            monitor_max_duration_secs: 60,
            escalation_threshold: 80,
        }
    }
}

/// AI backend (Ollama) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Master switch; when false every evaluation is rule-based.
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    /// Let the AI compose alert bodies (template fallback otherwise).
    pub enable_alert_composition: bool,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:14b".to_string(),
            timeout_secs: 30,
            temperature: 0.2,
            enable_alert_composition: true,
        }
    }
}

/// Protected-NAS ransomware guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NasGuardConfig {
    pub enabled: bool,
    /// IP of the protected share; empty disables the shipped heuristic.
    #[serde(default)]
    pub nas_ip: String,
    /// Minimum live connections before cmdline evidence counts.
    pub min_connections: u32,
}

impl Default for NasGuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nas_ip: String::new(),
            min_connections: 1,
        }
    }
}

/// Alert admission gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub dedup_window_secs: u64,
    pub quiet_hours_enabled: bool,
    /// Quiet window `[start, end)`; may wrap past midnight.
    pub quiet_hours_start: u8,
    pub quiet_hours_end: u8,
    /// Optional outbound webhook channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookChannelConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            max_per_hour: 20,
            max_per_day: 100,
            dedup_window_secs: 300,
            quiet_hours_enabled: true,
            quiet_hours_start: 23,
            quiet_hours_end: 7,
            webhook: None,
        }
    }
}

/// Outbound webhook channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookChannelConfig {
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub critical_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<AlertSeverity>,
}

/// Incident store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; `None` resolves under the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    /// Attempts for lock-contended writes.
    pub max_retries: u32,
    /// Base backoff, doubled per attempt.
    pub retry_base_ms: u64,
    /// Raw process events older than this are pruned by maintenance.
    pub prune_events_after_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
            max_retries: 3,
            retry_base_ms: 100,
            prune_events_after_days: 30,
        }
    }
}

/// Collection-cycle daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub cycle_interval_secs: u64,
    /// Consecutive failed cycles before the daemon stops itself.
    pub max_consecutive_failures: u32,
    /// Emit a status summary every N cycles.
    pub status_every_cycles: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 30,
            max_consecutive_failures: 5,
            status_every_cycles: 100,
        }
    }
}

/// Load configuration with figment layering.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `WARDEN_`, `__` as separator)
/// 2. Workspace config (`.warden/config.toml`)
/// 3. User config (`~/.config/warden/config.toml`)
/// 4. Built-in defaults
pub fn load_config(workspace: Option<&Path>) -> Result<WardenConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(WardenConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "warden", "warden") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".warden").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // WARDEN_THRESHOLDS__CRITICAL, WARDEN_BRAIN__MODEL, etc.
    figment = figment.merge(Env::prefixed("WARDEN_").split("__"));

    let config: WardenConfig = figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Default database location under the platform data dir.
pub fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "warden", "warden")
        .map(|dirs| dirs.data_dir().join("warden.db"))
        .unwrap_or_else(|| PathBuf::from("warden.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_constants() {
        let config = WardenConfig::default();
        assert_eq!(config.thresholds.critical, 85);
        assert_eq!(config.thresholds.high, 70);
        assert_eq!(config.thresholds.medium, 50);
        assert_eq!(config.response.escalation_threshold, 80);
        assert_eq!(config.response.monitor_max_duration_secs, 60);
        assert_eq!(config.alerting.max_per_hour, 20);
        assert_eq!(config.alerting.max_per_day, 100);
        assert_eq!(config.alerting.dedup_window_secs, 300);
        assert_eq!(config.alerting.quiet_hours_start, 23);
        assert_eq!(config.alerting.quiet_hours_end, 7);
        assert_eq!(config.brain.timeout_secs, 30);
        assert_eq!(config.store.max_retries, 3);
        assert!(config.response.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unordered_thresholds() {
        let mut config = WardenConfig::default();
        config.thresholds.high = 90;
        config.thresholds.critical = 80;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ordered"));
    }

    #[test]
    fn test_validate_rejects_bad_quiet_hours() {
        let mut config = WardenConfig::default();
        config.alerting.quiet_hours_start = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_workspace_config_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let warden_dir = dir.path().join(".warden");
        std::fs::create_dir_all(&warden_dir).unwrap();
        std::fs::write(
            warden_dir.join("config.toml"),
            "[thresholds]\ncritical = 95\n\n[response]\ndry_run = false\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.thresholds.critical, 95);
        assert!(!config.response.dry_run);
        // Untouched sections keep their defaults.
        assert_eq!(config.thresholds.medium, 50);
        assert_eq!(config.alerting.max_per_hour, 20);
    }

    #[test]
    fn test_missing_workspace_config_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.thresholds.critical, 85);
    }
}
