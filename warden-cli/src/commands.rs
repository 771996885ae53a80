//! CLI subcommand handlers.

use crate::daemon::Daemon;
use crate::source::{JsonlSource, SignalSource};
use crate::{Commands, ConfigAction};
use std::path::Path;
use warden_core::config::{WardenConfig, default_store_path, load_config};
use warden_store::IncidentStore;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            feed,
            interval,
            max_cycles,
        } => handle_run(workspace, &feed, interval, max_cycles).await,
        Commands::Incidents => handle_incidents(workspace).await,
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

async fn handle_run(
    workspace: &Path,
    feed: &str,
    interval: Option<u64>,
    max_cycles: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = load_workspace_config(workspace)?;
    if let Some(secs) = interval {
        config.daemon.cycle_interval_secs = secs;
    }

    let source: Box<dyn SignalSource> = if feed == "-" {
        Box::new(JsonlSource::from_stdin())
    } else {
        Box::new(JsonlSource::from_path(Path::new(feed)).await?)
    };

    let daemon = Daemon::from_config(config).await?;
    daemon.run(source, max_cycles).await
}

async fn handle_incidents(workspace: &Path) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace)?;
    let store_path = config
        .store
        .path
        .clone()
        .unwrap_or_else(default_store_path);
    let store = IncidentStore::open(&store_path, &config.store).await?;

    let incidents = store.active_incidents().await?;
    if incidents.is_empty() {
        println!("No active incidents.");
        return Ok(());
    }

    println!("Active incidents ({}):", incidents.len());
    for incident in &incidents {
        let action = incident
            .action_taken
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:<10}  {} (pid {})  score {:>3}  {:<8}  {}",
            incident.incident_id,
            incident.status.to_string(),
            incident.process_name,
            incident.process_pid,
            incident.threat_score,
            action,
            incident.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".warden");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = WardenConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_workspace_config(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn load_workspace_config(workspace: &Path) -> anyhow::Result<WardenConfig> {
    load_config(Some(workspace)).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}
