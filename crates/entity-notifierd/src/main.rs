//! Entity notifier daemon.
//!
//! Reads newline-delimited JSON announcements from stdin, one
//! `{"entity": {...}, "servers": [...]}` object per line, and schedules each
//! through the deployment orchestrator. At end of input or on Ctrl-C it
//! drains in-flight jobs and flushes metrics.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use entity_notifier_core::{
    build_components, init_tracing, DeployableEntity, Deployer, EnvConfig, JobQueue, LogFormat,
    NotifierConfig,
};

#[derive(Parser, Debug)]
#[command(name = "entity-notifierd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Download announced entities and publish deployment notifications", long_about = None)]
struct Cli {
    /// Log line format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Extra dotenv file, loaded before `.env` and `.env.default`
    #[arg(long)]
    env_file: Option<PathBuf>,
}

/// One announcement line.
#[derive(Debug, Deserialize)]
struct Announcement {
    entity: DeployableEntity,
    #[serde(default)]
    servers: Vec<String>,
}

/// Blank lines are skipped.
fn parse_announcement(line: &str) -> Result<Option<Announcement>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let announcement = serde_json::from_str(line).context("malformed announcement")?;
    Ok(Some(announcement))
}

/// Variables already set in the environment win over every file; earlier
/// files win over later ones.
fn load_env_files(extra: Option<&Path>) {
    if let Some(path) = extra {
        if let Err(e) = dotenvy::from_path(path) {
            eprintln!("failed to load {}: {e}", path.display());
        }
    }
    for file in [".env", ".env.default"] {
        let _ = dotenvy::from_filename(file);
    }
}

fn with_logging_callback(entity: DeployableEntity) -> DeployableEntity {
    let entity_id = entity.entity_id.clone();
    entity.with_mark_as_deployed(move || {
        let entity_id = entity_id.clone();
        async move {
            info!(%entity_id, "entity marked as deployed");
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    load_env_files(cli.env_file.as_deref());
    init_tracing(cli.log_format, cli.log_level);

    let config = NotifierConfig::load(&EnvConfig).context("invalid configuration")?;
    let components = build_components(config).await?;
    let deployer = &components.deployer;

    info!(version = entity_notifier_core::VERSION, "entity-notifierd started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read announcements")? else {
                    info!("end of announcements");
                    break;
                };
                match parse_announcement(&line) {
                    Ok(Some(announcement)) => {
                        deployer
                            .schedule_entity_deployment(
                                with_logging_callback(announcement.entity),
                                announcement.servers,
                            )
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "skipping announcement"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    info!(in_flight = components.queue.size(), "draining download queue");
    deployer.on_idle().await;
    components.metrics.flush();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_announcement_line() {
        let line = r#"{"entity":{"entityId":"bafy1","entityType":"scene","pointers":["0,0"],"entityTimestamp":1700000000000},"servers":["https://peer.example/content"]}"#;
        let announcement = parse_announcement(line).unwrap().unwrap();
        assert_eq!(announcement.entity.entity_id, "bafy1");
        assert_eq!(announcement.servers, vec!["https://peer.example/content"]);
        assert!(announcement.entity.mark_as_deployed.is_none());
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(parse_announcement("   ").unwrap().is_none());
    }

    #[test]
    fn garbage_is_an_error() {
        let err = parse_announcement("{not json").unwrap_err();
        assert!(err.to_string().contains("malformed announcement"));
    }

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["entity-notifierd"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(cli.log_level, Level::INFO);
        assert!(cli.env_file.is_none());
    }

    #[tokio::test]
    async fn logging_callback_is_attached() {
        let entity = with_logging_callback(DeployableEntity::new("bafy2", "emote", vec![], 0));
        let callback = entity.mark_as_deployed.clone().unwrap();
        callback().await;
    }
}
