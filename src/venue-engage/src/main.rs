//! Venue Engage: engagement and personalization engine for a venue app.
//!
//! Entry point that wires the engine to an in-memory store and drives it
//! from a recorded action log.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use engage_core::config::EngageConfig;
use engage_core::{EventPayload, ManualClock, MemoryStore};
use engage_hub::EngagementHub;
use engage_rating_prompt::PromptOutcome;
use engage_rewards::RewardCatalog;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "venue-engage")]
#[command(about = "Engagement and personalization engine for venue apps")]
#[command(version)]
struct Cli {
    /// Config file (without extension) layered under environment overrides
    #[arg(long, env = "VENUE_ENGAGE_CONFIG")]
    config: Option<String>,

    /// Serve Prometheus metrics on the configured host and port
    #[arg(long, default_value_t = false)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON-lines action log and print the resulting engagement state
    Replay {
        /// One JSON object per line: `{"user_id": .., "timestamp": .., "type": .., ...}`
        #[arg(long)]
        events: PathBuf,

        /// Leaderboard rows to print
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Print the reward catalog
    Catalog,
}

/// A line of the replay log: either a user action or the result of showing
/// a rating prompt.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayRecord {
    Outcome {
        user_id: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        outcome: PromptOutcome,
    },
    Action {
        user_id: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        #[serde(flatten)]
        payload: EventPayload,
    },
}

impl ReplayRecord {
    fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            ReplayRecord::Outcome { timestamp, .. } | ReplayRecord::Action { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "venue_engage=info,engage_hub=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = EngageConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngageConfig::default()
    });

    if cli.metrics {
        let addr = SocketAddr::new(
            config
                .metrics
                .host
                .parse()
                .context("invalid metrics host")?,
            config.metrics.port,
        );
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start metrics exporter")?;
        info!(port = config.metrics.port, "Metrics exporter started");
    }

    match cli.command {
        Command::Replay { events, top } => replay(&config, &events, top).await,
        Command::Catalog => print_catalog(),
    }
}

async fn replay(config: &EngageConfig, path: &Path, top: usize) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let hub = EngagementHub::new(
        config,
        Arc::new(RewardCatalog::standard()),
        Arc::new(MemoryStore::new()),
        clock.clone(),
    );

    let mut users = BTreeSet::new();
    let mut processed = 0usize;
    let mut skipped = 0usize;

    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: ReplayRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = idx + 1, error = %e, "Skipping unreadable record");
                skipped += 1;
                continue;
            }
        };
        if let Some(at) = record.timestamp() {
            clock.set(at);
        }

        match record {
            ReplayRecord::Outcome {
                user_id, outcome, ..
            } => match hub.rating_prompt().record_outcome(&user_id, outcome).await {
                Ok(_) => {
                    users.insert(user_id);
                    processed += 1;
                }
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "Prompt outcome rejected");
                    skipped += 1;
                }
            },
            ReplayRecord::Action {
                user_id, payload, ..
            } => match hub.on_action(&user_id, payload) {
                Ok(handle) => {
                    // Awaited in order so that timestamps replay faithfully
                    let report = handle.await.context("side effect task panicked")?;
                    if report.prompt_due() {
                        info!(user_id = %user_id, line = idx + 1, "Rating prompt would be shown");
                    }
                    users.insert(user_id);
                    processed += 1;
                }
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "Action rejected");
                    skipped += 1;
                }
            },
        }
    }

    let reconciled = hub.rewards().reconcile_pending().await;
    info!(processed, skipped, reconciled, "Replay complete");

    let mut summaries = Vec::with_capacity(users.len());
    for user_id in &users {
        let rewards = hub.rewards();
        let badges: Vec<String> = rewards
            .user_badges(user_id)
            .await?
            .into_iter()
            .map(|b| b.badge_id)
            .collect();
        let achievements: Vec<String> = rewards
            .user_achievements(user_id)
            .await?
            .into_iter()
            .map(|a| a.achievement_id)
            .collect();
        summaries.push(json!({
            "user_id": user_id,
            "points": rewards.points(user_id).await?,
            "rank": rewards.user_rank(user_id).await?,
            "badges": badges,
            "achievements": achievements,
            "prompt_phase": hub.rating_prompt().phase(user_id).await?,
        }));
    }

    let output = json!({
        "processed": processed,
        "skipped": skipped,
        "leaderboard": hub.rewards().leaderboard(top).await,
        "users": summaries,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_catalog() -> anyhow::Result<()> {
    let catalog = RewardCatalog::standard();
    let output = json!({
        "badges": catalog.badges(),
        "achievements": catalog.achievements(),
        "challenges": catalog.challenges(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
