use std::collections::HashMap;

use serde::Deserialize;

use crate::event::EventKind;
use crate::retry::RetryPolicy;

/// Root engine configuration. Loaded from environment variables with the
/// prefix `VENUE_ENGAGE__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngageConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub personalization: PersonalizationConfig,
    #[serde(default)]
    pub rating_prompt: RatingPromptConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ─── Ledger Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Events retained per user; oldest are evicted first.
    #[serde(default = "default_retention_cap")]
    pub retention_cap: usize,
}

fn default_retention_cap() -> usize {
    1000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_cap: default_retention_cap(),
        }
    }
}

// ─── Rewards Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RewardsConfig {
    /// Points per event type, keyed by the snake_case event name.
    #[serde(default = "default_point_values")]
    pub point_values: HashMap<String, u32>,
    #[serde(default = "default_leaderboard_scan_cap")]
    pub leaderboard_scan_cap: usize,
    #[serde(default = "default_leaderboard_cache_ttl_secs")]
    pub leaderboard_cache_ttl_secs: u64,
    /// Ledger window evaluated by unlock conditions.
    #[serde(default = "default_condition_window")]
    pub condition_window: usize,
    #[serde(default = "RetryPolicy::once_immediate")]
    pub write_retry: RetryPolicy,
}

fn default_point_values() -> HashMap<String, u32> {
    [
        (EventKind::BookEvent, 50),
        (EventKind::BookService, 30),
        (EventKind::OrderCompleted, 20),
        (EventKind::ReviewSubmitted, 15),
        (EventKind::ShareApp, 10),
        (EventKind::ProfileCompleted, 25),
        (EventKind::Referral, 50),
        (EventKind::DailyLogin, 5),
        (EventKind::WeeklyActive, 25),
    ]
    .into_iter()
    .map(|(kind, points)| (kind.as_str().to_string(), points))
    .collect()
}
fn default_leaderboard_scan_cap() -> usize {
    10_000
}
fn default_leaderboard_cache_ttl_secs() -> u64 {
    3600
}
fn default_condition_window() -> usize {
    1000
}

impl RewardsConfig {
    /// Points for one event type; zero when the type is not in the table.
    pub fn points_for(&self, kind: EventKind) -> u32 {
        self.point_values.get(kind.as_str()).copied().unwrap_or(0)
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            point_values: default_point_values(),
            leaderboard_scan_cap: default_leaderboard_scan_cap(),
            leaderboard_cache_ttl_secs: default_leaderboard_cache_ttl_secs(),
            condition_window: default_condition_window(),
            write_retry: RetryPolicy::once_immediate(),
        }
    }
}

// ─── Personalization Config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PersonalizationConfig {
    #[serde(default = "default_top_categories")]
    pub top_categories: usize,
    #[serde(default = "default_top_viewed_items")]
    pub top_viewed_items: usize,
    /// Ledger events folded into a profile.
    #[serde(default = "default_profile_window")]
    pub profile_window: usize,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_profile_cache_ttl_secs")]
    pub profile_cache_ttl_secs: u64,
    #[serde(default = "default_max_cached_profiles")]
    pub max_cached_profiles: usize,
}

fn default_top_categories() -> usize {
    5
}
fn default_top_viewed_items() -> usize {
    10
}
fn default_profile_window() -> usize {
    1000
}
fn default_max_candidates() -> usize {
    500
}
fn default_profile_cache_ttl_secs() -> u64 {
    3600
}
fn default_max_cached_profiles() -> usize {
    100_000
}

impl Default for PersonalizationConfig {
    fn default() -> Self {
        Self {
            top_categories: default_top_categories(),
            top_viewed_items: default_top_viewed_items(),
            profile_window: default_profile_window(),
            max_candidates: default_max_candidates(),
            profile_cache_ttl_secs: default_profile_cache_ttl_secs(),
            max_cached_profiles: default_max_cached_profiles(),
        }
    }
}

// ─── Rating Prompt Config ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RatingPromptConfig {
    #[serde(default = "default_min_positive_actions")]
    pub min_positive_actions: usize,
    #[serde(default = "default_min_recent_actions")]
    pub min_recent_actions: usize,
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: i64,
    #[serde(default = "default_min_days_between_prompts")]
    pub min_days_between_prompts: i64,
    #[serde(default = "default_min_days_after_decline")]
    pub min_days_after_decline: i64,
    #[serde(default = "default_action_log_cap")]
    pub action_log_cap: usize,
}

fn default_min_positive_actions() -> usize {
    3
}
fn default_min_recent_actions() -> usize {
    2
}
fn default_recent_window_days() -> i64 {
    7
}
fn default_min_days_between_prompts() -> i64 {
    30
}
fn default_min_days_after_decline() -> i64 {
    60
}
fn default_action_log_cap() -> usize {
    50
}

impl Default for RatingPromptConfig {
    fn default() -> Self {
        Self {
            min_positive_actions: default_min_positive_actions(),
            min_recent_actions: default_min_recent_actions(),
            recent_window_days: default_recent_window_days(),
            min_days_between_prompts: default_min_days_between_prompts(),
            min_days_after_decline: default_min_days_after_decline(),
            action_log_cap: default_action_log_cap(),
        }
    }
}

// ─── Hub Config ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    /// Retry policy for post-action side effects.
    #[serde(default)]
    pub side_effect_retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl Default for EngageConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            rewards: RewardsConfig::default(),
            personalization: PersonalizationConfig::default(),
            rating_prompt: RatingPromptConfig::default(),
            hub: HubConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl EngageConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("VENUE_ENGAGE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.ledger.retention_cap == 0 {
            return Err(config::ConfigError::Message(
                "ledger.retention_cap must be positive".into(),
            ));
        }
        if self.rewards.leaderboard_cache_ttl_secs > 3600
            || self.personalization.profile_cache_ttl_secs > 3600
        {
            return Err(config::ConfigError::Message(
                "derived-data cache TTLs must not exceed one hour".into(),
            ));
        }
        for key in self.rewards.point_values.keys() {
            if key.parse::<EventKind>().is_err() {
                return Err(config::ConfigError::Message(format!(
                    "rewards.point_values has unknown event type '{key}'"
                )));
            }
        }
        Ok(())
    }
}
