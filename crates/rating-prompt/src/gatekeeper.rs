//! Pure gate decision: given a state and the current time, is a rating
//! prompt due?

use chrono::{DateTime, Duration, Utc};
use engage_core::config::RatingPromptConfig;
use serde::{Deserialize, Serialize};

use crate::state::RatingPromptState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    Completed,
    DeclineCooldown,
    PromptCooldown,
    TooFewActions { have: usize, need: usize },
    TooFewRecentActions { have: usize, need: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    PromptDue,
    Blocked(BlockReason),
}

impl GateDecision {
    pub fn is_due(&self) -> bool {
        matches!(self, GateDecision::PromptDue)
    }
}

/// Checks run in order; the first failing one is reported.
pub fn evaluate(
    state: &RatingPromptState,
    now: DateTime<Utc>,
    config: &RatingPromptConfig,
) -> GateDecision {
    if state.completed {
        return GateDecision::Blocked(BlockReason::Completed);
    }
    if state.declined_within(now, Duration::days(config.min_days_after_decline)) {
        return GateDecision::Blocked(BlockReason::DeclineCooldown);
    }
    if state.prompted_within(now, Duration::days(config.min_days_between_prompts)) {
        return GateDecision::Blocked(BlockReason::PromptCooldown);
    }

    let total = state.positive_action_log.len();
    if total < config.min_positive_actions {
        return GateDecision::Blocked(BlockReason::TooFewActions {
            have: total,
            need: config.min_positive_actions,
        });
    }

    let recent = state.recent_actions(now, Duration::days(config.recent_window_days));
    if recent < config.min_recent_actions {
        return GateDecision::Blocked(BlockReason::TooFewRecentActions {
            have: recent,
            need: config.min_recent_actions,
        });
    }

    GateDecision::PromptDue
}
