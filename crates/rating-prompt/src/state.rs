//! Per-user rating prompt state and its lifecycle phases.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use engage_core::config::RatingPromptConfig;
use engage_core::{EngageError, EventKind};
use serde::{Deserialize, Serialize};

/// Actions that signal a satisfied user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PositiveAction {
    EventBooked,
    ServiceBooked,
    OrderCompleted,
    PaymentSuccess,
    ReviewSubmitted,
    ShareApp,
    MultipleSessions,
    FeatureUsed,
}

impl PositiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositiveAction::EventBooked => "event_booked",
            PositiveAction::ServiceBooked => "service_booked",
            PositiveAction::OrderCompleted => "order_completed",
            PositiveAction::PaymentSuccess => "payment_success",
            PositiveAction::ReviewSubmitted => "review_submitted",
            PositiveAction::ShareApp => "share_app",
            PositiveAction::MultipleSessions => "multiple_sessions",
            PositiveAction::FeatureUsed => "feature_used",
        }
    }

    /// The positive action a ledger event stands for, if any.
    pub fn from_kind(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::BookEvent => Some(PositiveAction::EventBooked),
            EventKind::BookService => Some(PositiveAction::ServiceBooked),
            EventKind::OrderCompleted => Some(PositiveAction::OrderCompleted),
            EventKind::PaymentSuccess => Some(PositiveAction::PaymentSuccess),
            EventKind::ReviewSubmitted => Some(PositiveAction::ReviewSubmitted),
            EventKind::ShareApp => Some(PositiveAction::ShareApp),
            EventKind::MultipleSessions => Some(PositiveAction::MultipleSessions),
            EventKind::FeatureUsed => Some(PositiveAction::FeatureUsed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PositiveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositiveAction {
    type Err = EngageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event_booked" => Ok(PositiveAction::EventBooked),
            "service_booked" => Ok(PositiveAction::ServiceBooked),
            "order_completed" => Ok(PositiveAction::OrderCompleted),
            "payment_success" => Ok(PositiveAction::PaymentSuccess),
            "review_submitted" => Ok(PositiveAction::ReviewSubmitted),
            "share_app" => Ok(PositiveAction::ShareApp),
            "multiple_sessions" => Ok(PositiveAction::MultipleSessions),
            "feature_used" => Ok(PositiveAction::FeatureUsed),
            other => Err(EngageError::input(format!(
                "unknown positive action '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionRecord {
    pub action: PositiveAction,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptPhase {
    Eligible,
    /// A prompt was shown inside the prompt cooldown.
    Cooling,
    /// The user declined inside the decline cooldown.
    DeclinedCooling,
    /// Terminal.
    Completed,
}

/// What the native review mechanism reported back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptOutcome {
    Shown,
    Accepted,
    Declined,
    Unavailable,
}

impl FromStr for PromptOutcome {
    type Err = EngageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shown" => Ok(PromptOutcome::Shown),
            "accepted" => Ok(PromptOutcome::Accepted),
            "declined" => Ok(PromptOutcome::Declined),
            "unavailable" => Ok(PromptOutcome::Unavailable),
            other => Err(EngageError::input(format!("unknown prompt outcome '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingPromptState {
    pub user_id: String,
    /// Oldest first.
    #[serde(default)]
    pub positive_action_log: Vec<ActionRecord>,
    #[serde(default)]
    pub last_prompt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_declined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
}

impl RatingPromptState {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            positive_action_log: Vec::new(),
            last_prompt_at: None,
            last_declined_at: None,
            completed: false,
        }
    }

    /// Append an action, dropping the oldest beyond `cap`.
    pub fn record_action(&mut self, action: PositiveAction, at: DateTime<Utc>, cap: usize) {
        self.positive_action_log.push(ActionRecord {
            action,
            timestamp: at,
        });
        let overflow = self.positive_action_log.len().saturating_sub(cap.max(1));
        if overflow > 0 {
            self.positive_action_log.drain(..overflow);
        }
    }

    /// Actions strictly inside the trailing window ending at `now`.
    pub fn recent_actions(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let since = now - window;
        self.positive_action_log
            .iter()
            .filter(|a| a.timestamp > since)
            .count()
    }

    pub fn declined_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_declined_at
            .map(|at| now - at < window)
            .unwrap_or(false)
    }

    pub fn prompted_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_prompt_at
            .map(|at| now - at < window)
            .unwrap_or(false)
    }

    pub fn phase(&self, now: DateTime<Utc>, config: &RatingPromptConfig) -> PromptPhase {
        if self.completed {
            PromptPhase::Completed
        } else if self.declined_within(now, Duration::days(config.min_days_after_decline)) {
            PromptPhase::DeclinedCooling
        } else if self.prompted_within(now, Duration::days(config.min_days_between_prompts)) {
            PromptPhase::Cooling
        } else {
            PromptPhase::Eligible
        }
    }

    /// Apply the native prompt's outcome. Completion is permanent.
    pub fn apply_outcome(&mut self, outcome: PromptOutcome, now: DateTime<Utc>) {
        if self.completed {
            return;
        }
        match outcome {
            PromptOutcome::Shown | PromptOutcome::Unavailable => {
                self.last_prompt_at.get_or_insert(now);
            }
            PromptOutcome::Declined => self.last_declined_at = Some(now),
            PromptOutcome::Accepted => self.completed = true,
        }
    }

    /// Clear prompt, decline and completion markers. The action log stays.
    pub fn reset(&mut self) {
        self.last_prompt_at = None;
        self.last_declined_at = None;
        self.completed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_action_log_is_capped() {
        let mut state = RatingPromptState::new("u1");
        for i in 0..55 {
            state.record_action(PositiveAction::ShareApp, t0() + Duration::minutes(i), 50);
        }
        assert_eq!(state.positive_action_log.len(), 50);
        assert_eq!(state.positive_action_log[0].timestamp, t0() + Duration::minutes(5));
    }

    #[test]
    fn test_phase_transitions() {
        let config = RatingPromptConfig::default();
        let mut state = RatingPromptState::new("u1");
        assert_eq!(state.phase(t0(), &config), PromptPhase::Eligible);

        state.last_prompt_at = Some(t0());
        assert_eq!(state.phase(t0() + Duration::days(29), &config), PromptPhase::Cooling);
        assert_eq!(state.phase(t0() + Duration::days(30), &config), PromptPhase::Eligible);

        state.apply_outcome(PromptOutcome::Declined, t0());
        assert_eq!(
            state.phase(t0() + Duration::days(45), &config),
            PromptPhase::DeclinedCooling
        );
        assert_eq!(state.phase(t0() + Duration::days(60), &config), PromptPhase::Eligible);

        state.apply_outcome(PromptOutcome::Accepted, t0());
        assert_eq!(state.phase(t0() + Duration::days(400), &config), PromptPhase::Completed);
        state.apply_outcome(PromptOutcome::Declined, t0() + Duration::days(1));
        assert!(state.completed);
    }

    #[test]
    fn test_positive_action_mapping() {
        assert_eq!(
            PositiveAction::from_kind(EventKind::BookService),
            Some(PositiveAction::ServiceBooked)
        );
        assert_eq!(PositiveAction::from_kind(EventKind::ViewItem), None);
        assert_eq!(PositiveAction::from_kind(EventKind::DailyLogin), None);
        assert_eq!("share_app".parse::<PositiveAction>().unwrap(), PositiveAction::ShareApp);
        assert!("moonwalk".parse::<PositiveAction>().is_err());
    }
}
