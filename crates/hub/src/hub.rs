use std::sync::Arc;

use chrono::{DateTime, Utc};
use engage_core::config::EngageConfig;
use engage_core::error::require_user_id;
use engage_core::{
    DocumentStore, EngageResult, EventKind, EventPayload, RetryPolicy, SharedClock,
};
use engage_ledger::BehaviorLedger;
use engage_personalization::PersonalizationEngine;
use engage_rating_prompt::{GateDecision, RatingPromptService};
use engage_rewards::{RewardCatalog, RewardsEngine};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the side effects of one action produced.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub report_id: Uuid,
    pub user_id: String,
    pub kind: EventKind,
    pub recorded_seq: Option<u64>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub points_awarded: u64,
    pub points_degraded: bool,
    pub badges_unlocked: Vec<String>,
    pub achievements_unlocked: Vec<String>,
    pub prompt: Option<GateDecision>,
    /// Failures that were logged and swallowed.
    pub errors: Vec<String>,
}

impl ActionReport {
    fn new(user_id: &str, kind: EventKind) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            recorded_seq: None,
            recorded_at: None,
            points_awarded: 0,
            points_degraded: false,
            badges_unlocked: Vec::new(),
            achievements_unlocked: Vec::new(),
            prompt: None,
            errors: Vec::new(),
        }
    }

    pub fn prompt_due(&self) -> bool {
        self.prompt.map(|d| d.is_due()).unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct EngagementHub {
    ledger: Arc<BehaviorLedger>,
    rewards: Arc<RewardsEngine>,
    personalization: Arc<PersonalizationEngine>,
    rating_prompt: Arc<RatingPromptService>,
    retry: RetryPolicy,
}

impl EngagementHub {
    pub fn new(
        config: &EngageConfig,
        catalog: Arc<RewardCatalog>,
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
    ) -> Self {
        let ledger = Arc::new(BehaviorLedger::new(&config.ledger, store.clone(), clock.clone()));
        let rewards = Arc::new(RewardsEngine::new(
            &config.rewards,
            catalog,
            ledger.clone(),
            store.clone(),
            clock.clone(),
        ));
        let personalization = Arc::new(PersonalizationEngine::new(
            &config.personalization,
            ledger.clone(),
            store.clone(),
            clock.clone(),
        ));
        let rating_prompt = Arc::new(RatingPromptService::new(&config.rating_prompt, store, clock));
        info!(
            retries = config.hub.side_effect_retry.max_retries,
            "Engagement hub initialized"
        );
        Self {
            ledger,
            rewards,
            personalization,
            rating_prompt,
            retry: config.hub.side_effect_retry.clone(),
        }
    }

    pub fn ledger(&self) -> &Arc<BehaviorLedger> {
        &self.ledger
    }

    pub fn rewards(&self) -> &Arc<RewardsEngine> {
        &self.rewards
    }

    pub fn personalization(&self) -> &Arc<PersonalizationEngine> {
        &self.personalization
    }

    pub fn rating_prompt(&self) -> &Arc<RatingPromptService> {
        &self.rating_prompt
    }

    /// Validate the action, then run its side effects in a background task.
    /// Only malformed input is reported to the caller; everything after
    /// validation is logged and folded into the report.
    pub fn on_action(
        &self,
        user_id: &str,
        payload: EventPayload,
    ) -> EngageResult<JoinHandle<ActionReport>> {
        require_user_id(user_id)?;
        payload.validate()?;

        let hub = self.clone();
        let user_id = user_id.to_string();
        metrics::counter!("hub.actions_dispatched").increment(1);
        Ok(tokio::spawn(async move { hub.run_side_effects(user_id, payload).await }))
    }

    async fn run_side_effects(&self, user_id: String, payload: EventPayload) -> ActionReport {
        let kind = payload.kind();
        let mut report = ActionReport::new(&user_id, kind);

        // Appends are not idempotent, so the ledger gets a single attempt
        match self.ledger.try_record(&user_id, payload).await {
            Ok(event) => {
                report.recorded_seq = Some(event.seq);
                report.recorded_at = Some(event.timestamp);
                self.personalization.invalidate_profile(&user_id);
            }
            Err(e) => {
                metrics::counter!("ledger.record_failed").increment(1);
                warn!(user_id = %user_id, kind = %kind, error = %e, "Behavior event dropped");
                report.errors.push(format!("ledger: {e}"));
            }
        }

        match self
            .retry
            .run("hub.award_points", || self.rewards.award_points(&user_id, kind))
            .await
        {
            Ok(award) => {
                report.points_awarded = award.points_awarded;
                report.points_degraded = award.degraded;
                let (badges, achievements) = if award.points_awarded == 0 {
                    // Zero-point actions still move view- and spend-based conditions
                    self.rewards.evaluate_all(&user_id).await
                } else {
                    (award.badges_unlocked, award.achievements_unlocked)
                };
                report.badges_unlocked = badges.into_iter().map(|b| b.id).collect();
                report.achievements_unlocked = achievements.into_iter().map(|a| a.id).collect();
            }
            Err(e) => {
                metrics::counter!("hub.side_effect_failed", "effect" => "rewards").increment(1);
                warn!(user_id = %user_id, kind = %kind, error = %e, "Points award failed");
                report.errors.push(format!("rewards: {e}"));
            }
        }

        // The action log append is not idempotent either
        match self.rating_prompt.record_event(&user_id, kind).await {
            Ok(decision) => report.prompt = decision,
            Err(e) => {
                metrics::counter!("hub.side_effect_failed", "effect" => "rating_prompt")
                    .increment(1);
                warn!(
                    user_id = %user_id,
                    kind = %kind,
                    error = %e,
                    "Rating prompt evaluation failed"
                );
                report.errors.push(format!("rating_prompt: {e}"));
            }
        }

        debug!(
            user_id = %user_id,
            kind = %kind,
            points = report.points_awarded,
            badges = report.badges_unlocked.len(),
            prompt_due = report.prompt_due(),
            errors = report.errors.len(),
            "Side effects complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use engage_core::store::collections;
    use engage_core::{EngageError, ManualClock, MemoryStore, PurchaseDetails};

    fn hub() -> (EngagementHub, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 20, 21, 0, 0).unwrap(),
        ));
        let hub = EngagementHub::new(
            &EngageConfig::default(),
            Arc::new(RewardCatalog::standard()),
            store.clone(),
            clock,
        );
        (hub, store)
    }

    #[tokio::test]
    async fn test_invalid_action_rejected_synchronously() {
        let (hub, store) = hub();
        let err = hub
            .on_action("", EventPayload::DailyLogin)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, EngageError::Input(_)));

        let err = hub
            .on_action(
                "u1",
                EventPayload::ReviewSubmitted {
                    item_id: None,
                    rating: 9,
                },
            )
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, EngageError::Input(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_booking_runs_all_side_effects() {
        let (hub, _) = hub();
        let report = hub
            .on_action("u1", EventPayload::BookEvent(PurchaseDetails::default()))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.recorded_seq, Some(0));
        assert_eq!(report.points_awarded, 50);
        assert_eq!(report.badges_unlocked, vec!["first_steps".to_string()]);
        assert!(!report.prompt_due());
        assert!(report.errors.is_empty());
        assert_eq!(hub.rewards().points("u1").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_lost_gatekeeper_ack_is_not_replayed() {
        let (hub, store) = hub();
        store.drop_acks_in(collections::RATING_PROMPT, 1);
        let report = hub
            .on_action("u1", EventPayload::ShareApp { channel: None })
            .unwrap()
            .await
            .unwrap();
        assert!(report.prompt.is_none());
        assert!(report.errors.iter().any(|e| e.starts_with("rating_prompt")));
        assert_eq!(hub.rating_prompt().positive_action_count("u1").await.unwrap(), 1);

        hub.on_action("u1", EventPayload::ShareApp { channel: None })
            .unwrap()
            .await
            .unwrap();
        assert_eq!(hub.rating_prompt().positive_action_count("u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_outage_is_reported_not_raised() {
        let (hub, store) = hub();
        store.set_available(false);
        let report = hub
            .on_action("u1", EventPayload::ShareApp { channel: None })
            .unwrap()
            .await
            .unwrap();
        assert!(report.recorded_seq.is_none());
        assert!(report.points_degraded);
        assert!(report.errors.iter().any(|e| e.starts_with("ledger")));
        assert!(report.errors.iter().any(|e| e.starts_with("rating_prompt")));
    }
}
