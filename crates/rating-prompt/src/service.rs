use std::sync::Arc;

use engage_core::config::RatingPromptConfig;
use engage_core::error::require_user_id;
use engage_core::store::{collections, load, save};
use engage_core::{DocumentStore, EngageResult, EventKind, KeyedLocks, SharedClock};
use tracing::{debug, info};

use crate::gatekeeper::{evaluate, BlockReason, GateDecision};
use crate::state::{PositiveAction, PromptOutcome, PromptPhase, RatingPromptState};

/// Persists gatekeeper state per user and applies transitions under a
/// per-user lock.
pub struct RatingPromptService {
    config: RatingPromptConfig,
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    locks: KeyedLocks,
}

impl RatingPromptService {
    pub fn new(
        config: &RatingPromptConfig,
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
    ) -> Self {
        info!(
            min_actions = config.min_positive_actions,
            prompt_cooldown_days = config.min_days_between_prompts,
            decline_cooldown_days = config.min_days_after_decline,
            "Rating prompt gatekeeper initialized"
        );
        Self {
            config: config.clone(),
            store,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    async fn load_state(&self, user_id: &str) -> EngageResult<RatingPromptState> {
        Ok(load(self.store.as_ref(), collections::RATING_PROMPT, user_id)
            .await?
            .unwrap_or_else(|| RatingPromptState::new(user_id)))
    }

    async fn save_state(&self, state: &RatingPromptState) -> EngageResult<()> {
        save(self.store.as_ref(), collections::RATING_PROMPT, &state.user_id, state).await
    }

    /// Log a positive action and decide whether a prompt is due. A due
    /// decision starts the prompt cooldown immediately.
    pub async fn record_positive_action(
        &self,
        user_id: &str,
        action: PositiveAction,
    ) -> EngageResult<GateDecision> {
        require_user_id(user_id)?;
        let _guard = self.locks.lock(user_id).await;
        let now = self.clock.now();

        let mut state = self.load_state(user_id).await?;
        state.record_action(action, now, self.config.action_log_cap);

        let decision = if state.completed {
            GateDecision::Blocked(BlockReason::Completed)
        } else {
            evaluate(&state, now, &self.config)
        };
        if decision.is_due() {
            state.last_prompt_at = Some(now);
            metrics::counter!("rating_prompt.prompt_due").increment(1);
            info!(user_id = user_id, action = %action, "Rating prompt due");
        } else {
            debug!(
                user_id = user_id,
                action = %action,
                decision = ?decision,
                "Rating prompt gated"
            );
        }

        self.save_state(&state).await?;
        Ok(decision)
    }

    /// Map a ledger event onto the gatekeeper. Non-positive kinds are ignored.
    pub async fn record_event(
        &self,
        user_id: &str,
        kind: EventKind,
    ) -> EngageResult<Option<GateDecision>> {
        match PositiveAction::from_kind(kind) {
            Some(action) => Ok(Some(self.record_positive_action(user_id, action).await?)),
            None => Ok(None),
        }
    }

    pub async fn record_outcome(
        &self,
        user_id: &str,
        outcome: PromptOutcome,
    ) -> EngageResult<PromptPhase> {
        require_user_id(user_id)?;
        let _guard = self.locks.lock(user_id).await;
        let now = self.clock.now();

        let mut state = self.load_state(user_id).await?;
        state.apply_outcome(outcome, now);
        self.save_state(&state).await?;

        metrics::counter!("rating_prompt.outcome", "outcome" => outcome_label(outcome))
            .increment(1);
        let phase = state.phase(now, &self.config);
        info!(
            user_id = user_id,
            outcome = ?outcome,
            phase = ?phase,
            "Rating prompt outcome recorded"
        );
        Ok(phase)
    }

    /// Prompt regardless of cooldowns and action counts. Refused once the
    /// user has completed the store flow.
    pub async fn force_prompt(&self, user_id: &str) -> EngageResult<GateDecision> {
        require_user_id(user_id)?;
        let _guard = self.locks.lock(user_id).await;
        let mut state = self.load_state(user_id).await?;
        if state.completed {
            return Ok(GateDecision::Blocked(BlockReason::Completed));
        }
        state.last_prompt_at = Some(self.clock.now());
        self.save_state(&state).await?;
        metrics::counter!("rating_prompt.forced").increment(1);
        Ok(GateDecision::PromptDue)
    }

    pub async fn reset(&self, user_id: &str) -> EngageResult<()> {
        require_user_id(user_id)?;
        let _guard = self.locks.lock(user_id).await;
        let mut state = self.load_state(user_id).await?;
        state.reset();
        self.save_state(&state).await
    }

    pub async fn positive_action_count(&self, user_id: &str) -> EngageResult<usize> {
        Ok(self.load_state(user_id).await?.positive_action_log.len())
    }

    pub async fn phase(&self, user_id: &str) -> EngageResult<PromptPhase> {
        let state = self.load_state(user_id).await?;
        Ok(state.phase(self.clock.now(), &self.config))
    }

    pub async fn state(&self, user_id: &str) -> EngageResult<RatingPromptState> {
        self.load_state(user_id).await
    }
}

fn outcome_label(outcome: PromptOutcome) -> &'static str {
    match outcome {
        PromptOutcome::Shown => "shown",
        PromptOutcome::Accepted => "accepted",
        PromptOutcome::Declined => "declined",
        PromptOutcome::Unavailable => "unavailable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use engage_core::{EngageError, ManualClock, MemoryStore};

    fn setup() -> (RatingPromptService, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 7, 1, 20, 0, 0).unwrap(),
        ));
        let service = RatingPromptService::new(
            &RatingPromptConfig::default(),
            store.clone(),
            clock.clone(),
        );
        (service, clock, store)
    }

    #[tokio::test]
    async fn test_third_action_opens_gate_then_cools() {
        let (service, clock, _) = setup();
        let first = service
            .record_positive_action("u1", PositiveAction::EventBooked)
            .await
            .unwrap();
        assert!(!first.is_due());
        clock.advance(Duration::hours(2));
        service
            .record_positive_action("u1", PositiveAction::ReviewSubmitted)
            .await
            .unwrap();
        clock.advance(Duration::hours(2));
        let third = service
            .record_positive_action("u1", PositiveAction::ShareApp)
            .await
            .unwrap();
        assert!(third.is_due());
        assert_eq!(service.phase("u1").await.unwrap(), PromptPhase::Cooling);

        let fourth = service
            .record_positive_action("u1", PositiveAction::ShareApp)
            .await
            .unwrap();
        assert_eq!(fourth, GateDecision::Blocked(BlockReason::PromptCooldown));
    }

    #[tokio::test]
    async fn test_outcomes_drive_phases() {
        let (service, clock, _) = setup();
        service.force_prompt("u1").await.unwrap();
        assert_eq!(
            service.record_outcome("u1", PromptOutcome::Shown).await.unwrap(),
            PromptPhase::Cooling
        );
        assert_eq!(
            service.record_outcome("u1", PromptOutcome::Declined).await.unwrap(),
            PromptPhase::DeclinedCooling
        );

        clock.advance(Duration::days(61));
        assert_eq!(service.phase("u1").await.unwrap(), PromptPhase::Eligible);

        assert_eq!(
            service.record_outcome("u1", PromptOutcome::Accepted).await.unwrap(),
            PromptPhase::Completed
        );
        assert_eq!(
            service.force_prompt("u1").await.unwrap(),
            GateDecision::Blocked(BlockReason::Completed)
        );
        let after = service
            .record_positive_action("u1", PositiveAction::PaymentSuccess)
            .await
            .unwrap();
        assert_eq!(after, GateDecision::Blocked(BlockReason::Completed));
        // Actions are still logged after completion
        assert_eq!(service.positive_action_count("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_markers_but_keeps_log() {
        let (service, _, _) = setup();
        service
            .record_positive_action("u1", PositiveAction::FeatureUsed)
            .await
            .unwrap();
        service.record_outcome("u1", PromptOutcome::Accepted).await.unwrap();
        service.reset("u1").await.unwrap();
        assert_eq!(service.phase("u1").await.unwrap(), PromptPhase::Eligible);
        assert_eq!(service.positive_action_count("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_events_are_ignored() {
        let (service, _, store) = setup();
        assert!(service
            .record_event("u1", EventKind::ViewItem)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.write_count(), 0);
        assert!(service
            .record_event("u1", EventKind::OrderCompleted)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let (service, _, store) = setup();
        store.set_available(false);
        let err = service
            .record_positive_action("u1", PositiveAction::ShareApp)
            .await
            .unwrap_err();
        assert!(matches!(err, EngageError::StorageUnavailable(_)));
    }
}
