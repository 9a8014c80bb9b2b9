//! Per-user event ledger stored as one document per user. Appends and
//! evictions happen under a per-user lock, so the retention cap holds even
//! with concurrent writers for the same user.

use std::sync::Arc;

use engage_core::config::LedgerConfig;
use engage_core::error::require_user_id;
use engage_core::store::{collections, load, save};
use engage_core::{
    BehaviorEvent, DocumentStore, EngageResult, EventPayload, KeyedLocks, SharedClock,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Stored form of one user's ledger, oldest event first.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerDocument {
    user_id: String,
    next_seq: u64,
    events: Vec<BehaviorEvent>,
}

impl LedgerDocument {
    fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            next_seq: 0,
            events: Vec::new(),
        }
    }
}

pub struct BehaviorLedger {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    retention_cap: usize,
    locks: KeyedLocks,
}

impl BehaviorLedger {
    pub fn new(config: &LedgerConfig, store: Arc<dyn DocumentStore>, clock: SharedClock) -> Self {
        info!(retention_cap = config.retention_cap, "Behavior ledger initialized");
        Self {
            store,
            clock,
            retention_cap: config.retention_cap.max(1),
            locks: KeyedLocks::new(),
        }
    }

    /// Best-effort append. Telemetry must never fail the business action
    /// that produced it, so failures are logged and swallowed.
    pub async fn record(&self, user_id: &str, payload: EventPayload) {
        let kind = payload.kind();
        if let Err(e) = self.try_record(user_id, payload).await {
            metrics::counter!("ledger.record_failed").increment(1);
            warn!(user_id = user_id, kind = %kind, error = %e, "Behavior event dropped");
        }
    }

    /// Append one event with a server-assigned timestamp, evicting the
    /// oldest events beyond the retention cap.
    pub async fn try_record(
        &self,
        user_id: &str,
        payload: EventPayload,
    ) -> EngageResult<BehaviorEvent> {
        require_user_id(user_id)?;
        payload.validate()?;

        let _guard = self.locks.lock(user_id).await;

        let mut doc: LedgerDocument =
            load(self.store.as_ref(), collections::BEHAVIOR_LEDGER, user_id)
                .await?
                .unwrap_or_else(|| LedgerDocument::empty(user_id));

        // Never let a clock step backwards reorder the ledger
        let now = self.clock.now();
        let timestamp = doc
            .events
            .last()
            .map(|last| last.timestamp.max(now))
            .unwrap_or(now);

        let event = BehaviorEvent {
            user_id: user_id.to_string(),
            seq: doc.next_seq,
            timestamp,
            payload,
        };
        doc.next_seq += 1;
        doc.events.push(event.clone());

        let overflow = doc.events.len().saturating_sub(self.retention_cap);
        if overflow > 0 {
            doc.events.drain(..overflow);
            metrics::counter!("ledger.events_evicted").increment(overflow as u64);
        }

        save(self.store.as_ref(), collections::BEHAVIOR_LEDGER, user_id, &doc).await?;
        metrics::counter!("ledger.events_recorded").increment(1);

        debug!(
            user_id = user_id,
            kind = %event.kind(),
            seq = event.seq,
            retained = doc.events.len(),
            "Behavior event recorded"
        );

        Ok(event)
    }

    /// Most recent events, newest first.
    pub async fn recent(&self, user_id: &str, limit: usize) -> EngageResult<Vec<BehaviorEvent>> {
        let doc: Option<LedgerDocument> =
            load(self.store.as_ref(), collections::BEHAVIOR_LEDGER, user_id).await?;
        Ok(doc
            .map(|d| d.events.into_iter().rev().take(limit).collect())
            .unwrap_or_default())
    }

    pub async fn len(&self, user_id: &str) -> EngageResult<usize> {
        let doc: Option<LedgerDocument> =
            load(self.store.as_ref(), collections::BEHAVIOR_LEDGER, user_id).await?;
        Ok(doc.map(|d| d.events.len()).unwrap_or(0))
    }

    pub fn retention_cap(&self) -> usize {
        self.retention_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use engage_core::{EngageError, EventKind, ManualClock, MemoryStore};

    fn view(item: &str) -> EventPayload {
        EventPayload::ViewItem {
            item_id: item.to_string(),
            category: Some("concerts".to_string()),
            price: Some(25.0),
        }
    }

    fn setup(cap: usize) -> (BehaviorLedger, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 18, 0, 0).unwrap(),
        ));
        let ledger = BehaviorLedger::new(
            &LedgerConfig { retention_cap: cap },
            store.clone(),
            clock.clone(),
        );
        (ledger, store, clock)
    }

    #[tokio::test]
    async fn test_cap_keeps_most_recent_events() {
        let (ledger, _, clock) = setup(5);
        for i in 0..8 {
            ledger.try_record("u1", view(&format!("item-{i}"))).await.unwrap();
            clock.advance(Duration::minutes(1));
        }

        assert_eq!(ledger.len("u1").await.unwrap(), 5);
        let recent = ledger.recent("u1", 100).await.unwrap();
        let items: Vec<&str> = recent.iter().filter_map(|e| e.payload.item_id()).collect();
        assert_eq!(items, vec!["item-7", "item-6", "item-5", "item-4", "item-3"]);
        assert_eq!(recent[0].seq, 7);
    }

    #[tokio::test]
    async fn test_recent_respects_limit_and_order() {
        let (ledger, _, clock) = setup(100);
        ledger.try_record("u1", EventPayload::DailyLogin).await.unwrap();
        clock.advance(Duration::hours(1));
        ledger
            .try_record("u1", EventPayload::Search { query: "jazz".into() })
            .await
            .unwrap();

        let recent = ledger.recent("u1", 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind(), EventKind::Search);
        assert!(ledger.recent("nobody", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let (ledger, _, clock) = setup(10);
        let first = ledger.try_record("u1", EventPayload::DailyLogin).await.unwrap();
        clock.advance(Duration::minutes(-30));
        let second = ledger.try_record("u1", EventPayload::WeeklyActive).await.unwrap();
        assert!(second.timestamp >= first.timestamp);
        assert!(second.seq > first.seq);
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_persisted() {
        let (ledger, store, _) = setup(10);
        let err = ledger
            .try_record("", EventPayload::DailyLogin)
            .await
            .unwrap_err();
        assert!(matches!(err, EngageError::Input(_)));

        let err = ledger
            .try_record("u1", EventPayload::Search { query: "".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, EngageError::Input(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_record_swallows_storage_failures() {
        let (ledger, store, _) = setup(10);
        store.set_available(false);
        ledger.record("u1", EventPayload::DailyLogin).await;

        store.set_available(true);
        assert_eq!(ledger.len("u1").await.unwrap(), 0);
        ledger.record("u1", EventPayload::DailyLogin).await;
        assert_eq!(ledger.len("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_respect_cap() {
        let (ledger, _, _) = setup(20);
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for i in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.try_record("u1", view(&format!("i{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(ledger.len("u1").await.unwrap(), 20);
        let recent = ledger.recent("u1", 20).await.unwrap();
        assert_eq!(recent[0].seq, 49);
        assert!(recent.windows(2).all(|w| w[0].seq == w[1].seq + 1));
    }
}
