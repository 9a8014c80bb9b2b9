//! Document store port and the in-memory implementation used by tests and
//! the replay CLI.
//!
//! Production deployments back this with Firestore or any document database
//! offering keyed get/put and a sorted collection scan.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{EngageError, EngageResult};

/// Collection names shared by the engine crates.
pub mod collections {
    pub const BEHAVIOR_LEDGER: &str = "behavior_ledger";
    pub const POINTS_ACCOUNTS: &str = "points_accounts";
    pub const USER_UNLOCKS: &str = "user_unlocks";
    pub const PRICING_PREFERENCES: &str = "pricing_preferences";
    pub const RATING_PROMPT: &str = "rating_prompt";
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, key: &str) -> EngageResult<Option<Value>>;

    async fn put(&self, collection: &str, key: &str, doc: Value) -> EngageResult<()>;

    /// Full collection scan ordered by the numeric `sort_field`, descending,
    /// returning at most `limit` documents. Ties go to the oldest RFC 3339
    /// `created_at` when documents carry one, then to the lowest key.
    async fn query_all(
        &self,
        collection: &str,
        sort_field: &str,
        limit: usize,
    ) -> EngageResult<Vec<Value>>;
}

/// Typed read.
pub async fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
) -> EngageResult<Option<T>> {
    match store.get(collection, key).await? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

/// Typed write.
pub async fn save<T: Serialize>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    doc: &T,
) -> EngageResult<()> {
    store.put(collection, key, serde_json::to_value(doc)?).await
}

// ─── In-memory store ────────────────────────────────────────────────────────

/// DashMap-backed store with fault injection.
#[derive(Debug)]
pub struct MemoryStore {
    collections: DashMap<String, DashMap<String, Value>>,
    available: AtomicBool,
    /// Writes to reject before persisting.
    failing_writes: AtomicU32,
    /// Writes to persist but still report as failed (commit-then-timeout).
    lost_acks: AtomicU32,
    /// Per-collection variant of `lost_acks`.
    lost_acks_in: DashMap<String, u32>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Document store initialized (in-memory)");
        Self {
            collections: DashMap::new(),
            available: AtomicBool::new(true),
            failing_writes: AtomicU32::new(0),
            lost_acks: AtomicU32::new(0),
            lost_acks_in: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Toggle whole-store availability; while unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Reject the next `n` writes without persisting them.
    pub fn fail_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Persist the next `n` writes but report them as failed.
    pub fn drop_acks(&self, n: u32) {
        self.lost_acks.store(n, Ordering::SeqCst);
    }

    /// Like `drop_acks`, but only for writes to `collection`.
    pub fn drop_acks_in(&self, collection: &str, n: u32) {
        self.lost_acks_in.insert(collection.to_owned(), n);
    }

    /// Successful (persisted) writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> EngageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngageError::storage("document store offline"))
        }
    }

    fn take_token(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_collection_token(&self, collection: &str) -> bool {
        match self.lost_acks_in.get_mut(collection) {
            Some(mut remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> EngageResult<Option<Value>> {
        self.check_available()?;
        Ok(self
            .collections
            .get(collection)
            .and_then(|c| c.get(key).map(|doc| doc.value().clone())))
    }

    async fn put(&self, collection: &str, key: &str, doc: Value) -> EngageResult<()> {
        self.check_available()?;
        if Self::take_token(&self.failing_writes) {
            return Err(EngageError::storage(format!(
                "write to {collection}/{key} rejected"
            )));
        }
        self.collections
            .entry(collection.to_owned())
            .or_default()
            .insert(key.to_owned(), doc);
        self.writes.fetch_add(1, Ordering::SeqCst);
        if Self::take_token(&self.lost_acks) || self.take_collection_token(collection) {
            return Err(EngageError::storage(format!(
                "write to {collection}/{key} timed out"
            )));
        }
        Ok(())
    }

    async fn query_all(
        &self,
        collection: &str,
        sort_field: &str,
        limit: usize,
    ) -> EngageResult<Vec<Value>> {
        self.check_available()?;
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<(String, Value)> = docs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        drop(docs);

        let field = |doc: &Value| doc.get(sort_field).and_then(Value::as_f64).unwrap_or(0.0);
        let created = |doc: &Value| -> Option<DateTime<FixedOffset>> {
            doc.get("created_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        };
        rows.sort_by(|a, b| {
            field(&b.1)
                .partial_cmp(&field(&a.1))
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| created(&a.1).cmp(&created(&b.1)))
                .then_with(|| a.0.cmp(&b.0))
        });
        rows.truncate(limit);
        Ok(rows.into_iter().map(|(_, doc)| doc).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_put_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("c", "k").await.unwrap().is_none());
        store.put("c", "k", json!({"n": 1})).await.unwrap();
        assert_eq!(store.get("c", "k").await.unwrap(), Some(json!({"n": 1})));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_query_all_sorted_desc_with_key_tiebreak() {
        let store = MemoryStore::new();
        store.put("acc", "b", json!({"points": 10})).await.unwrap();
        store.put("acc", "a", json!({"points": 10})).await.unwrap();
        store.put("acc", "c", json!({"points": 30})).await.unwrap();

        let rows = store.query_all("acc", "points", 10).await.unwrap();
        let points: Vec<i64> = rows.iter().map(|r| r["points"].as_i64().unwrap()).collect();
        assert_eq!(points, vec![30, 10, 10]);

        let capped = store.query_all("acc", "points", 2).await.unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_truncated_scan_keeps_oldest_of_tied_rows() {
        let store = MemoryStore::new();
        store
            .put("acc", "a", json!({"points": 10, "created_at": "2025-03-02T10:00:00Z"}))
            .await
            .unwrap();
        store
            .put("acc", "z", json!({"points": 10, "created_at": "2025-03-01T10:00:00.5Z"}))
            .await
            .unwrap();
        store
            .put("acc", "m", json!({"points": 40, "created_at": "2025-03-05T10:00:00Z"}))
            .await
            .unwrap();

        let rows = store.query_all("acc", "points", 2).await.unwrap();
        let dates: Vec<&str> = rows.iter().map(|r| r["created_at"].as_str().unwrap()).collect();
        assert_eq!(dates, vec!["2025-03-05T10:00:00Z", "2025-03-01T10:00:00.5Z"]);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryStore::new();
        store.fail_writes(1);
        assert!(store.put("c", "k", json!(1)).await.is_err());
        assert!(store.get("c", "k").await.unwrap().is_none());
        store.put("c", "k", json!(2)).await.unwrap();

        store.drop_acks(1);
        assert!(store.put("c", "k", json!(3)).await.is_err());
        assert_eq!(store.get("c", "k").await.unwrap(), Some(json!(3)));

        store.drop_acks_in("other", 1);
        store.put("c", "k", json!(4)).await.unwrap();
        assert!(store.put("other", "k", json!(5)).await.is_err());
        assert_eq!(store.get("other", "k").await.unwrap(), Some(json!(5)));
        store.put("other", "k", json!(6)).await.unwrap();

        store.set_available(false);
        assert!(matches!(
            store.get("c", "k").await,
            Err(EngageError::StorageUnavailable(_))
        ));
    }
}
