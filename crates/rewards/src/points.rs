//! Points accounts with per-user serialized read-modify-write and a local
//! fallback for writes the store did not acknowledge.
//!
//! Every authoritative write replaces the whole account document and bumps
//! its `version`. A write that fails after its retry is parked locally
//! together with the version it was based on. On the next write for that
//! user the account is re-read: if the version has not moved, the parked
//! delta never landed and is folded in; if it has moved, the parked write
//! did land and the local copy is discarded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engage_core::store::{collections, load, save};
use engage_core::{DocumentStore, EngageResult, KeyedLocks, RetryPolicy, SharedClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointsAccount {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub total_points: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by every authoritative write; 0 means no document.
    pub version: u64,
}

impl PointsAccount {
    fn open(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: None,
            total_points: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

/// A write whose outcome is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InDoubt {
    base_version: u64,
    delta: u64,
}

#[derive(Debug, Clone, Default)]
struct Parked {
    /// Deltas that never reached the store (the read before them failed).
    unsent: u64,
    in_doubt: Option<InDoubt>,
    /// Last authoritative total this process saw.
    last_seen_total: u64,
}

impl Parked {
    /// Amount still owed to an account currently at `version`.
    fn owed_at(&self, version: u64) -> u64 {
        let doubtful = match self.in_doubt {
            Some(d) if d.base_version == version => d.delta,
            _ => 0,
        };
        self.unsent + doubtful
    }

    fn estimate(&self) -> u64 {
        self.last_seen_total + self.unsent + self.in_doubt.map(|d| d.delta).unwrap_or(0)
    }
}

/// Result of applying a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit {
    pub new_total: u64,
    /// True when the credit is parked locally rather than confirmed.
    pub degraded: bool,
}

pub struct PointsBook {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    retry: RetryPolicy,
    locks: KeyedLocks,
    parked: DashMap<String, Parked>,
    /// Last authoritative total observed per user.
    seen: DashMap<String, u64>,
}

impl PointsBook {
    pub fn new(store: Arc<dyn DocumentStore>, clock: SharedClock, retry: RetryPolicy) -> Self {
        Self {
            store,
            clock,
            retry,
            locks: KeyedLocks::new(),
            parked: DashMap::new(),
            seen: DashMap::new(),
        }
    }

    async fn read(&self, user_id: &str) -> EngageResult<Option<PointsAccount>> {
        self.retry
            .run("points.read", || {
                load(self.store.as_ref(), collections::POINTS_ACCOUNTS, user_id)
            })
            .await
    }

    async fn write(&self, account: &PointsAccount) -> EngageResult<()> {
        self.retry
            .run("points.write", || {
                save(
                    self.store.as_ref(),
                    collections::POINTS_ACCOUNTS,
                    &account.user_id,
                    account,
                )
            })
            .await
    }

    /// Add `delta` to the user's account, folding in anything parked. A zero
    /// delta only flushes parked state.
    pub async fn credit(&self, user_id: &str, delta: u64) -> Credit {
        let _guard = self.locks.lock(user_id).await;
        let parked = self
            .parked
            .get(user_id)
            .map(|p| p.value().clone())
            .unwrap_or_default();

        let current = match self.read(user_id).await {
            Ok(current) => current,
            Err(e) => {
                let mut parked = parked;
                if let Some(seen) = self.seen.get(user_id) {
                    parked.last_seen_total = *seen;
                }
                parked.unsent += delta;
                let new_total = parked.estimate();
                if parked.unsent > 0 || parked.in_doubt.is_some() {
                    self.parked.insert(user_id.to_string(), parked);
                }
                metrics::counter!("rewards.points_parked").increment(1);
                warn!(
                    user_id = user_id,
                    delta = delta,
                    error = %e,
                    "Points account unreadable, credit parked"
                );
                return Credit {
                    new_total,
                    degraded: true,
                };
            }
        };

        let now = self.clock.now();
        let mut account = current.unwrap_or_else(|| PointsAccount::open(user_id, now));
        let base_version = account.version;

        if let Some(d) = parked.in_doubt {
            if d.base_version != base_version {
                metrics::counter!("rewards.points_stale_discarded").increment(1);
                debug!(
                    user_id = user_id,
                    parked_version = d.base_version,
                    observed_version = base_version,
                    "Parked points write already landed, discarding"
                );
            }
        }

        let carried = parked.owed_at(base_version);
        let total_delta = carried + delta;
        if total_delta == 0 {
            self.parked.remove(user_id);
            return Credit {
                new_total: account.total_points,
                degraded: false,
            };
        }

        let base_total = account.total_points;
        self.seen.insert(user_id.to_string(), base_total);
        account.total_points = base_total.saturating_add(total_delta);
        account.updated_at = now;
        account.version = base_version + 1;

        match self.write(&account).await {
            Ok(()) => {
                self.parked.remove(user_id);
                self.seen.insert(user_id.to_string(), account.total_points);
                if carried > 0 {
                    metrics::counter!("rewards.points_reconciled").increment(carried);
                    info!(user_id = user_id, carried = carried, "Parked points reconciled");
                }
                Credit {
                    new_total: account.total_points,
                    degraded: false,
                }
            }
            Err(e) => {
                self.parked.insert(
                    user_id.to_string(),
                    Parked {
                        unsent: 0,
                        in_doubt: Some(InDoubt {
                            base_version,
                            delta: total_delta,
                        }),
                        last_seen_total: base_total,
                    },
                );
                metrics::counter!("rewards.points_parked").increment(1);
                warn!(
                    user_id = user_id,
                    delta = total_delta,
                    error = %e,
                    "Points write failed, credit parked"
                );
                Credit {
                    new_total: account.total_points,
                    degraded: true,
                }
            }
        }
    }

    /// Authoritative total plus whatever is still owed locally.
    pub async fn balance(&self, user_id: &str) -> EngageResult<u64> {
        match load::<PointsAccount>(self.store.as_ref(), collections::POINTS_ACCOUNTS, user_id)
            .await
        {
            Ok(account) => {
                let (total, version) = account
                    .map(|a| (a.total_points, a.version))
                    .unwrap_or((0, 0));
                let owed = self
                    .parked
                    .get(user_id)
                    .map(|p| p.owed_at(version))
                    .unwrap_or(0);
                Ok(total + owed)
            }
            Err(e) => match self.parked.get(user_id) {
                Some(p) => Ok(p.estimate()),
                None => Err(e),
            },
        }
    }

    /// Best local guess at the total without touching the store.
    pub fn estimate(&self, user_id: &str) -> u64 {
        if let Some(p) = self.parked.get(user_id) {
            return p.estimate();
        }
        self.seen.get(user_id).map(|t| *t).unwrap_or(0)
    }

    pub async fn account(&self, user_id: &str) -> EngageResult<Option<PointsAccount>> {
        load(self.store.as_ref(), collections::POINTS_ACCOUNTS, user_id).await
    }

    pub async fn set_display_name(&self, user_id: &str, name: &str) -> EngageResult<PointsAccount> {
        let _guard = self.locks.lock(user_id).await;
        let now = self.clock.now();
        let mut account = self
            .read(user_id)
            .await?
            .unwrap_or_else(|| PointsAccount::open(user_id, now));
        // The rename moves the version, so anything parked against the
        // current version has to ride along or it would look already landed
        let base_version = account.version;
        let base_total = account.total_points;
        let carried = self
            .parked
            .get(user_id)
            .map(|p| p.owed_at(base_version))
            .unwrap_or(0);
        account.display_name = Some(name.to_string());
        account.total_points = base_total.saturating_add(carried);
        account.updated_at = now;
        account.version = base_version + 1;

        if let Err(e) = self.write(&account).await {
            if carried > 0 {
                self.parked.insert(
                    user_id.to_string(),
                    Parked {
                        unsent: 0,
                        in_doubt: Some(InDoubt {
                            base_version,
                            delta: carried,
                        }),
                        last_seen_total: base_total,
                    },
                );
            }
            return Err(e);
        }
        self.parked.remove(user_id);
        self.seen.insert(user_id.to_string(), account.total_points);
        if carried > 0 {
            metrics::counter!("rewards.points_reconciled").increment(carried);
            info!(user_id = user_id, carried = carried, "Parked points reconciled on rename");
        }
        Ok(account)
    }

    /// Retry every parked credit. Returns how many users are now settled.
    pub async fn reconcile_pending(&self) -> usize {
        let users: Vec<String> = self.parked.iter().map(|e| e.key().clone()).collect();
        let mut settled = 0;
        for user_id in users {
            if !self.credit(&user_id, 0).await.degraded {
                settled += 1;
            }
        }
        settled
    }

    pub fn has_pending(&self, user_id: &str) -> bool {
        self.parked.contains_key(user_id)
    }

    /// Top accounts by points, at most `limit`. Malformed documents are skipped.
    pub async fn scan(&self, limit: usize) -> EngageResult<Vec<PointsAccount>> {
        let docs = self
            .store
            .query_all(collections::POINTS_ACCOUNTS, "total_points", limit)
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| match serde_json::from_value(doc) {
                Ok(account) => Some(account),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed points account");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use engage_core::{ManualClock, MemoryStore};

    fn setup() -> (PointsBook, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap(),
        ));
        let book = PointsBook::new(store.clone(), clock, RetryPolicy::once_immediate());
        (book, store)
    }

    #[tokio::test]
    async fn test_credit_creates_and_versions_account() {
        let (book, _) = setup();
        assert_eq!(book.credit("u1", 50).await.new_total, 50);
        assert_eq!(book.credit("u1", 20).await.new_total, 70);
        let account = book.account("u1").await.unwrap().unwrap();
        assert_eq!(account.total_points, 70);
        assert_eq!(account.version, 2);
    }

    #[tokio::test]
    async fn test_single_failure_is_retried() {
        let (book, store) = setup();
        store.fail_writes(1);
        let credit = book.credit("u1", 50).await;
        assert!(!credit.degraded);
        assert_eq!(book.balance("u1").await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_unwritten_credit_is_folded_into_next_write() {
        let (book, store) = setup();
        book.credit("u1", 10).await;
        store.fail_writes(2);
        let credit = book.credit("u1", 50).await;
        assert!(credit.degraded);
        assert_eq!(credit.new_total, 60);
        assert!(book.has_pending("u1"));
        assert_eq!(book.balance("u1").await.unwrap(), 60);

        let credit = book.credit("u1", 5).await;
        assert!(!credit.degraded);
        assert_eq!(credit.new_total, 65);
        assert!(!book.has_pending("u1"));
        assert_eq!(book.account("u1").await.unwrap().unwrap().total_points, 65);
    }

    #[tokio::test]
    async fn test_landed_write_is_not_applied_twice() {
        let (book, store) = setup();
        book.credit("u1", 10).await;
        // Both attempts persist but report failure
        store.drop_acks(2);
        let credit = book.credit("u1", 50).await;
        assert!(credit.degraded);
        assert_eq!(book.balance("u1").await.unwrap(), 60);

        let credit = book.credit("u1", 5).await;
        assert_eq!(credit.new_total, 65);
        assert!(!book.has_pending("u1"));
    }

    #[tokio::test]
    async fn test_rename_carries_parked_credit() {
        let (book, store) = setup();
        book.credit("u1", 10).await;
        store.fail_writes(2);
        assert!(book.credit("u1", 50).await.degraded);
        assert_eq!(book.balance("u1").await.unwrap(), 60);

        let account = book.set_display_name("u1", "Dana").await.unwrap();
        assert_eq!(account.total_points, 60);
        assert!(!book.has_pending("u1"));

        let credit = book.credit("u1", 5).await;
        assert_eq!(credit.new_total, 65);
        assert_eq!(book.account("u1").await.unwrap().unwrap().total_points, 65);
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_parked_credit() {
        let (book, store) = setup();
        book.credit("u1", 10).await;
        store.fail_writes(4);
        assert!(book.credit("u1", 50).await.degraded);
        assert!(book.set_display_name("u1", "Dana").await.is_err());
        assert!(book.has_pending("u1"));

        let credit = book.credit("u1", 5).await;
        assert!(!credit.degraded);
        assert_eq!(credit.new_total, 65);
    }

    #[tokio::test]
    async fn test_unreadable_store_parks_and_reconciles() {
        let (book, store) = setup();
        book.credit("u1", 10).await;
        store.set_available(false);
        assert!(book.credit("u1", 20).await.degraded);
        assert!(book.credit("u1", 30).await.degraded);
        assert_eq!(book.balance("u1").await.unwrap(), 60);

        store.set_available(true);
        assert_eq!(book.reconcile_pending().await, 1);
        assert_eq!(book.account("u1").await.unwrap().unwrap().total_points, 60);
        assert_eq!(book.reconcile_pending().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_credits_are_not_lost() {
        let (book, _) = setup();
        let book = Arc::new(book);
        let mut handles = Vec::new();
        for _ in 0..40 {
            let book = book.clone();
            handles.push(tokio::spawn(async move { book.credit("u1", 5).await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(book.balance("u1").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_display_name_keeps_points() {
        let (book, _) = setup();
        book.credit("u1", 40).await;
        let account = book.set_display_name("u1", "Dana").await.unwrap();
        assert_eq!(account.total_points, 40);
        assert_eq!(account.display_name.as_deref(), Some("Dana"));
        assert_eq!(book.credit("u1", 1).await.new_total, 41);
    }
}
