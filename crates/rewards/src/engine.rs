//! Rewards engine: points awards, badge and achievement unlocks, leaderboard
//! and challenge progress.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use engage_cache::LocalCache;
use engage_core::config::RewardsConfig;
use engage_core::error::require_user_id;
use engage_core::store::{collections, load, save};
use engage_core::{
    DocumentStore, EngageError, EngageResult, EventKind, KeyedLocks, RetryPolicy, SharedClock,
};
use engage_ledger::BehaviorLedger;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{AchievementDefinition, BadgeDefinition, RewardCatalog, UnlockCondition};
use crate::challenges::{Challenge, ChallengeProgress};
use crate::conditions::ConditionContext;
use crate::leaderboard::{rank_accounts, LeaderboardEntry};
use crate::points::{PointsAccount, PointsBook};

const LEADERBOARD_KEY: &str = "global";

// ─── Unlock records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnlockedBadge {
    pub user_id: String,
    pub badge_id: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnlockedAchievement {
    pub user_id: String,
    pub achievement_id: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnlockKind {
    Badge,
    Achievement,
}

impl UnlockKind {
    fn as_str(self) -> &'static str {
        match self {
            UnlockKind::Badge => "badge",
            UnlockKind::Achievement => "achievement",
        }
    }
}

/// One document per user holding every unlock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserUnlocks {
    user_id: String,
    #[serde(default)]
    badges: Vec<UnlockedBadge>,
    #[serde(default)]
    achievements: Vec<UnlockedAchievement>,
}

impl UserUnlocks {
    fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    fn has(&self, kind: UnlockKind, id: &str) -> bool {
        match kind {
            UnlockKind::Badge => self.badges.iter().any(|b| b.badge_id == id),
            UnlockKind::Achievement => self.achievements.iter().any(|a| a.achievement_id == id),
        }
    }

    fn add(&mut self, kind: UnlockKind, id: &str, at: DateTime<Utc>) -> EngageResult<()> {
        if self.has(kind, id) {
            return Err(EngageError::InvariantViolation(format!(
                "{} '{id}' already unlocked for {}",
                kind.as_str(),
                self.user_id
            )));
        }
        match kind {
            UnlockKind::Badge => self.badges.push(UnlockedBadge {
                user_id: self.user_id.clone(),
                badge_id: id.to_string(),
                unlocked_at: at,
            }),
            UnlockKind::Achievement => self.achievements.push(UnlockedAchievement {
                user_id: self.user_id.clone(),
                achievement_id: id.to_string(),
                unlocked_at: at,
            }),
        }
        Ok(())
    }
}

/// Badges and achievements share the unlock pipeline.
trait Unlockable: Clone {
    const KIND: UnlockKind;
    fn id(&self) -> &str;
    fn condition(&self) -> &UnlockCondition;
    fn bonus(&self) -> u64;
}

impl Unlockable for BadgeDefinition {
    const KIND: UnlockKind = UnlockKind::Badge;
    fn id(&self) -> &str {
        &self.id
    }
    fn condition(&self) -> &UnlockCondition {
        &self.condition
    }
    fn bonus(&self) -> u64 {
        self.points_award
    }
}

impl Unlockable for AchievementDefinition {
    const KIND: UnlockKind = UnlockKind::Achievement;
    fn id(&self) -> &str {
        &self.id
    }
    fn condition(&self) -> &UnlockCondition {
        &self.condition
    }
    fn bonus(&self) -> u64 {
        self.points_award
    }
}

// ─── Results ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PointsAward {
    pub user_id: String,
    pub points_awarded: u64,
    /// Total after the award and any unlock bonuses.
    pub new_total: u64,
    /// The award is parked locally pending reconciliation.
    pub degraded: bool,
    pub badges_unlocked: Vec<BadgeDefinition>,
    pub achievements_unlocked: Vec<AchievementDefinition>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "rank", rename_all = "snake_case")]
pub enum UserRank {
    Ranked(usize),
    /// Has an account but falls outside the capped participant scan.
    BeyondScan,
    NotParticipating,
}

// ─── Engine ─────────────────────────────────────────────────────────────────

pub struct RewardsEngine {
    config: RewardsConfig,
    catalog: Arc<RewardCatalog>,
    ledger: Arc<BehaviorLedger>,
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    points: PointsBook,
    unlock_locks: KeyedLocks,
    leaderboard_cache: LocalCache<&'static str, Arc<Vec<LeaderboardEntry>>>,
}

impl RewardsEngine {
    pub fn new(
        config: &RewardsConfig,
        catalog: Arc<RewardCatalog>,
        ledger: Arc<BehaviorLedger>,
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
    ) -> Self {
        info!(
            badges = catalog.badges().len(),
            achievements = catalog.achievements().len(),
            challenges = catalog.challenges().len(),
            scan_cap = config.leaderboard_scan_cap,
            "Rewards engine initialized"
        );
        Self {
            config: config.clone(),
            points: PointsBook::new(store.clone(), clock.clone(), config.write_retry.clone()),
            leaderboard_cache: LocalCache::new(
                "leaderboard",
                config.leaderboard_cache_ttl_secs,
                1,
                clock.clone(),
            ),
            catalog,
            ledger,
            store,
            clock,
            unlock_locks: KeyedLocks::new(),
        }
    }

    pub fn catalog(&self) -> &RewardCatalog {
        &self.catalog
    }

    /// Award the table value for `kind`, then re-evaluate unlocks. Kinds
    /// worth zero points are a no-op.
    pub async fn award_points(&self, user_id: &str, kind: EventKind) -> EngageResult<PointsAward> {
        require_user_id(user_id)?;
        let points = self.config.points_for(kind) as u64;
        if points == 0 {
            debug!(user_id = user_id, kind = %kind, "No points for event type");
            let (new_total, degraded) = match self.points.balance(user_id).await {
                Ok(total) => (total, false),
                Err(e) => {
                    debug!(user_id = user_id, error = %e, "Balance unreadable, reporting estimate");
                    (self.points.estimate(user_id), true)
                }
            };
            return Ok(PointsAward {
                user_id: user_id.to_string(),
                points_awarded: 0,
                new_total,
                degraded,
                badges_unlocked: Vec::new(),
                achievements_unlocked: Vec::new(),
            });
        }

        let credit = self.points.credit(user_id, points).await;
        self.invalidate_leaderboard();
        metrics::counter!("rewards.points_awarded").increment(points);

        let (badges_unlocked, achievements_unlocked) = self.evaluate_all(user_id).await;
        let bonus: u64 = badges_unlocked.iter().map(|b| b.points_award).sum::<u64>()
            + achievements_unlocked.iter().map(|a| a.points_award).sum::<u64>();

        info!(
            user_id = user_id,
            kind = %kind,
            points = points,
            bonus = bonus,
            degraded = credit.degraded,
            "Points awarded"
        );

        Ok(PointsAward {
            user_id: user_id.to_string(),
            points_awarded: points,
            new_total: credit.new_total + bonus,
            degraded: credit.degraded,
            badges_unlocked,
            achievements_unlocked,
        })
    }

    /// Evaluate badges and achievements, logging rather than returning
    /// failures.
    pub async fn evaluate_all(
        &self,
        user_id: &str,
    ) -> (Vec<BadgeDefinition>, Vec<AchievementDefinition>) {
        let badges = self.evaluate_badges(user_id).await.unwrap_or_else(|e| {
            warn!(user_id = user_id, error = %e, "Badge evaluation failed");
            Vec::new()
        });
        let achievements = self
            .evaluate_achievements(user_id)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id = user_id, error = %e, "Achievement evaluation failed");
                Vec::new()
            });
        (badges, achievements)
    }

    /// Unlock every badge whose condition now holds. Bonus points are
    /// credited directly and a single extra pass picks up badges those
    /// bonuses made reachable.
    pub async fn evaluate_badges(&self, user_id: &str) -> EngageResult<Vec<BadgeDefinition>> {
        self.evaluate_set(user_id, self.catalog.badges()).await
    }

    pub async fn evaluate_achievements(
        &self,
        user_id: &str,
    ) -> EngageResult<Vec<AchievementDefinition>> {
        self.evaluate_set(user_id, self.catalog.achievements()).await
    }

    async fn evaluate_set<D: Unlockable>(&self, user_id: &str, defs: &[D]) -> EngageResult<Vec<D>> {
        require_user_id(user_id)?;
        let _guard = self.unlock_locks.lock(user_id).await;

        let events = self.ledger.recent(user_id, self.config.condition_window).await?;
        let total_points = self.points.balance(user_id).await?;
        let mut ctx = ConditionContext::from_events(&events, total_points);
        let mut unlocks = self.load_unlocks(user_id).await?;
        let mut newly = Vec::new();

        for pass in 0..2 {
            let now = self.clock.now();
            let mut due = Vec::new();
            for def in defs {
                if unlocks.has(D::KIND, def.id()) || !def.condition().is_satisfied(&ctx) {
                    continue;
                }
                match unlocks.add(D::KIND, def.id(), now) {
                    Ok(()) => due.push(def.clone()),
                    Err(e) => debug!(user_id = user_id, error = %e, "Skipping unlock"),
                }
            }
            if due.is_empty() {
                break;
            }

            // Record first so a crash cannot pay a bonus twice
            self.save_unlocks(&unlocks).await?;

            for def in &due {
                metrics::counter!("rewards.unlocked", "kind" => D::KIND.as_str()).increment(1);
                info!(
                    user_id = user_id,
                    kind = D::KIND.as_str(),
                    id = def.id(),
                    pass = pass,
                    "Unlocked"
                );
                if def.bonus() > 0 {
                    let credit = self.points.credit(user_id, def.bonus()).await;
                    ctx.total_points = credit.new_total;
                    self.invalidate_leaderboard();
                }
            }
            newly.extend(due);
        }

        Ok(newly)
    }

    /// Manually grant a badge. Returns `None` when it was already unlocked.
    pub async fn unlock_badge(
        &self,
        user_id: &str,
        badge_id: &str,
    ) -> EngageResult<Option<BadgeDefinition>> {
        require_user_id(user_id)?;
        let badge = self
            .catalog
            .badge(badge_id)
            .ok_or_else(|| EngageError::NotFound(format!("badge '{badge_id}'")))?
            .clone();

        let _guard = self.unlock_locks.lock(user_id).await;
        let mut unlocks = self.load_unlocks(user_id).await?;
        if let Err(e) = unlocks.add(UnlockKind::Badge, &badge.id, self.clock.now()) {
            warn!(user_id = user_id, error = %e, "Duplicate badge unlock ignored");
            return Ok(None);
        }
        self.save_unlocks(&unlocks).await?;
        if badge.points_award > 0 {
            self.points.credit(user_id, badge.points_award).await;
            self.invalidate_leaderboard();
        }
        metrics::counter!("rewards.unlocked", "kind" => UnlockKind::Badge.as_str()).increment(1);
        Ok(Some(badge))
    }

    pub async fn user_badges(&self, user_id: &str) -> EngageResult<Vec<UnlockedBadge>> {
        Ok(self.load_unlocks(user_id).await?.badges)
    }

    pub async fn user_achievements(&self, user_id: &str) -> EngageResult<Vec<UnlockedAchievement>> {
        Ok(self.load_unlocks(user_id).await?.achievements)
    }

    /// Authoritative total plus any locally parked credit.
    pub async fn points(&self, user_id: &str) -> EngageResult<u64> {
        self.points.balance(user_id).await
    }

    pub async fn account(&self, user_id: &str) -> EngageResult<Option<PointsAccount>> {
        self.points.account(user_id).await
    }

    pub async fn set_display_name(&self, user_id: &str, name: &str) -> EngageResult<()> {
        require_user_id(user_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngageError::input("display name must not be empty"));
        }
        self.points.set_display_name(user_id, name).await?;
        self.invalidate_leaderboard();
        Ok(())
    }

    /// Flush parked points credits. Returns users settled.
    pub async fn reconcile_pending(&self) -> usize {
        let settled = self.points.reconcile_pending().await;
        if settled > 0 {
            self.invalidate_leaderboard();
        }
        settled
    }

    // ─── Leaderboard ───────────────────────────────────────────────────────

    async fn ranked(&self) -> EngageResult<Arc<Vec<LeaderboardEntry>>> {
        if let Some(cached) = self.leaderboard_cache.get(&LEADERBOARD_KEY) {
            return Ok(cached);
        }
        let accounts = self.points.scan(self.config.leaderboard_scan_cap).await?;
        let ranked = Arc::new(rank_accounts(accounts));
        self.leaderboard_cache.put(LEADERBOARD_KEY, ranked.clone());
        Ok(ranked)
    }

    /// Top `limit` entries. Store failures yield an empty board.
    pub async fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        match self.ranked().await {
            Ok(ranked) => ranked.iter().take(limit).cloned().collect(),
            Err(e) => {
                metrics::counter!("rewards.leaderboard_degraded").increment(1);
                warn!(error = %e, "Leaderboard unavailable, returning empty");
                Vec::new()
            }
        }
    }

    /// Rank on the current board. Like `leaderboard`, a store failure
    /// degrades to an empty board, so the user reads as not participating.
    pub async fn user_rank(&self, user_id: &str) -> EngageResult<UserRank> {
        require_user_id(user_id)?;
        let ranked = match self.ranked().await {
            Ok(ranked) => ranked,
            Err(e) => {
                metrics::counter!("rewards.leaderboard_degraded").increment(1);
                warn!(user_id = user_id, error = %e, "Leaderboard unavailable, rank unknown");
                return Ok(UserRank::NotParticipating);
            }
        };
        if let Some(entry) = ranked.iter().find(|e| e.user_id == user_id) {
            return Ok(UserRank::Ranked(entry.rank));
        }
        Ok(match self.points.account(user_id).await {
            Ok(Some(_)) => UserRank::BeyondScan,
            Ok(None) => UserRank::NotParticipating,
            Err(e) => {
                warn!(user_id = user_id, error = %e, "Points account unreadable, rank unknown");
                UserRank::NotParticipating
            }
        })
    }

    pub fn invalidate_leaderboard(&self) {
        self.leaderboard_cache.invalidate_all();
    }

    // ─── Challenges ────────────────────────────────────────────────────────

    pub fn active_challenges(&self) -> &[Challenge] {
        self.catalog.challenges()
    }

    pub async fn challenge_progress(
        &self,
        user_id: &str,
        challenge_id: &str,
    ) -> EngageResult<ChallengeProgress> {
        require_user_id(user_id)?;
        let challenge = self
            .catalog
            .challenge(challenge_id)
            .ok_or_else(|| EngageError::NotFound(format!("challenge '{challenge_id}'")))?;
        let events = self.ledger.recent(user_id, self.config.condition_window).await?;
        Ok(challenge.progress(&events, self.clock.now()))
    }

    // ─── Storage ───────────────────────────────────────────────────────────

    async fn load_unlocks(&self, user_id: &str) -> EngageResult<UserUnlocks> {
        Ok(load(self.store.as_ref(), collections::USER_UNLOCKS, user_id)
            .await?
            .unwrap_or_else(|| UserUnlocks::empty(user_id)))
    }

    async fn save_unlocks(&self, unlocks: &UserUnlocks) -> EngageResult<()> {
        let retry: &RetryPolicy = &self.config.write_retry;
        retry
            .run("unlocks.write", || {
                save(
                    self.store.as_ref(),
                    collections::USER_UNLOCKS,
                    &unlocks.user_id,
                    unlocks,
                )
            })
            .await
    }
}
