//! Rewards engine: points balances, badge and achievement unlocks,
//! leaderboards and time-boxed challenges.

pub mod catalog;
pub mod challenges;
pub mod conditions;
pub mod engine;
pub mod leaderboard;
pub mod points;

pub use catalog::{
    AchievementDefinition, AchievementTier, BadgeDefinition, RewardCatalog, UnlockCondition,
};
pub use challenges::{Challenge, ChallengeProgress};
pub use engine::{PointsAward, RewardsEngine, UnlockedAchievement, UnlockedBadge, UserRank};
pub use leaderboard::LeaderboardEntry;
pub use points::PointsAccount;
