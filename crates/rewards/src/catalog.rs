//! Static reward catalog: badges, achievements and challenges. Built once at
//! startup and shared read-only.

use std::collections::HashSet;

use engage_core::{EngageError, EngageResult, EventKind};
use serde::{Deserialize, Serialize};

use crate::challenges::Challenge;

// ─── Unlock Conditions ──────────────────────────────────────────────────────

/// Deterministic predicate over a ledger snapshot and a points total.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnlockCondition {
    /// At least one event of any of `kinds`.
    FirstActionOfType { kinds: Vec<EventKind> },
    /// At least `threshold` events across `kinds`.
    CountOfType { kinds: Vec<EventKind>, threshold: u32 },
    TotalPointsAtLeast { threshold: u64 },
    /// Longest run of consecutive calendar days (UTC) with a daily login.
    ConsecutiveDailyLogins { threshold: u32 },
    DistinctItemsViewed { threshold: u32 },
    /// Sum of amounts charged across bookings and completed orders.
    TotalSpendAtLeast { amount: f64 },
}

// ─── Definitions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BadgeDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    /// Bonus points granted once on unlock.
    pub points_award: u64,
    pub condition: UnlockCondition,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AchievementTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AchievementDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub tier: AchievementTier,
    pub points_award: u64,
    pub condition: UnlockCondition,
}

fn badge(
    id: &str,
    name: &str,
    description: &str,
    icon: &str,
    points_award: u64,
    condition: UnlockCondition,
) -> BadgeDefinition {
    BadgeDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        points_award,
        condition,
    }
}

fn achievement(
    id: &str,
    name: &str,
    description: &str,
    icon: &str,
    tier: AchievementTier,
    condition: UnlockCondition,
) -> AchievementDefinition {
    AchievementDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        tier,
        points_award: 0,
        condition,
    }
}

// ─── Catalog ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RewardCatalog {
    badges: Vec<BadgeDefinition>,
    achievements: Vec<AchievementDefinition>,
    challenges: Vec<Challenge>,
}

impl RewardCatalog {
    /// Build a catalog, rejecting duplicate ids within each section.
    pub fn new(
        badges: Vec<BadgeDefinition>,
        achievements: Vec<AchievementDefinition>,
        challenges: Vec<Challenge>,
    ) -> EngageResult<Self> {
        ensure_unique("badge", badges.iter().map(|b| b.id.as_str()))?;
        ensure_unique("achievement", achievements.iter().map(|a| a.id.as_str()))?;
        ensure_unique("challenge", challenges.iter().map(|c| c.id.as_str()))?;
        Ok(Self {
            badges,
            achievements,
            challenges,
        })
    }

    /// The venue app's launch catalog.
    pub fn standard() -> Self {
        let bookings = EventKind::BOOKINGS.to_vec();
        let badges = vec![
            badge(
                "first_steps",
                "First Steps",
                "Complete your first booking",
                "footsteps",
                100,
                UnlockCondition::FirstActionOfType {
                    kinds: bookings.clone(),
                },
            ),
            badge(
                "social_butterfly",
                "Social Butterfly",
                "Share the app 5 times",
                "share-social",
                50,
                UnlockCondition::CountOfType {
                    kinds: vec![EventKind::ShareApp],
                    threshold: 5,
                },
            ),
            badge(
                "review_master",
                "Review Master",
                "Submit 10 reviews",
                "star",
                75,
                UnlockCondition::CountOfType {
                    kinds: vec![EventKind::ReviewSubmitted],
                    threshold: 10,
                },
            ),
            badge(
                "loyal_customer",
                "Loyal Customer",
                "Make 10 bookings",
                "heart",
                200,
                UnlockCondition::CountOfType {
                    kinds: bookings.clone(),
                    threshold: 10,
                },
            ),
            badge(
                "early_bird",
                "Early Bird",
                "Login 7 days in a row",
                "sunny",
                50,
                UnlockCondition::ConsecutiveDailyLogins { threshold: 7 },
            ),
            badge(
                "power_user",
                "Power User",
                "Reach 1000 points",
                "flash",
                100,
                UnlockCondition::TotalPointsAtLeast { threshold: 1000 },
            ),
        ];

        let achievements = vec![
            achievement(
                "explorer",
                "Explorer",
                "Browse 50 different items",
                "compass",
                AchievementTier::Bronze,
                UnlockCondition::DistinctItemsViewed { threshold: 50 },
            ),
            achievement(
                "bookworm",
                "Bookworm",
                "Complete 5 bookings",
                "book",
                AchievementTier::Silver,
                UnlockCondition::CountOfType {
                    kinds: bookings.clone(),
                    threshold: 5,
                },
            ),
            achievement(
                "socialite",
                "Socialite",
                "Refer 3 friends",
                "people",
                AchievementTier::Gold,
                UnlockCondition::CountOfType {
                    kinds: vec![EventKind::Referral],
                    threshold: 3,
                },
            ),
            achievement(
                "vip",
                "VIP Member",
                "Spend $500 total",
                "diamond",
                AchievementTier::Platinum,
                UnlockCondition::TotalSpendAtLeast { amount: 500.0 },
            ),
        ];

        let challenges = vec![Challenge {
            id: "weekly_booking".to_string(),
            name: "Weekly Booking Challenge".to_string(),
            description: "Complete 3 bookings this week".to_string(),
            kinds: bookings,
            target: 3,
            window_days: 7,
            reward_points: 150,
        }];

        Self {
            badges,
            achievements,
            challenges,
        }
    }

    pub fn badges(&self) -> &[BadgeDefinition] {
        &self.badges
    }

    pub fn achievements(&self) -> &[AchievementDefinition] {
        &self.achievements
    }

    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }

    pub fn badge(&self, id: &str) -> Option<&BadgeDefinition> {
        self.badges.iter().find(|b| b.id == id)
    }

    pub fn achievement(&self, id: &str) -> Option<&AchievementDefinition> {
        self.achievements.iter().find(|a| a.id == id)
    }

    pub fn challenge(&self, id: &str) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.id == id)
    }
}

impl Default for RewardCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn ensure_unique<'a>(section: &str, ids: impl Iterator<Item = &'a str>) -> EngageResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(EngageError::Config(format!("duplicate {section} id '{id}'")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_shape() {
        let catalog = RewardCatalog::standard();
        assert_eq!(catalog.badges().len(), 6);
        assert_eq!(catalog.achievements().len(), 4);
        assert_eq!(catalog.badge("power_user").unwrap().points_award, 100);
        assert_eq!(
            catalog.achievement("vip").unwrap().tier,
            AchievementTier::Platinum
        );
        assert!(catalog.challenge("weekly_booking").is_some());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let catalog = RewardCatalog::standard();
        let mut badges = catalog.badges().to_vec();
        badges.push(badges[0].clone());
        let result = RewardCatalog::new(badges, Vec::new(), Vec::new());
        assert!(matches!(result, Err(EngageError::Config(_))));
    }

    #[test]
    fn test_condition_json_shape() {
        let json = serde_json::to_value(UnlockCondition::CountOfType {
            kinds: vec![EventKind::ShareApp],
            threshold: 5,
        })
        .unwrap();
        assert_eq!(json["type"], "count_of_type");
        assert_eq!(json["kinds"][0], "share_app");
    }
}
