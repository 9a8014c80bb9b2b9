//! Pure evaluation of unlock conditions against a ledger snapshot.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use engage_core::{BehaviorEvent, EventKind, EventPayload};

use crate::catalog::UnlockCondition;

/// Aggregates of one user's ledger window plus their points total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionContext {
    pub counts: HashMap<EventKind, u32>,
    pub total_points: u64,
    pub longest_login_streak: u32,
    pub distinct_items_viewed: usize,
    pub total_spend: f64,
}

impl ConditionContext {
    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a BehaviorEvent>,
        total_points: u64,
    ) -> Self {
        let mut counts: HashMap<EventKind, u32> = HashMap::new();
        let mut login_days = BTreeSet::new();
        let mut viewed = HashSet::new();
        let mut total_spend = 0.0;

        for event in events {
            *counts.entry(event.kind()).or_insert(0) += 1;
            match &event.payload {
                EventPayload::DailyLogin => {
                    login_days.insert(event.timestamp.date_naive());
                }
                EventPayload::ViewItem { item_id, .. } => {
                    viewed.insert(item_id.as_str());
                }
                payload => {
                    if let Some(spend) = payload.purchase().and_then(|d| d.spend()) {
                        total_spend += spend;
                    }
                }
            }
        }

        Self {
            counts,
            total_points,
            longest_login_streak: longest_daily_streak(&login_days),
            distinct_items_viewed: viewed.len(),
            total_spend,
        }
    }

    pub fn count_of(&self, kinds: &[EventKind]) -> u32 {
        kinds
            .iter()
            .map(|k| self.counts.get(k).copied().unwrap_or(0))
            .sum()
    }
}

impl UnlockCondition {
    pub fn is_satisfied(&self, ctx: &ConditionContext) -> bool {
        match self {
            UnlockCondition::FirstActionOfType { kinds } => ctx.count_of(kinds) >= 1,
            UnlockCondition::CountOfType { kinds, threshold } => ctx.count_of(kinds) >= *threshold,
            UnlockCondition::TotalPointsAtLeast { threshold } => ctx.total_points >= *threshold,
            UnlockCondition::ConsecutiveDailyLogins { threshold } => {
                ctx.longest_login_streak >= *threshold
            }
            UnlockCondition::DistinctItemsViewed { threshold } => {
                ctx.distinct_items_viewed >= *threshold as usize
            }
            UnlockCondition::TotalSpendAtLeast { amount } => ctx.total_spend + 1e-9 >= *amount,
        }
    }
}

fn longest_daily_streak(days: &BTreeSet<NaiveDate>) -> u32 {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<NaiveDate> = None;
    for day in days {
        current = match previous {
            Some(prev) if prev.succ_opt() == Some(*day) => current + 1,
            _ => 1,
        };
        longest = longest.max(current);
        previous = Some(*day);
    }
    longest
}
