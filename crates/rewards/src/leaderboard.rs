//! Leaderboard ranking. The ordering is a pure function of the account rows
//! so repeated reads over the same rows always agree.

use serde::{Deserialize, Serialize};

use crate::points::PointsAccount;

pub const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// 1-based.
    pub rank: usize,
    pub user_id: String,
    pub display_name: String,
    pub points: u64,
}

/// Rank accounts by points descending, then account creation ascending,
/// then user id.
pub fn rank_accounts(mut accounts: Vec<PointsAccount>) -> Vec<LeaderboardEntry> {
    accounts.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    accounts
        .into_iter()
        .enumerate()
        .map(|(i, account)| LeaderboardEntry {
            rank: i + 1,
            display_name: account
                .display_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| ANONYMOUS.to_string()),
            user_id: account.user_id,
            points: account.total_points,
        })
        .collect()
}
