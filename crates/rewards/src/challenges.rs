//! Time-boxed challenges. Progress is derived from the ledger on read and
//! never stored.

use chrono::{DateTime, Duration, Utc};
use engage_core::{BehaviorEvent, EventKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Challenge {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Event kinds that count toward the target.
    pub kinds: Vec<EventKind>,
    pub target: u32,
    /// Trailing window, in days, that qualifying events must fall inside.
    pub window_days: i64,
    pub reward_points: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeProgress {
    pub challenge_id: String,
    pub progress: u32,
    pub target: u32,
    pub completed: bool,
}

impl Challenge {
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.window_days)
    }

    /// Count qualifying events inside the window, capped at the target.
    pub fn progress<'a>(
        &self,
        events: impl IntoIterator<Item = &'a BehaviorEvent>,
        now: DateTime<Utc>,
    ) -> ChallengeProgress {
        let since = self.window_start(now);
        let count = events
            .into_iter()
            .filter(|e| e.timestamp > since && e.timestamp <= now)
            .filter(|e| self.kinds.contains(&e.kind()))
            .count();
        let progress = (count.min(self.target as usize)) as u32;
        ChallengeProgress {
            challenge_id: self.id.clone(),
            progress,
            target: self.target,
            completed: progress >= self.target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RewardCatalog;
    use chrono::TimeZone;
    use engage_core::{EventPayload, PurchaseDetails};

    fn at(ts: DateTime<Utc>, payload: EventPayload) -> BehaviorEvent {
        BehaviorEvent {
            user_id: "u1".into(),
            seq: 0,
            timestamp: ts,
            payload,
        }
    }

    #[test]
    fn test_progress_counts_only_window() {
        let catalog = RewardCatalog::standard();
        let challenge = catalog.challenge("weekly_booking").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let booking = || EventPayload::BookEvent(PurchaseDetails::default());

        let events = vec![
            at(now - Duration::days(1), booking()),
            at(now - Duration::days(3), EventPayload::BookService(PurchaseDetails::default())),
            at(now - Duration::days(2), EventPayload::DailyLogin),
            at(now - Duration::days(8), booking()),
        ];
        let progress = challenge.progress(&events, now);
        assert_eq!(progress.progress, 2);
        assert_eq!(progress.target, 3);
        assert!(!progress.completed);
    }

    #[test]
    fn test_progress_capped_at_target() {
        let catalog = RewardCatalog::standard();
        let challenge = catalog.challenge("weekly_booking").unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let events: Vec<_> = (0..5)
            .map(|h| {
                at(
                    now - Duration::hours(h),
                    EventPayload::BookEvent(PurchaseDetails::default()),
                )
            })
            .collect();

        let progress = challenge.progress(&events, now);
        assert_eq!(progress.progress, 3);
        assert!(progress.completed);
    }
}
