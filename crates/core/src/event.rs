//! Behavior event model: one tagged variant per interaction type, each
//! carrying only the fields that interaction needs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngageError, EngageResult};

// ─── Event Kinds ────────────────────────────────────────────────────────────

/// Payload-free discriminant of [`EventPayload`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ViewItem,
    Search,
    BookEvent,
    BookService,
    OrderCompleted,
    PaymentSuccess,
    ReviewSubmitted,
    ShareApp,
    Referral,
    FeatureUsed,
    DailyLogin,
    MultipleSessions,
    ProfileCompleted,
    WeeklyActive,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::ViewItem,
        EventKind::Search,
        EventKind::BookEvent,
        EventKind::BookService,
        EventKind::OrderCompleted,
        EventKind::PaymentSuccess,
        EventKind::ReviewSubmitted,
        EventKind::ShareApp,
        EventKind::Referral,
        EventKind::FeatureUsed,
        EventKind::DailyLogin,
        EventKind::MultipleSessions,
        EventKind::ProfileCompleted,
        EventKind::WeeklyActive,
    ];

    /// Booking kinds that count toward booking frequency.
    pub const BOOKINGS: [EventKind; 2] = [EventKind::BookEvent, EventKind::BookService];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ViewItem => "view_item",
            EventKind::Search => "search",
            EventKind::BookEvent => "book_event",
            EventKind::BookService => "book_service",
            EventKind::OrderCompleted => "order_completed",
            EventKind::PaymentSuccess => "payment_success",
            EventKind::ReviewSubmitted => "review_submitted",
            EventKind::ShareApp => "share_app",
            EventKind::Referral => "referral",
            EventKind::FeatureUsed => "feature_used",
            EventKind::DailyLogin => "daily_login",
            EventKind::MultipleSessions => "multiple_sessions",
            EventKind::ProfileCompleted => "profile_completed",
            EventKind::WeeklyActive => "weekly_active",
        }
    }

    pub fn is_booking(&self) -> bool {
        Self::BOOKINGS.contains(self)
    }

    /// Bookings plus completed orders: the events that reveal what a user
    /// actually pays.
    pub fn is_purchase(&self) -> bool {
        self.is_booking() || matches!(self, EventKind::OrderCompleted)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EngageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EngageError::input(format!("unknown event type '{s}'")))
    }
}

// ─── Payloads ───────────────────────────────────────────────────────────────

/// Details shared by bookings and completed orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PurchaseDetails {
    pub item_id: Option<String>,
    pub category: Option<String>,
    /// Listed unit price of the item.
    pub price: Option<f64>,
    /// Amount actually charged.
    pub amount: Option<f64>,
}

impl PurchaseDetails {
    /// Amount charged, falling back to the listed price.
    pub fn spend(&self) -> Option<f64> {
        self.amount.or(self.price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ViewItem {
        item_id: String,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        price: Option<f64>,
    },
    Search {
        query: String,
    },
    BookEvent(PurchaseDetails),
    BookService(PurchaseDetails),
    OrderCompleted(PurchaseDetails),
    PaymentSuccess {
        amount: f64,
    },
    ReviewSubmitted {
        #[serde(default)]
        item_id: Option<String>,
        rating: u8,
    },
    ShareApp {
        #[serde(default)]
        channel: Option<String>,
    },
    Referral {
        #[serde(default)]
        referred_user_id: Option<String>,
    },
    FeatureUsed {
        feature: String,
    },
    DailyLogin,
    MultipleSessions {
        session_count: u32,
    },
    ProfileCompleted,
    WeeklyActive,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ViewItem { .. } => EventKind::ViewItem,
            EventPayload::Search { .. } => EventKind::Search,
            EventPayload::BookEvent(_) => EventKind::BookEvent,
            EventPayload::BookService(_) => EventKind::BookService,
            EventPayload::OrderCompleted(_) => EventKind::OrderCompleted,
            EventPayload::PaymentSuccess { .. } => EventKind::PaymentSuccess,
            EventPayload::ReviewSubmitted { .. } => EventKind::ReviewSubmitted,
            EventPayload::ShareApp { .. } => EventKind::ShareApp,
            EventPayload::Referral { .. } => EventKind::Referral,
            EventPayload::FeatureUsed { .. } => EventKind::FeatureUsed,
            EventPayload::DailyLogin => EventKind::DailyLogin,
            EventPayload::MultipleSessions { .. } => EventKind::MultipleSessions,
            EventPayload::ProfileCompleted => EventKind::ProfileCompleted,
            EventPayload::WeeklyActive => EventKind::WeeklyActive,
        }
    }

    /// Purchase details for bookings and completed orders.
    pub fn purchase(&self) -> Option<&PurchaseDetails> {
        match self {
            EventPayload::BookEvent(d)
            | EventPayload::BookService(d)
            | EventPayload::OrderCompleted(d) => Some(d),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            EventPayload::ViewItem { category, .. } => category.as_deref(),
            _ => self.purchase().and_then(|d| d.category.as_deref()),
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            EventPayload::ViewItem { item_id, .. } => Some(item_id.as_str()),
            EventPayload::ReviewSubmitted { item_id, .. } => item_id.as_deref(),
            _ => self.purchase().and_then(|d| d.item_id.as_deref()),
        }
    }

    /// Reject payloads that must never reach the ledger.
    pub fn validate(&self) -> EngageResult<()> {
        match self {
            EventPayload::ViewItem { item_id, price, .. } => {
                require_text("item_id", item_id)?;
                check_money("price", *price)
            }
            EventPayload::Search { query } => require_text("query", query),
            EventPayload::BookEvent(d)
            | EventPayload::BookService(d)
            | EventPayload::OrderCompleted(d) => {
                if let Some(item_id) = &d.item_id {
                    require_text("item_id", item_id)?;
                }
                check_money("price", d.price)?;
                check_money("amount", d.amount)
            }
            EventPayload::PaymentSuccess { amount } => check_money("amount", Some(*amount)),
            EventPayload::ReviewSubmitted { rating, .. } => {
                if !(1..=5).contains(rating) {
                    return Err(EngageError::input(format!(
                        "rating must be between 1 and 5, got {rating}"
                    )));
                }
                Ok(())
            }
            EventPayload::FeatureUsed { feature } => require_text("feature", feature),
            EventPayload::MultipleSessions { session_count } if *session_count == 0 => {
                Err(EngageError::input("session_count must be positive"))
            }
            _ => Ok(()),
        }
    }
}

fn require_text(field: &str, value: &str) -> EngageResult<()> {
    if value.trim().is_empty() {
        return Err(EngageError::input(format!("{field} must not be empty")));
    }
    Ok(())
}

fn check_money(field: &str, value: Option<f64>) -> EngageResult<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(EngageError::input(format!(
            "{field} must be a non-negative number, got {v}"
        ))),
        _ => Ok(()),
    }
}

// ─── Ledger Entry ───────────────────────────────────────────────────────────

/// One immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BehaviorEvent {
    pub user_id: String,
    /// Per-user insertion sequence, strictly increasing.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl BehaviorEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!(matches!(
            "teleport".parse::<EventKind>(),
            Err(EngageError::Input(_))
        ));
    }

    #[test]
    fn test_payload_json_shape() {
        let payload: EventPayload = serde_json::from_str(
            r#"{"type":"book_event","item_id":"gala","category":"concerts","price":40.0}"#,
        )
        .unwrap();
        assert_eq!(payload.kind(), EventKind::BookEvent);
        assert_eq!(payload.category(), Some("concerts"));
        assert_eq!(payload.purchase().unwrap().spend(), Some(40.0));

        let login: EventPayload = serde_json::from_str(r#"{"type":"daily_login"}"#).unwrap();
        assert_eq!(login, EventPayload::DailyLogin);
    }

    #[test]
    fn test_validate_rejects_bad_rating() {
        let review = EventPayload::ReviewSubmitted {
            item_id: None,
            rating: 6,
        };
        assert!(matches!(review.validate(), Err(EngageError::Input(_))));
    }

    #[test]
    fn test_validate_rejects_negative_amount() {
        let order = EventPayload::OrderCompleted(PurchaseDetails {
            amount: Some(-3.0),
            ..Default::default()
        });
        assert!(order.validate().is_err());

        let view = EventPayload::ViewItem {
            item_id: " ".into(),
            category: None,
            price: None,
        };
        assert!(view.validate().is_err());
    }

    #[test]
    fn test_purchase_classification() {
        assert!(EventKind::BookService.is_booking());
        assert!(!EventKind::OrderCompleted.is_booking());
        assert!(EventKind::OrderCompleted.is_purchase());
        assert!(!EventKind::ViewItem.is_purchase());
    }
}
