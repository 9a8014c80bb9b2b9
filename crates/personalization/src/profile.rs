//! Recommendation profile derived from a user's recent ledger.

use std::collections::HashMap;

use engage_core::config::PersonalizationConfig;
use engage_core::{BehaviorEvent, EventPayload};
use serde::{Deserialize, Serialize};

const MAX_SEARCH_TERMS: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }

    fn widen(range: Option<Self>, price: f64) -> Option<Self> {
        Some(match range {
            Some(r) => Self {
                min: r.min.min(price),
                max: r.max.max(price),
            },
            None => Self {
                min: price,
                max: price,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counted {
    pub key: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecommendationProfile {
    pub user_id: String,
    /// Top categories by interaction count, strongest first.
    pub category_affinity: Vec<Counted>,
    /// From bookings and completed orders only; views never widen it.
    pub price_range: Option<PriceRange>,
    /// Most viewed items, strongest first.
    pub viewed_item_counts: Vec<Counted>,
    pub booking_frequency: u32,
    pub average_booking_value: f64,
    /// Recent search queries, newest first.
    pub search_terms: Vec<String>,
    pub events_considered: usize,
}

impl RecommendationProfile {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_top_category(&self, category: &str) -> bool {
        self.category_affinity.iter().any(|c| c.key == category)
    }

    pub fn view_count(&self, item_id: &str) -> u32 {
        self.viewed_item_counts
            .iter()
            .find(|c| c.key == item_id)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    pub fn top_categories(&self) -> impl Iterator<Item = &str> {
        self.category_affinity.iter().map(|c| c.key.as_str())
    }
}

/// Counts keyed by string, remembering first appearance for tie-breaks.
#[derive(Default)]
struct Tally {
    counts: HashMap<String, (u32, usize)>,
}

impl Tally {
    fn bump(&mut self, key: &str) {
        let order = self.counts.len();
        self.counts
            .entry(key.to_string())
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, order));
    }

    fn top(self, k: usize) -> Vec<Counted> {
        let mut rows: Vec<(String, u32, usize)> = self
            .counts
            .into_iter()
            .map(|(key, (count, order))| (key, count, order))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        rows.into_iter()
            .take(k)
            .map(|(key, count, _)| Counted { key, count })
            .collect()
    }
}

/// Fold a newest-first event stream into a profile.
pub fn build_profile(
    user_id: &str,
    events: &[BehaviorEvent],
    config: &PersonalizationConfig,
) -> RecommendationProfile {
    let mut categories = Tally::default();
    let mut views = Tally::default();
    let mut price_range = None;
    let mut booking_frequency = 0u32;
    let mut spend_total = 0.0;
    let mut spend_samples = 0u32;
    let mut search_terms = Vec::new();

    for event in events {
        match &event.payload {
            EventPayload::ViewItem {
                item_id, category, ..
            } => {
                views.bump(item_id);
                if let Some(category) = category {
                    categories.bump(category);
                }
            }
            EventPayload::Search { query } => {
                if search_terms.len() < MAX_SEARCH_TERMS {
                    search_terms.push(query.clone());
                }
            }
            payload => {
                let Some(details) = payload.purchase() else {
                    continue;
                };
                if let Some(category) = &details.category {
                    categories.bump(category);
                }
                if let Some(price) = details.price.or(details.amount) {
                    price_range = PriceRange::widen(price_range, price);
                }
                if event.kind().is_booking() {
                    booking_frequency += 1;
                    if let Some(spend) = details.spend() {
                        spend_total += spend;
                        spend_samples += 1;
                    }
                }
            }
        }
    }

    RecommendationProfile {
        user_id: user_id.to_string(),
        category_affinity: categories.top(config.top_categories),
        price_range,
        viewed_item_counts: views.top(config.top_viewed_items),
        booking_frequency,
        average_booking_value: if spend_samples > 0 {
            spend_total / spend_samples as f64
        } else {
            0.0
        },
        search_terms,
        events_considered: events.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use engage_core::PurchaseDetails;

    fn stream(payloads: Vec<EventPayload>) -> Vec<BehaviorEvent> {
        let ts = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| BehaviorEvent {
                user_id: "u1".into(),
                seq: i as u64,
                timestamp: ts,
                payload,
            })
            .collect()
    }

    fn view(item: &str, category: &str, price: f64) -> EventPayload {
        EventPayload::ViewItem {
            item_id: item.into(),
            category: Some(category.into()),
            price: Some(price),
        }
    }

    fn booking(category: &str, price: f64, amount: Option<f64>) -> EventPayload {
        EventPayload::BookEvent(PurchaseDetails {
            item_id: None,
            category: Some(category.into()),
            price: Some(price),
            amount,
        })
    }

    #[test]
    fn test_empty_ledger_gives_empty_profile() {
        let profile = build_profile("u1", &[], &PersonalizationConfig::default());
        assert_eq!(profile, RecommendationProfile::empty("u1"));
        assert!(profile.price_range.is_none());
    }

    #[test]
    fn test_price_range_ignores_views() {
        let events = stream(vec![
            view("a", "comedy", 500.0),
            booking("comedy", 30.0, None),
            booking("comedy", 80.0, Some(70.0)),
        ]);
        let profile = build_profile("u1", &events, &PersonalizationConfig::default());
        assert_eq!(profile.price_range, Some(PriceRange { min: 30.0, max: 80.0 }));
        assert_eq!(profile.booking_frequency, 2);
        // amount wins over price when present
        assert!((profile.average_booking_value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_k_with_first_appearance_ties() {
        let config = PersonalizationConfig {
            top_categories: 2,
            ..Default::default()
        };
        let events = stream(vec![
            view("a", "jazz", 10.0),
            view("b", "rock", 10.0),
            view("c", "folk", 10.0),
            view("c", "folk", 10.0),
        ]);
        let profile = build_profile("u1", &events, &config);
        let top: Vec<&str> = profile.top_categories().collect();
        assert_eq!(top, vec!["folk", "jazz"]);
        assert_eq!(profile.view_count("c"), 2);
        assert_eq!(profile.view_count("zzz"), 0);
    }

    #[test]
    fn test_orders_do_not_count_as_bookings() {
        let events = stream(vec![
            EventPayload::OrderCompleted(PurchaseDetails {
                price: Some(12.0),
                ..Default::default()
            }),
            EventPayload::Search {
                query: "brunch".into(),
            },
        ]);
        let profile = build_profile("u1", &events, &PersonalizationConfig::default());
        assert_eq!(profile.booking_frequency, 0);
        assert_eq!(profile.price_range, Some(PriceRange { min: 12.0, max: 12.0 }));
        assert_eq!(profile.search_terms, vec!["brunch".to_string()]);
    }

    #[test]
    fn test_amount_only_booking_sets_price_range() {
        let events = stream(vec![EventPayload::BookEvent(PurchaseDetails {
            amount: Some(40.0),
            ..Default::default()
        })]);
        let profile = build_profile("u1", &events, &PersonalizationConfig::default());
        assert_eq!(profile.price_range, Some(PriceRange { min: 40.0, max: 40.0 }));
        assert!((profile.average_booking_value - 40.0).abs() < 1e-9);
    }
}
