//! Rule-based relevance scoring. Everything here is pure so rankings can be
//! reproduced from a profile and a candidate list alone.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::profile::RecommendationProfile;

pub const CATEGORY_WEIGHT: f64 = 10.0;
pub const PRICE_RANGE_WEIGHT: f64 = 5.0;
pub const VIEW_WEIGHT: f64 = 2.0;
pub const RATING_WEIGHT: f64 = 3.0;
pub const HIGH_RATING: f64 = 4.0;

const SIMILAR_BASE: f64 = 10.0;
const SIMILAR_PRICE_WEIGHT: f64 = 5.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    #[serde(default)]
    pub rating: Option<f64>,
    /// Catalog-wide view counter.
    #[serde(default)]
    pub views: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredItem {
    pub item: CatalogItem,
    pub score: f64,
}

/// Relevance of one item to a profile.
pub fn score_item(profile: &RecommendationProfile, item: &CatalogItem) -> f64 {
    let mut score = 0.0;
    if profile.is_top_category(&item.category) {
        score += CATEGORY_WEIGHT;
    }
    if profile
        .price_range
        .map(|r| r.contains(item.price))
        .unwrap_or(false)
    {
        score += PRICE_RANGE_WEIGHT;
    }
    score += VIEW_WEIGHT * profile.view_count(&item.id) as f64;
    if item.rating.map(|r| r >= HIGH_RATING).unwrap_or(false) {
        score += RATING_WEIGHT;
    }
    score
}

/// Score and sort candidates, highest first. Equal scores keep catalog order.
pub fn score_candidates(
    profile: &RecommendationProfile,
    candidates: &[CatalogItem],
) -> Vec<ScoredItem> {
    let mut scored: Vec<ScoredItem> = candidates
        .iter()
        .map(|item| ScoredItem {
            score: score_item(profile, item),
            item: item.clone(),
        })
        .collect();
    sort_desc(&mut scored);
    scored
}

/// Items in the reference item's category, closest price first. Empty when
/// the reference is not among the candidates.
pub fn similar_items(item_id: &str, candidates: &[CatalogItem], limit: usize) -> Vec<ScoredItem> {
    let Some(reference) = candidates.iter().find(|c| c.id == item_id) else {
        return Vec::new();
    };

    let mut scored: Vec<ScoredItem> = candidates
        .iter()
        .filter(|c| c.id != reference.id && c.category == reference.category)
        .map(|c| ScoredItem {
            score: SIMILAR_BASE + SIMILAR_PRICE_WEIGHT * price_similarity(reference.price, c.price),
            item: c.clone(),
        })
        .collect();
    sort_desc(&mut scored);
    scored.truncate(limit);
    scored
}

/// 1 for identical prices down to 0 for maximally different ones.
fn price_similarity(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max <= 0.0 {
        return 0.0;
    }
    (1.0 - (a - b).abs() / max).clamp(0.0, 1.0)
}

/// Most viewed items across the catalog.
pub fn trending(candidates: &[CatalogItem], limit: usize) -> Vec<ScoredItem> {
    let mut scored: Vec<ScoredItem> = candidates
        .iter()
        .map(|c| ScoredItem {
            score: c.views as f64,
            item: c.clone(),
        })
        .collect();
    sort_desc(&mut scored);
    scored.truncate(limit);
    scored
}

fn sort_desc(items: &mut [ScoredItem]) {
    items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}
