//! Recommendation and pricing scorer: per-user affinity profiles derived
//! from the behavior ledger, rule-based ranking and personalized discounts.

pub mod engine;
pub mod pricing;
pub mod profile;
pub mod scorer;

pub use engine::PersonalizationEngine;
pub use pricing::{DiscountReason, PriceQuote, PricingPreferences};
pub use profile::{PriceRange, RecommendationProfile};
pub use scorer::{CatalogItem, ScoredItem};
