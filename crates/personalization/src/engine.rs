//! On-demand personalization: cached profiles, ranked recommendations and
//! personalized prices. Read paths degrade to an empty profile instead of
//! failing when the ledger is unavailable.

use std::sync::Arc;

use engage_cache::LocalCache;
use engage_core::config::PersonalizationConfig;
use engage_core::error::require_user_id;
use engage_core::store::{collections, load, save};
use engage_core::{DocumentStore, EngageResult, SharedClock};
use engage_ledger::BehaviorLedger;
use tracing::{debug, info, warn};

use crate::pricing::{self, PriceQuote, PricingPreferences};
use crate::profile::{build_profile, RecommendationProfile};
use crate::scorer::{self, CatalogItem, ScoredItem};

pub struct PersonalizationEngine {
    config: PersonalizationConfig,
    ledger: Arc<BehaviorLedger>,
    store: Arc<dyn DocumentStore>,
    profiles: LocalCache<String, Arc<RecommendationProfile>>,
}

impl PersonalizationEngine {
    pub fn new(
        config: &PersonalizationConfig,
        ledger: Arc<BehaviorLedger>,
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
    ) -> Self {
        info!(
            profile_window = config.profile_window,
            max_candidates = config.max_candidates,
            cache_ttl_secs = config.profile_cache_ttl_secs,
            "Personalization engine initialized"
        );
        Self {
            profiles: LocalCache::new(
                "profile",
                config.profile_cache_ttl_secs,
                config.max_cached_profiles,
                clock,
            ),
            config: config.clone(),
            ledger,
            store,
        }
    }

    /// Profile over the recent ledger window, served from cache when fresh.
    pub async fn build_profile(&self, user_id: &str) -> EngageResult<Arc<RecommendationProfile>> {
        require_user_id(user_id)?;
        let key = user_id.to_string();
        if let Some(profile) = self.profiles.get(&key) {
            return Ok(profile);
        }

        match self.ledger.recent(user_id, self.config.profile_window).await {
            Ok(events) => {
                let profile = Arc::new(build_profile(user_id, &events, &self.config));
                self.profiles.put(key, profile.clone());
                metrics::counter!("personalization.profile_built").increment(1);
                debug!(
                    user_id = user_id,
                    events = profile.events_considered,
                    bookings = profile.booking_frequency,
                    "Profile built"
                );
                Ok(profile)
            }
            Err(e) => {
                metrics::counter!("personalization.profile_degraded").increment(1);
                warn!(user_id = user_id, error = %e, "Ledger unavailable, using empty profile");
                Ok(Arc::new(RecommendationProfile::empty(user_id)))
            }
        }
    }

    pub fn invalidate_profile(&self, user_id: &str) {
        self.profiles.invalidate(&user_id.to_string());
    }

    fn capped<'a>(&self, candidates: &'a [CatalogItem]) -> &'a [CatalogItem] {
        if candidates.len() > self.config.max_candidates {
            debug!(
                offered = candidates.len(),
                cap = self.config.max_candidates,
                "Candidate pool truncated"
            );
            &candidates[..self.config.max_candidates]
        } else {
            candidates
        }
    }

    pub async fn recommend(
        &self,
        user_id: &str,
        candidates: &[CatalogItem],
        limit: usize,
    ) -> EngageResult<Vec<ScoredItem>> {
        let profile = self.build_profile(user_id).await?;
        let mut ranked = scorer::score_candidates(&profile, self.capped(candidates));
        ranked.truncate(limit);
        metrics::counter!("personalization.recommendations").increment(1);
        Ok(ranked)
    }

    pub fn similar_items(
        &self,
        item_id: &str,
        candidates: &[CatalogItem],
        limit: usize,
    ) -> Vec<ScoredItem> {
        scorer::similar_items(item_id, self.capped(candidates), limit)
    }

    pub fn trending(&self, candidates: &[CatalogItem], limit: usize) -> Vec<ScoredItem> {
        scorer::trending(self.capped(candidates), limit)
    }

    pub async fn personalized_price(
        &self,
        user_id: &str,
        base_price: f64,
    ) -> EngageResult<PriceQuote> {
        require_user_id(user_id)?;
        // Reject bad input before touching storage
        pricing::apply_discount(base_price, 0)?;

        let profile = self.build_profile(user_id).await?;
        let prefs = match self.pricing_preferences(user_id).await {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(
                    user_id = user_id,
                    error = %e,
                    "Pricing preferences unavailable, using defaults"
                );
                PricingPreferences::default()
            }
        };

        let quote = pricing::quote(base_price, profile.booking_frequency, &prefs)?;
        metrics::counter!("personalization.price_quoted").increment(1);
        if let Some(reason) = quote.reason {
            debug!(
                user_id = user_id,
                reason = %reason,
                percent = quote.discount_percent,
                "Personalized discount applied"
            );
        }
        Ok(quote)
    }

    pub async fn pricing_preferences(&self, user_id: &str) -> EngageResult<PricingPreferences> {
        require_user_id(user_id)?;
        Ok(
            load(self.store.as_ref(), collections::PRICING_PREFERENCES, user_id)
                .await?
                .unwrap_or_default(),
        )
    }

    pub async fn update_pricing_preferences(
        &self,
        user_id: &str,
        prefs: &PricingPreferences,
    ) -> EngageResult<()> {
        require_user_id(user_id)?;
        prefs.validate()?;
        save(self.store.as_ref(), collections::PRICING_PREFERENCES, user_id, prefs).await
    }
}
