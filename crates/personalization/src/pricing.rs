//! Personalized discount tiers. Tiers are checked in order and the first
//! match wins; discounts never stack.

use engage_core::{EngageError, EngageResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DiscountReason {
    #[serde(rename = "First-Time Buyer")]
    FirstTimeBuyer,
    #[serde(rename = "Loyalty Discount")]
    LoyaltyDiscount,
    #[serde(rename = "Volume Discount")]
    VolumeDiscount,
    #[serde(rename = "Frequent Customer")]
    FrequentCustomer,
}

impl DiscountReason {
    pub fn label(&self) -> &'static str {
        match self {
            DiscountReason::FirstTimeBuyer => "First-Time Buyer",
            DiscountReason::LoyaltyDiscount => "Loyalty Discount",
            DiscountReason::VolumeDiscount => "Volume Discount",
            DiscountReason::FrequentCustomer => "Frequent Customer",
        }
    }

    pub fn percent(&self) -> u32 {
        match self {
            DiscountReason::FirstTimeBuyer => 15,
            DiscountReason::LoyaltyDiscount => 10,
            DiscountReason::VolumeDiscount => 8,
            DiscountReason::FrequentCustomer => 5,
        }
    }
}

impl std::fmt::Display for DiscountReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingPreferences {
    #[serde(default = "default_first_time_buyer")]
    pub first_time_buyer: bool,
    #[serde(default)]
    pub volume_discount: bool,
    #[serde(default = "default_typical_quantity")]
    pub typical_quantity: u32,
}

fn default_first_time_buyer() -> bool {
    true
}
fn default_typical_quantity() -> u32 {
    1
}

impl Default for PricingPreferences {
    fn default() -> Self {
        Self {
            first_time_buyer: default_first_time_buyer(),
            volume_discount: false,
            typical_quantity: default_typical_quantity(),
        }
    }
}

impl PricingPreferences {
    pub fn validate(&self) -> EngageResult<()> {
        if self.typical_quantity == 0 {
            return Err(EngageError::input("typical_quantity must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub base_price: f64,
    pub final_price: f64,
    pub discount_percent: u32,
    pub reason: Option<DiscountReason>,
}

/// The single applicable tier for a booking history and preferences.
pub fn resolve_tier(booking_frequency: u32, prefs: &PricingPreferences) -> Option<DiscountReason> {
    if booking_frequency == 0 && prefs.first_time_buyer {
        Some(DiscountReason::FirstTimeBuyer)
    } else if booking_frequency >= 10 {
        Some(DiscountReason::LoyaltyDiscount)
    } else if prefs.volume_discount && prefs.typical_quantity >= 3 {
        Some(DiscountReason::VolumeDiscount)
    } else if booking_frequency >= 5 {
        Some(DiscountReason::FrequentCustomer)
    } else {
        None
    }
}

/// `base × (1 − percent/100)` rounded half-up to cents. Computed on scaled
/// integers so binary float error cannot push a half cent the wrong way.
pub fn apply_discount(base_price: f64, percent: u32) -> EngageResult<f64> {
    if !base_price.is_finite() || base_price < 0.0 {
        return Err(EngageError::input(format!(
            "base price must be a non-negative amount, got {base_price}"
        )));
    }
    if percent > 100 {
        return Err(EngageError::input(format!("discount {percent}% exceeds 100%")));
    }
    // Ten-thousandths of a unit, then scaled by the remaining percentage
    let base_units = (base_price * 10_000.0).round() as u128;
    let scaled = base_units * (100 - percent) as u128;
    let cents = (scaled + 5_000) / 10_000;
    Ok(cents as f64 / 100.0)
}

pub fn quote(
    base_price: f64,
    booking_frequency: u32,
    prefs: &PricingPreferences,
) -> EngageResult<PriceQuote> {
    let reason = resolve_tier(booking_frequency, prefs);
    let discount_percent = reason.map(|r| r.percent()).unwrap_or(0);
    Ok(PriceQuote {
        base_price,
        final_price: apply_discount(base_price, discount_percent)?,
        discount_percent,
        reason,
    })
}
