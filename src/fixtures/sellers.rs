//! Seller Fixtures

use std::collections::BTreeMap;

use rusty_money::{Money, iso::Currency};
use serde::Deserialize;

use crate::{
    fixtures::{FixtureError, carts::parse_price},
    pricing::parse_percentage,
    rewards::{PercentageRule, ProductBonus, SellerRewards},
    shipping::{Region, ShippingPolicy},
};

/// Wrapper for seller policies in YAML
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SellersFixture {
    /// Policy for sellers missing from `sellers`
    pub default_policy: Option<ShippingFixture>,

    /// Policies keyed by seller id
    #[serde(default)]
    pub sellers: BTreeMap<String, SellerFixture>,
}

/// One seller's policies
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SellerFixture {
    /// Shipping policy
    pub shipping: Option<ShippingFixture>,

    /// Rewards rules
    pub rewards: Option<RewardsFixture>,
}

/// Shipping Policy Fixture
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShippingFixture {
    /// Flat fee below the threshold (e.g., "3000 JPY")
    pub flat_fee: String,

    /// Free-shipping threshold; omitted means shipping is never free
    pub free_shipping_threshold: Option<String>,

    /// Flat fee overrides per region
    #[serde(default)]
    pub regional_fees: BTreeMap<Region, String>,

    /// Fixed pickup cost
    pub pickup_fee: Option<String>,
}

impl ShippingFixture {
    /// Build the policy in `currency`.
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] if a price is malformed or uses another currency.
    pub fn try_into_policy(
        self,
        currency: &'static Currency,
    ) -> Result<ShippingPolicy<'static>, FixtureError> {
        let mut policy = ShippingPolicy::new(money(&self.flat_fee, currency)?);

        if let Some(threshold) = self.free_shipping_threshold {
            policy = policy.with_threshold(money(&threshold, currency)?);
        }

        for (region, fee) in self.regional_fees {
            policy = policy.with_region_fee(region, money(&fee, currency)?);
        }

        if let Some(pickup_fee) = self.pickup_fee {
            policy = policy.with_pickup_fee(money(&pickup_fee, currency)?);
        }

        Ok(policy)
    }
}

/// Rewards Fixture
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewardsFixture {
    /// Named percentage rules
    #[serde(default)]
    pub rules: Vec<RuleFixture>,

    /// Named once-per-product bonus
    pub bonus: Option<BonusFixture>,
}

/// Percentage Rule Fixture
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFixture {
    /// Rule name, matched against the run's reward toggles
    pub name: String,

    /// Rate (e.g., "1%" or "0.01")
    pub rate: String,
}

/// Bonus Fixture
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BonusFixture {
    /// Bonus name, matched against the run's reward toggles
    pub name: String,

    /// Bonus amount
    pub amount: String,

    /// Smallest unit price that earns the bonus
    pub min_price: String,
}

impl RewardsFixture {
    /// Build the rewards in `currency`.
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] if a rate or price is malformed.
    pub fn try_into_rewards(
        self,
        currency: &'static Currency,
    ) -> Result<SellerRewards<'static>, FixtureError> {
        let mut rewards = SellerRewards::new();

        for rule in self.rules {
            let rate = parse_percentage(&rule.rate)
                .map_err(|_err| FixtureError::InvalidPercentage(rule.rate.clone()))?;

            rewards = rewards.with_rule(PercentageRule::new(rule.name, rate));
        }

        if let Some(bonus) = self.bonus {
            rewards = rewards.with_bonus(ProductBonus::new(
                bonus.name,
                money(&bonus.amount, currency)?,
                money(&bonus.min_price, currency)?,
            ));
        }

        Ok(rewards)
    }
}

fn money(s: &str, currency: &'static Currency) -> Result<Money<'static, Currency>, FixtureError> {
    let (minor_units, parsed) = parse_price(s)?;

    if parsed != currency {
        return Err(FixtureError::CurrencyMismatch(
            currency.iso_alpha_code.to_string(),
            parsed.iso_alpha_code.to_string(),
        ));
    }

    Ok(Money::from_minor(minor_units, currency))
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::{GBP, JPY};

    use super::*;

    #[test]
    fn shipping_fixture_builds_policy() -> Result<(), Box<dyn std::error::Error>> {
        let fixture: ShippingFixture = serde_norway::from_str(
            "flat_fee: 3000 JPY\nfree_shipping_threshold: 30000 JPY\nregional_fees:\n  remote-a: 4500 JPY\n",
        )?;

        let policy = fixture.try_into_policy(JPY)?;

        assert_eq!(policy.flat_fee(Region::Default), &Money::from_minor(3_000, JPY));
        assert_eq!(policy.flat_fee(Region::RemoteA), &Money::from_minor(4_500, JPY));

        Ok(())
    }

    #[test]
    fn prices_must_match_the_cart_currency() -> Result<(), Box<dyn std::error::Error>> {
        let fixture: ShippingFixture = serde_norway::from_str("flat_fee: 3.00 GBP\n")?;

        assert!(matches!(
            fixture.try_into_policy(JPY),
            Err(FixtureError::CurrencyMismatch(expected, found)) if expected == "JPY" && found == "GBP"
        ));

        let fixture: ShippingFixture = serde_norway::from_str("flat_fee: 3.00 GBP\n")?;

        assert!(fixture.try_into_policy(GBP).is_ok());

        Ok(())
    }

    #[test]
    fn rewards_fixture_rejects_bad_rates() -> Result<(), Box<dyn std::error::Error>> {
        let fixture: RewardsFixture =
            serde_norway::from_str("rules:\n  - name: points\n    rate: lots\n")?;

        assert!(matches!(
            fixture.try_into_rewards(JPY),
            Err(FixtureError::InvalidPercentage(rate)) if rate == "lots"
        ));

        Ok(())
    }
}
