//! Loyalty Rewards
//!
//! Sellers reward purchases with points worth their face value in the cart currency. A
//! seller has any number of named percentage rules, which stack, and at most one named
//! once-per-product bonus. Which named rules apply is decided per run by [`RewardToggles`];
//! a rule missing from the toggles is off.

use std::collections::BTreeMap;

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use rustc_hash::FxHashSet;
use rusty_money::{Money, iso::Currency};
use serde::Deserialize;
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    offers::SellerId,
    pricing::{PricingError, line_total, percent_of_minor, percentage_value},
    products::ProductKey,
};

/// Errors related to rewards rules.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewardsError {
    /// A percentage rule is outside `0%..=100%` (seller, rule).
    #[error("reward rule {1} of seller {0} must be between 0% and 100%")]
    InvalidRate(String, String),

    /// A bonus amount is in a different currency than the table (seller, bonus currency, table currency).
    #[error("Bonus of seller {0} has currency {1}, but the table has currency {2}")]
    CurrencyMismatch(String, &'static str, &'static str),

    /// A bonus amount or minimum price is negative.
    #[error("Bonus of seller {0} has a negative amount")]
    NegativeAmount(String),

    /// Wrapped arithmetic error.
    #[error(transparent)]
    Pricing(#[from] PricingError),
}

/// A named percentage-of-price reward.
#[derive(Debug, Clone)]
pub struct PercentageRule {
    name: String,
    rate: Percentage,
}

impl PercentageRule {
    /// Create a rule.
    pub fn new(name: impl Into<String>, rate: Percentage) -> Self {
        Self {
            name: name.into(),
            rate,
        }
    }

    /// Rule name, as used in [`RewardToggles`]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reward rate
    pub fn rate(&self) -> &Percentage {
        &self.rate
    }
}

/// A named bonus paid once per product identity, for copies priced at or above `min_price`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductBonus<'a> {
    name: String,
    amount: Money<'a, Currency>,
    min_price: Money<'a, Currency>,
}

impl<'a> ProductBonus<'a> {
    /// Create a bonus.
    pub fn new(
        name: impl Into<String>,
        amount: Money<'a, Currency>,
        min_price: Money<'a, Currency>,
    ) -> Self {
        Self {
            name: name.into(),
            amount,
            min_price,
        }
    }

    /// Bonus name, as used in [`RewardToggles`]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bonus paid
    pub fn amount(&self) -> &Money<'a, Currency> {
        &self.amount
    }

    /// Minimum unit price that qualifies
    pub fn min_price(&self) -> &Money<'a, Currency> {
        &self.min_price
    }
}

/// Rewards offered by one seller.
#[derive(Debug, Clone, Default)]
pub struct SellerRewards<'a> {
    rules: Vec<PercentageRule>,
    bonus: Option<ProductBonus<'a>>,
}

impl<'a> SellerRewards<'a> {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a percentage rule.
    #[must_use]
    pub fn with_rule(mut self, rule: PercentageRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Set the once-per-product bonus.
    #[must_use]
    pub fn with_bonus(mut self, bonus: ProductBonus<'a>) -> Self {
        self.bonus = Some(bonus);
        self
    }

    /// Percentage rules
    pub fn rules(&self) -> &[PercentageRule] {
        &self.rules
    }

    /// Once-per-product bonus
    pub fn bonus(&self) -> Option<&ProductBonus<'a>> {
        self.bonus.as_ref()
    }
}

/// Rewards rules keyed by seller id.
#[derive(Debug, Clone)]
pub struct RewardsTable<'a> {
    currency: &'static Currency,
    sellers: BTreeMap<SellerId, SellerRewards<'a>>,
}

impl<'a> RewardsTable<'a> {
    /// Create an empty table.
    pub fn new(currency: &'static Currency) -> Self {
        Self {
            currency,
            sellers: BTreeMap::new(),
        }
    }

    /// Add or replace the rewards of a seller.
    ///
    /// # Errors
    ///
    /// Returns a [`RewardsError`] if a rate is outside `0%..=100%` or a bonus amount is
    /// negative or in another currency.
    pub fn insert(
        &mut self,
        seller: impl Into<SellerId>,
        rewards: SellerRewards<'a>,
    ) -> Result<(), RewardsError> {
        let seller = seller.into();

        for rule in rewards.rules() {
            let rate = percentage_value(rule.rate());

            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(RewardsError::InvalidRate(
                    seller.to_string(),
                    rule.name().to_string(),
                ));
            }
        }

        if let Some(bonus) = rewards.bonus() {
            for amount in [bonus.amount(), bonus.min_price()] {
                if amount.currency() != self.currency {
                    return Err(RewardsError::CurrencyMismatch(
                        seller.to_string(),
                        amount.currency().iso_alpha_code,
                        self.currency.iso_alpha_code,
                    ));
                }

                if amount.to_minor_units() < 0 {
                    return Err(RewardsError::NegativeAmount(seller.to_string()));
                }
            }
        }

        self.sellers.insert(seller, rewards);

        Ok(())
    }

    /// Get the rewards of a seller.
    pub fn get(&self, seller: &SellerId) -> Option<&SellerRewards<'a>> {
        self.sellers.get(seller)
    }

    /// Currency of every amount in the table
    pub fn currency(&self) -> &'static Currency {
        self.currency
    }
}

/// Which named reward rules are active for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RewardToggles(BTreeMap<String, bool>);

impl RewardToggles {
    /// Create toggles with every rule off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch a rule on or off.
    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.0.insert(name.into(), enabled);
    }

    /// Switch a rule on.
    #[must_use]
    pub fn with_enabled(mut self, name: impl Into<String>) -> Self {
        self.set(name, true);
        self
    }

    /// Whether the named rule is on. Rules missing from the toggles are off.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for RewardToggles {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(name, on)| (name.into(), on)).collect())
    }
}

/// Product identities that have already received their one-time bonus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardedProducts(FxHashSet<ProductKey>);

impl RewardedProducts {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the product already received its bonus.
    pub fn contains(&self, product: ProductKey) -> bool {
        self.0.contains(&product)
    }

    /// Record a bonus; returns `false` if the product was already rewarded.
    pub fn insert(&mut self, product: ProductKey) -> bool {
        self.0.insert(product)
    }

    /// Number of rewarded products.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no product has been rewarded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ProductKey> for RewardedProducts {
    fn from_iter<I: IntoIterator<Item = ProductKey>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A seller's active rewards for one run, in minor units.
#[derive(Debug, Clone, Default)]
pub struct RewardTerms {
    rates: SmallVec<[Percentage; 4]>,
    bonus: Option<(i64, i64)>,
}

impl RewardTerms {
    /// Reward for buying `quantity` copies at `unit_price`.
    ///
    /// The bonus is paid once per product: if it applies, `product` is inserted into
    /// `rewarded`. Pass a scratch copy when evaluating a move that may not be kept.
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if the calculation overflows.
    pub fn reward(
        &self,
        unit_price: i64,
        quantity: u32,
        product: ProductKey,
        rewarded: &mut RewardedProducts,
    ) -> Result<i64, PricingError> {
        let percent = self.percentage_reward(unit_price, quantity)?;

        match self.bonus {
            Some((amount, min_price)) if unit_price >= min_price && rewarded.insert(product) => {
                Ok(percent.saturating_add(amount))
            }
            _ => Ok(percent),
        }
    }

    /// Same as [`RewardTerms::reward`] without recording the bonus.
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if the calculation overflows.
    pub fn preview(
        &self,
        unit_price: i64,
        quantity: u32,
        product: ProductKey,
        rewarded: &RewardedProducts,
    ) -> Result<i64, PricingError> {
        let percent = self.percentage_reward(unit_price, quantity)?;

        match self.bonus {
            Some((amount, min_price)) if unit_price >= min_price && !rewarded.contains(product) => {
                Ok(percent.saturating_add(amount))
            }
            _ => Ok(percent),
        }
    }

    /// Largest reward a line could earn, assuming its bonus is still unclaimed.
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if the calculation overflows.
    pub fn max_reward(&self, unit_price: i64, quantity: u32) -> Result<i64, PricingError> {
        let percent = self.percentage_reward(unit_price, quantity)?;

        match self.bonus {
            Some((amount, min_price)) if unit_price >= min_price => {
                Ok(percent.saturating_add(amount))
            }
            _ => Ok(percent),
        }
    }

    /// Sum of every active percentage rule, each rounded toward zero.
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if the calculation overflows.
    pub fn percentage_reward(&self, unit_price: i64, quantity: u32) -> Result<i64, PricingError> {
        let total = line_total(unit_price, quantity)?;

        self.rates.iter().try_fold(0_i64, |acc, rate| {
            let reward = percent_of_minor(rate, total)?;

            acc.checked_add(reward).ok_or(PricingError::PercentConversion)
        })
    }

    /// Once-per-product bonus as `(amount, min_price)`, if active
    pub fn bonus(&self) -> Option<(i64, i64)> {
        self.bonus
    }

    /// Whether these terms can ever pay anything.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty() && self.bonus.is_none()
    }
}

/// Resolves each seller's active reward terms for one run.
#[derive(Debug, Clone, Copy)]
pub struct RewardsCalculator<'t, 'a> {
    table: &'t RewardsTable<'a>,
    toggles: &'t RewardToggles,
}

impl<'t, 'a> RewardsCalculator<'t, 'a> {
    /// Create a calculator.
    pub fn new(table: &'t RewardsTable<'a>, toggles: &'t RewardToggles) -> Self {
        Self { table, toggles }
    }

    /// Active terms of a seller. Sellers without rewards get empty terms.
    pub fn terms(&self, seller: &SellerId) -> RewardTerms {
        let Some(rewards) = self.table.get(seller) else {
            return RewardTerms::default();
        };

        let rates = rewards
            .rules()
            .iter()
            .filter(|rule| self.toggles.is_enabled(rule.name()))
            .map(|rule| *rule.rate())
            .collect();

        let bonus = rewards
            .bonus()
            .filter(|bonus| self.toggles.is_enabled(bonus.name()))
            .map(|bonus| {
                (
                    bonus.amount().to_minor_units(),
                    bonus.min_price().to_minor_units(),
                )
            });

        RewardTerms { rates, bonus }
    }

    /// Reward earned at `seller` for one line; see [`RewardTerms::reward`].
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if the calculation overflows.
    pub fn reward(
        &self,
        seller: &SellerId,
        unit_price: i64,
        quantity: u32,
        product: ProductKey,
        rewarded: &mut RewardedProducts,
    ) -> Result<i64, PricingError> {
        self.terms(seller)
            .reward(unit_price, quantity, product, rewarded)
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::{JPY, USD};
    use testresult::TestResult;

    use crate::{pricing::parse_percentage, products::Products};

    use super::*;

    fn yen(minor: i64) -> Money<'static, Currency> {
        Money::from_minor(minor, JPY)
    }

    fn table() -> Result<RewardsTable<'static>, Box<dyn std::error::Error>> {
        let mut table = RewardsTable::new(JPY);

        table.insert(
            "shop-a",
            SellerRewards::new()
                .with_rule(PercentageRule::new("base", parse_percentage("1%")?))
                .with_rule(PercentageRule::new("membership", parse_percentage("2%")?))
                .with_bonus(ProductBonus::new("first-copy", yen(100), yen(1_000))),
        )?;

        Ok(table)
    }

    #[test]
    fn enabled_rules_stack_and_round_down() -> TestResult {
        let table = table()?;
        let toggles = RewardToggles::new()
            .with_enabled("base")
            .with_enabled("membership");
        let terms = RewardsCalculator::new(&table, &toggles).terms(&SellerId::from("shop-a"));

        // 1% of 1,099 is 10 and 2% of 1,099 is 21
        assert_eq!(terms.percentage_reward(1_099, 1)?, 31);

        Ok(())
    }

    #[test]
    fn rules_missing_from_toggles_are_off() -> TestResult {
        let table = table()?;
        let toggles = RewardToggles::from_iter([("base", true), ("membership", false)]);
        let terms = RewardsCalculator::new(&table, &toggles).terms(&SellerId::from("shop-a"));

        assert_eq!(terms.percentage_reward(1_000, 2)?, 20);
        assert_eq!(terms.bonus(), None);

        Ok(())
    }

    #[test]
    fn bonus_is_paid_once_per_product() -> TestResult {
        let table = table()?;
        let toggles = RewardToggles::new().with_enabled("first-copy");
        let calculator = RewardsCalculator::new(&table, &toggles);
        let seller = SellerId::from("shop-a");

        let mut products = Products::new();
        let product = products.intern("blue-eyes");
        let mut rewarded = RewardedProducts::new();

        assert_eq!(calculator.reward(&seller, 1_000, 1, product, &mut rewarded)?, 100);
        assert_eq!(calculator.reward(&seller, 1_000, 1, product, &mut rewarded)?, 0);
        assert!(rewarded.contains(product));

        Ok(())
    }

    #[test]
    fn bonus_requires_minimum_price() -> TestResult {
        let table = table()?;
        let toggles = RewardToggles::new().with_enabled("first-copy");
        let terms = RewardsCalculator::new(&table, &toggles).terms(&SellerId::from("shop-a"));

        let mut products = Products::new();
        let product = products.intern("kuriboh");
        let mut rewarded = RewardedProducts::new();

        assert_eq!(terms.reward(999, 3, product, &mut rewarded)?, 0);
        assert!(rewarded.is_empty());

        Ok(())
    }

    #[test]
    fn preview_leaves_rewarded_set_untouched() -> TestResult {
        let table = table()?;
        let toggles = RewardToggles::new().with_enabled("first-copy");
        let terms = RewardsCalculator::new(&table, &toggles).terms(&SellerId::from("shop-a"));

        let mut products = Products::new();
        let product = products.intern("blue-eyes");
        let rewarded = RewardedProducts::new();

        assert_eq!(terms.preview(2_000, 1, product, &rewarded)?, 100);
        assert_eq!(terms.max_reward(2_000, 1)?, 100);
        assert!(rewarded.is_empty());

        Ok(())
    }

    #[test]
    fn seller_without_rewards_earns_nothing() -> TestResult {
        let table = table()?;
        let toggles = RewardToggles::new().with_enabled("base");
        let terms = RewardsCalculator::new(&table, &toggles).terms(&SellerId::from("shop-z"));

        assert!(terms.is_empty());
        assert_eq!(terms.percentage_reward(10_000, 1)?, 0);

        Ok(())
    }

    #[test]
    fn insert_rejects_rate_above_one_hundred_percent() -> TestResult {
        let mut table = RewardsTable::new(JPY);
        let result = table.insert(
            "shop-a",
            SellerRewards::new().with_rule(PercentageRule::new("base", parse_percentage("150%")?)),
        );

        assert_eq!(
            result,
            Err(RewardsError::InvalidRate(
                "shop-a".to_string(),
                "base".to_string()
            ))
        );

        Ok(())
    }

    #[test]
    fn insert_rejects_bonus_in_other_currency() {
        let mut table = RewardsTable::new(JPY);
        let result = table.insert(
            "shop-a",
            SellerRewards::new().with_bonus(ProductBonus::new(
                "first-copy",
                Money::from_minor(100, USD),
                yen(0),
            )),
        );

        assert!(matches!(result, Err(RewardsError::CurrencyMismatch(..))));
    }
}
