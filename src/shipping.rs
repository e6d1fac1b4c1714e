//! Shipping Policies
//!
//! A seller charges a flat fee (which may depend on the delivery region) until the order
//! subtotal reaches its free-shipping threshold, after which shipping is free. When the
//! buyer collects in person and the seller offers pickup, a fixed pickup fee replaces both.
//!
//! Sellers missing from the policy table fall back to a conservative default policy. The
//! fallback is never silent: it is flagged on the resolved policy and logged.

use std::collections::{BTreeMap, BTreeSet};

use rusty_money::{Money, iso::Currency};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::offers::SellerId;

/// Flat fee charged by sellers without a shipping policy, in minor units.
pub const FALLBACK_FLAT_FEE_MINOR: i64 = 500;

/// Errors related to shipping policies.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShippingError {
    /// A policy amount is in a different currency than the table (seller, policy currency, table currency).
    #[error("Shipping policy for {0} has currency {1}, but the table has currency {2}")]
    CurrencyMismatch(String, &'static str, &'static str),

    /// A policy amount is negative.
    #[error("Shipping policy for {0} has a negative amount")]
    NegativeAmount(String),
}

/// Delivery region of the buyer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    /// Mainland delivery
    #[default]
    Default,

    /// First remote zone
    RemoteA,

    /// Second remote zone
    RemoteB,
}

/// Free-shipping threshold of a seller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FreeShippingThreshold<'a> {
    /// Shipping is free once the subtotal reaches this amount.
    Finite(Money<'a, Currency>),

    /// Shipping is never free.
    Unbounded,
}

/// Shipping policy of one seller.
#[derive(Debug, Clone, PartialEq)]
pub struct ShippingPolicy<'a> {
    flat_fee: Money<'a, Currency>,
    regional_fees: BTreeMap<Region, Money<'a, Currency>>,
    threshold: FreeShippingThreshold<'a>,
    pickup_fee: Option<Money<'a, Currency>>,
}

impl<'a> ShippingPolicy<'a> {
    /// Create a policy charging `flat_fee` everywhere, with no free-shipping threshold.
    pub fn new(flat_fee: Money<'a, Currency>) -> Self {
        Self {
            flat_fee,
            regional_fees: BTreeMap::new(),
            threshold: FreeShippingThreshold::Unbounded,
            pickup_fee: None,
        }
    }

    /// The policy applied to sellers missing from the table.
    pub fn fallback(currency: &'a Currency) -> Self {
        Self::new(Money::from_minor(FALLBACK_FLAT_FEE_MINOR, currency))
    }

    /// Make shipping free once the subtotal reaches `threshold`.
    #[must_use]
    pub fn with_threshold(mut self, threshold: Money<'a, Currency>) -> Self {
        self.threshold = FreeShippingThreshold::Finite(threshold);
        self
    }

    /// Charge a different flat fee for deliveries to `region`.
    #[must_use]
    pub fn with_region_fee(mut self, region: Region, fee: Money<'a, Currency>) -> Self {
        self.regional_fees.insert(region, fee);
        self
    }

    /// Offer in-person pickup for a fixed fee.
    #[must_use]
    pub fn with_pickup_fee(mut self, fee: Money<'a, Currency>) -> Self {
        self.pickup_fee = Some(fee);
        self
    }

    /// Flat fee charged below the threshold for `region`.
    pub fn flat_fee(&self, region: Region) -> &Money<'a, Currency> {
        self.regional_fees.get(&region).unwrap_or(&self.flat_fee)
    }

    /// Free-shipping threshold
    pub fn threshold(&self) -> &FreeShippingThreshold<'a> {
        &self.threshold
    }

    /// Pickup fee, if the seller offers pickup
    pub fn pickup_fee(&self) -> Option<&Money<'a, Currency>> {
        self.pickup_fee.as_ref()
    }

    fn amounts(&self) -> impl Iterator<Item = &Money<'a, Currency>> {
        let threshold = match &self.threshold {
            FreeShippingThreshold::Finite(threshold) => Some(threshold),
            FreeShippingThreshold::Unbounded => None,
        };

        std::iter::once(&self.flat_fee)
            .chain(self.regional_fees.values())
            .chain(threshold)
            .chain(self.pickup_fee.as_ref())
    }
}

/// Shipping policies keyed by seller id.
#[derive(Debug, Clone)]
pub struct ShippingPolicyTable<'a> {
    currency: &'static Currency,
    policies: BTreeMap<SellerId, ShippingPolicy<'a>>,
    fallback: ShippingPolicy<'a>,
}

impl<'a> ShippingPolicyTable<'a> {
    /// Create an empty table; every seller resolves to [`ShippingPolicy::fallback`].
    pub fn new(currency: &'static Currency) -> Self {
        Self {
            currency,
            policies: BTreeMap::new(),
            fallback: ShippingPolicy::fallback(currency),
        }
    }

    /// Add or replace the policy of a seller.
    ///
    /// # Errors
    ///
    /// Returns a [`ShippingError`] if any amount is negative or in another currency.
    pub fn insert(
        &mut self,
        seller: impl Into<SellerId>,
        policy: ShippingPolicy<'a>,
    ) -> Result<(), ShippingError> {
        let seller = seller.into();

        self.validate(seller.as_str(), &policy)?;
        self.policies.insert(seller, policy);

        Ok(())
    }

    /// Replace the policy used for sellers missing from the table.
    ///
    /// # Errors
    ///
    /// Returns a [`ShippingError`] if any amount is negative or in another currency.
    pub fn with_fallback(mut self, policy: ShippingPolicy<'a>) -> Result<Self, ShippingError> {
        self.validate("<fallback>", &policy)?;
        self.fallback = policy;

        Ok(self)
    }

    /// Get the policy of a seller, if it has one.
    pub fn get(&self, seller: &SellerId) -> Option<&ShippingPolicy<'a>> {
        self.policies.get(seller)
    }

    /// Policy used for sellers missing from the table
    pub fn fallback(&self) -> &ShippingPolicy<'a> {
        &self.fallback
    }

    /// Currency of every amount in the table
    pub fn currency(&self) -> &'static Currency {
        self.currency
    }

    /// Number of sellers with a policy.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Check if no seller has a policy.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    fn validate(&self, seller: &str, policy: &ShippingPolicy<'a>) -> Result<(), ShippingError> {
        for amount in policy.amounts() {
            if amount.currency() != self.currency {
                return Err(ShippingError::CurrencyMismatch(
                    seller.to_string(),
                    amount.currency().iso_alpha_code,
                    self.currency.iso_alpha_code,
                ));
            }

            if amount.to_minor_units() < 0 {
                return Err(ShippingError::NegativeAmount(seller.to_string()));
            }
        }

        Ok(())
    }
}

/// Where a resolved policy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    /// The seller's own entry in the policy table
    Table,

    /// The fallback policy, because the seller has no entry
    Fallback,
}

/// A seller's shipping policy resolved for one run, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedShipping {
    flat_fee: i64,
    threshold: Option<i64>,
    pickup_fee: Option<i64>,
    source: PolicySource,
}

impl ResolvedShipping {
    /// Fee charged for an order with the given subtotal.
    ///
    /// The fee is non-negative and never increases as the subtotal grows.
    pub fn fee(&self, subtotal: i64) -> i64 {
        if let Some(pickup_fee) = self.pickup_fee {
            return pickup_fee;
        }

        match self.threshold {
            Some(threshold) if subtotal >= threshold => 0,
            _ => self.flat_fee,
        }
    }

    /// Flat fee charged below the threshold
    pub fn flat_fee(&self) -> i64 {
        self.flat_fee
    }

    /// Free-shipping threshold; `None` when shipping is never free
    pub fn threshold(&self) -> Option<i64> {
        self.threshold
    }

    /// Pickup fee, if pickup is enabled for this run and offered by the seller
    pub fn pickup_fee(&self) -> Option<i64> {
        self.pickup_fee
    }

    /// Whether reaching a threshold changes the fee for this seller.
    pub fn has_reachable_threshold(&self) -> bool {
        self.pickup_fee.is_none() && self.threshold.is_some() && self.flat_fee > 0
    }

    /// Where the policy came from
    pub fn source(&self) -> PolicySource {
        self.source
    }
}

/// Resolves shipping policies for one run's region and pickup choices.
#[derive(Debug, Clone, Copy)]
pub struct ShippingPolicyResolver<'t, 'a> {
    table: &'t ShippingPolicyTable<'a>,
    region: Region,
    pickup_enabled: &'t BTreeSet<SellerId>,
}

impl<'t, 'a> ShippingPolicyResolver<'t, 'a> {
    /// Create a resolver.
    pub fn new(
        table: &'t ShippingPolicyTable<'a>,
        region: Region,
        pickup_enabled: &'t BTreeSet<SellerId>,
    ) -> Self {
        Self {
            table,
            region,
            pickup_enabled,
        }
    }

    /// Resolve the policy of a seller.
    pub fn resolve(&self, seller: &SellerId) -> ResolvedShipping {
        let (policy, source) = if let Some(policy) = self.table.get(seller) {
            (policy, PolicySource::Table)
        } else {
            warn!(
                seller = %seller,
                flat_fee = self.table.fallback().flat_fee(self.region).to_minor_units(),
                "no shipping policy for seller, using fallback"
            );

            (self.table.fallback(), PolicySource::Fallback)
        };

        let threshold = match policy.threshold() {
            FreeShippingThreshold::Finite(threshold) => Some(threshold.to_minor_units()),
            FreeShippingThreshold::Unbounded => None,
        };

        let pickup_fee = if self.pickup_enabled.contains(seller) {
            policy.pickup_fee().map(Money::to_minor_units)
        } else {
            None
        };

        ResolvedShipping {
            flat_fee: policy.flat_fee(self.region).to_minor_units(),
            threshold,
            pickup_fee,
            source,
        }
    }

    /// Fee charged by `seller` for an order with the given subtotal.
    pub fn fee(&self, seller: &SellerId, subtotal: i64) -> i64 {
        self.resolve(seller).fee(subtotal)
    }

    /// Region of the run
    pub fn region(&self) -> Region {
        self.region
    }
}
