//! Solvers for Seller Assignment
//!
//! Every solver produces an [`state::Assignment`]: one chosen candidate per resolvable
//! item, priced through a single canonical recompute. Greedy strategies build starting
//! points, the threshold finder and the local-search refiner improve them, and the bounded
//! exhaustive and MILP solvers check small carts for a global optimum.

use std::fmt;

use good_lp::ResolutionError;
use thiserror::Error;

use crate::pricing::PricingError;

pub mod exhaustive;
pub mod greedy;
pub mod milp;
pub mod refiner;
pub mod state;
pub mod threshold;

/// Solver Errors
#[derive(Debug, Error)]
pub enum SolverError {
    /// Money amount in minor units cannot be represented exactly as a solver coefficient.
    #[error(
        "money amount in minor units cannot be represented exactly as a solver coefficient: {0}"
    )]
    MinorUnitsNotRepresentable(i64),

    /// A running total no longer fits in minor units.
    #[error("minor unit total overflowed")]
    Overflow,

    /// Wrapped arithmetic error
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// Wrapped solver resolution error
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Internal solver invariant was violated (this is a bug).
    #[error("solver invariant violated: {message}")]
    InvariantViolation {
        /// What invariant was violated
        message: &'static str,
    },
}

/// Which solver produced an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SolutionSource {
    /// Greedy, most expensive item first
    DescendingPrice,

    /// Greedy, cheapest item first
    AscendingPrice,

    /// Greedy, largest gap between the two cheapest offers first
    DescendingSpread,

    /// Free-shipping combinations placed first, then greedy
    ThresholdSeeded,

    /// Bounded exhaustive search
    Exhaustive,

    /// Mixed-integer programme
    Milp,
}

impl fmt::Display for SolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolutionSource::DescendingPrice => "descending-price",
            SolutionSource::AscendingPrice => "ascending-price",
            SolutionSource::DescendingSpread => "descending-spread",
            SolutionSource::ThresholdSeeded => "threshold-seeded",
            SolutionSource::Exhaustive => "exhaustive",
            SolutionSource::Milp => "milp",
        };

        f.write_str(name)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Small carts and pricing contexts shared by the solver tests.

    use std::collections::BTreeSet;

    use rusty_money::{Money, iso::JPY};

    use crate::{
        cart::Cart,
        catalog::{CatalogOptions, OfferCatalog},
        items::Item,
        offers::{Offer, SellerId},
        rewards::{RewardToggles, RewardedProducts, RewardsCalculator, RewardsTable},
        shipping::{Region, ShippingPolicy, ShippingPolicyResolver, ShippingPolicyTable},
        solvers::state::PricingContext,
    };

    /// `(item, seller, unit price)`
    pub(crate) type OfferRow<'s> = (&'s str, &'s str, i64);

    /// `(seller, flat fee, threshold)`
    pub(crate) type PolicyRow<'s> = (&'s str, i64, Option<i64>);

    pub(crate) struct Fixture {
        pub(crate) cart: Cart<'static>,
        pub(crate) catalog: OfferCatalog,
        pub(crate) shipping: ShippingPolicyTable<'static>,
        pub(crate) rewards: RewardsTable<'static>,
        pub(crate) toggles: RewardToggles,
        pub(crate) pickup: BTreeSet<SellerId>,
    }

    impl Fixture {
        pub(crate) fn new(
            offers: &[OfferRow<'_>],
            policies: &[PolicyRow<'_>],
        ) -> Result<Self, Box<dyn std::error::Error>> {
            let mut keys: Vec<&str> = Vec::new();

            for (item, _, _) in offers {
                if !keys.contains(item) {
                    keys.push(*item);
                }
            }

            let items: Vec<Item> = keys.iter().map(|key| Item::new(*key, *key)).collect();
            let offers: Vec<Offer<'static>> = offers
                .iter()
                .map(|(item, seller, price)| Offer::new(*item, *seller, Money::from_minor(*price, JPY)))
                .collect();

            let cart = Cart::with_items(items, offers, JPY)?;
            let catalog = OfferCatalog::build(&cart, &CatalogOptions::default())?;
            let mut shipping = ShippingPolicyTable::new(JPY);

            for (seller, flat_fee, threshold) in policies {
                let mut policy = ShippingPolicy::new(Money::from_minor(*flat_fee, JPY));

                if let Some(threshold) = threshold {
                    policy = policy.with_threshold(Money::from_minor(*threshold, JPY));
                }

                shipping.insert(*seller, policy)?;
            }

            Ok(Self {
                cart,
                catalog,
                shipping,
                rewards: RewardsTable::new(JPY),
                toggles: RewardToggles::new(),
                pickup: BTreeSet::new(),
            })
        }

        pub(crate) fn context(&self) -> PricingContext<'_> {
            self.context_with_seed(RewardedProducts::new())
        }

        pub(crate) fn context_with_seed(&self, seed: RewardedProducts) -> PricingContext<'_> {
            let resolver = ShippingPolicyResolver::new(&self.shipping, Region::Default, &self.pickup);
            let calculator = RewardsCalculator::new(&self.rewards, &self.toggles);

            PricingContext::new(
                &self.catalog,
                &resolver,
                &calculator,
                seed,
            )
        }

        pub(crate) fn seller(&self, id: &str) -> Option<usize> {
            self.catalog
                .sellers()
                .iter()
                .position(|seller| seller.as_str() == id)
        }
    }
}
