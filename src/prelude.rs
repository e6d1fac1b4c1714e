//! splitcart prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    cart::{Cart, CartError},
    catalog::{OfferCatalog, UnresolvedItem, UnresolvedReason},
    config::{ConfigError, EngineOptions},
    engine::{Engine, EngineError, PurchaseOutcome, compute_optimal_purchase},
    fixtures::{Fixture, FixtureError},
    items::Item,
    offers::{Offer, OfferId, SellerId},
    plan::{PlanDiagnostics, PlanLine, PurchasePlan, SellerPlan},
    rewards::{PercentageRule, ProductBonus, RewardToggles, RewardsTable, SellerRewards},
    shipping::{Region, ShippingPolicy, ShippingPolicyTable},
    solvers::{SolutionSource, SolverError},
};
