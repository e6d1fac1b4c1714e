//! Purchase Plan
//!
//! The immutable result of a run: the winning assignment grouped by seller, with every total
//! recomputed from the final lines, plus the items that could not be bought and diagnostics
//! about how the plan was found.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
};

use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;
use tabled::{
    builder::Builder,
    grid::config::HorizontalLine,
    settings::{
        Alignment, Color, Style, Theme,
        object::{Columns, Rows},
    },
};
use thiserror::Error;

use crate::{
    cart::Cart,
    catalog::{DroppedOffers, UnresolvedItem, UnresolvedReason},
    offers::{OfferId, SellerId},
    pricing::to_money,
    shipping::PolicySource,
    solvers::{
        SolutionSource, SolverError,
        exhaustive::ExhaustiveStatus,
        milp::MilpStatus,
        refiner::RefinementReport,
        state::{Assignment, PricingContext},
    },
};

/// Errors that can occur while assembling or printing a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Wrapped solver error
    #[error(transparent)]
    Solver(#[from] SolverError),

    /// The assignment references an item missing from the cart.
    #[error("missing cart item {0}")]
    MissingItem(usize),

    /// The assignment references an offer missing from the cart.
    #[error("missing cart offer {0}")]
    MissingOffer(usize),

    /// The assignment references a seller missing from the catalog.
    #[error("missing seller {0}")]
    MissingSeller(usize),

    /// A seller total recomputed from its lines disagrees with the solver's total.
    #[error("total for seller {seller} recomputed as {recomputed}, solver reported {reported}")]
    TotalMismatch {
        /// Seller
        seller: SellerId,

        /// Total recomputed from the lines
        recomputed: i64,

        /// Total the solver reported
        reported: i64,
    },

    /// A line reward recomputed from the seller's reward terms disagrees with the solver's.
    #[error("reward for {item} at {seller} recomputed as {recomputed}, solver reported {reported}")]
    RewardMismatch {
        /// Seller
        seller: SellerId,

        /// Item key
        item: String,

        /// Reward recomputed from the reward terms
        recomputed: i64,

        /// Reward the solver reported
        reported: i64,
    },

    /// IO error
    #[error("IO error")]
    IO,
}

/// One item bought from one seller.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanLine {
    /// Item key
    pub item_key: String,

    /// Item display name
    pub item_name: String,

    /// Offer bought
    pub offer_id: OfferId,

    /// Copies bought
    pub quantity: u32,

    /// Price of one copy
    pub unit_price: Money<'static, Currency>,

    /// `unit_price × quantity`
    pub line_total: Money<'static, Currency>,

    /// Reward earned by this line
    pub reward: Money<'static, Currency>,

    /// Cheapest unit price for this item at any other eligible seller
    pub cheapest_elsewhere: Option<Money<'static, Currency>>,

    /// Rarity of the offer
    pub rarity: String,

    /// Language of the offer
    pub language: String,

    /// Illustration variant of the offer
    pub variant: String,
}

/// Everything bought from one seller.
#[derive(Debug, Clone, PartialEq)]
pub struct SellerPlan {
    /// Lines in cart order
    pub lines: SmallVec<[PlanLine; 8]>,

    /// Sum of line totals
    pub subtotal: Money<'static, Currency>,

    /// Shipping or pickup fee for the subtotal
    pub shipping_fee: Money<'static, Currency>,

    /// Sum of line rewards
    pub rewards_earned: Money<'static, Currency>,

    /// `subtotal + shipping_fee − rewards_earned`
    pub final_price: Money<'static, Currency>,

    /// Where the shipping policy came from
    pub policy_source: PolicySource,
}

/// Totals of one candidate assignment the engine compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateTotal {
    /// Solver that built the assignment
    pub source: SolutionSource,

    /// Total before refinement
    pub initial_total: i64,

    /// Total after refinement
    pub refined_total: i64,
}

/// How the plan was found.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDiagnostics {
    /// Solver whose assignment won, if any item was resolvable
    pub source: Option<SolutionSource>,

    /// Every heuristic candidate, in the order they ran
    pub candidates: Vec<CandidateTotal>,

    /// Refinement of the winning heuristic candidate
    pub refinement: Option<RefinementReport>,

    /// Exhaustive search outcome
    pub exhaustive: ExhaustiveStatus,

    /// MILP outcome
    pub milp: MilpStatus,

    /// Sellers priced with the fallback shipping policy
    pub fallback_policy_sellers: BTreeSet<SellerId>,

    /// Offers removed by the catalog filters, per item key
    pub dropped_offers: BTreeMap<String, DroppedOffers>,
}

impl Default for PlanDiagnostics {
    fn default() -> Self {
        Self {
            source: None,
            candidates: Vec::new(),
            refinement: None,
            exhaustive: ExhaustiveStatus::NotRun,
            milp: MilpStatus::Disabled,
            fallback_policy_sellers: BTreeSet::new(),
            dropped_offers: BTreeMap::new(),
        }
    }
}

/// Final purchase plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchasePlan {
    sellers: BTreeMap<SellerId, SellerPlan>,
    total_product_cost: Money<'static, Currency>,
    total_shipping_cost: Money<'static, Currency>,
    total_rewards_earned: Money<'static, Currency>,
    total_cost: Money<'static, Currency>,
    unresolved_items: Vec<UnresolvedItem>,
    diagnostics: PlanDiagnostics,
    currency: &'static Currency,
}

impl PurchasePlan {
    /// Purchases keyed by seller
    pub fn sellers(&self) -> &BTreeMap<SellerId, SellerPlan> {
        &self.sellers
    }

    /// Purchases from one seller
    pub fn seller(&self, seller: &SellerId) -> Option<&SellerPlan> {
        self.sellers.get(seller)
    }

    /// Seller an item was bought from
    pub fn seller_of(&self, item_key: &str) -> Option<&SellerId> {
        self.sellers
            .iter()
            .find(|(_, plan)| plan.lines.iter().any(|line| line.item_key == item_key))
            .map(|(seller, _)| seller)
    }

    /// Sum of every line total
    pub fn total_product_cost(&self) -> Money<'static, Currency> {
        self.total_product_cost
    }

    /// Sum of every seller's shipping fee
    pub fn total_shipping_cost(&self) -> Money<'static, Currency> {
        self.total_shipping_cost
    }

    /// Sum of every reward
    pub fn total_rewards_earned(&self) -> Money<'static, Currency> {
        self.total_rewards_earned
    }

    /// Amount the buyer pays, net of rewards
    pub fn total_cost(&self) -> Money<'static, Currency> {
        self.total_cost
    }

    /// Items that could not be bought
    pub fn unresolved_items(&self) -> &[UnresolvedItem] {
        &self.unresolved_items
    }

    /// How the plan was found
    pub fn diagnostics(&self) -> &PlanDiagnostics {
        &self.diagnostics
    }

    /// Currency of every amount
    pub fn currency(&self) -> &'static Currency {
        self.currency
    }

    /// Number of lines across all sellers.
    pub fn line_count(&self) -> usize {
        self.sellers.values().map(|plan| plan.lines.len()).sum()
    }

    /// Prints the plan as a table.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::IO`] if writing fails.
    pub fn write_to(&self, mut out: impl io::Write) -> Result<(), PlanError> {
        let mut builder = Builder::default();

        builder.push_record([
            "Seller",
            "Item",
            "Offer",
            "Qty",
            "Unit Price",
            "Line Total",
            "Reward",
            "Cheapest Elsewhere",
        ]);

        let mut seller_rows: SmallVec<[usize; 16]> = SmallVec::new();
        let mut row = 1;

        for (seller, plan) in &self.sellers {
            seller_rows.push(row);

            for (idx, line) in plan.lines.iter().enumerate() {
                builder.push_record([
                    if idx == 0 { seller.to_string() } else { String::new() },
                    line.item_name.clone(),
                    line.offer_id.to_string(),
                    line.quantity.to_string(),
                    line.unit_price.to_string(),
                    line.line_total.to_string(),
                    line.reward.to_string(),
                    line.cheapest_elsewhere
                        .map(|money| money.to_string())
                        .unwrap_or_default(),
                ]);
                row += 1;
            }

            let shipping = match plan.policy_source {
                PolicySource::Table => format!("shipping {}", plan.shipping_fee),
                PolicySource::Fallback => format!("shipping {} (default policy)", plan.shipping_fee),
            };

            builder.push_record([
                String::new(),
                shipping,
                String::new(),
                String::new(),
                String::new(),
                plan.subtotal.to_string(),
                plan.rewards_earned.to_string(),
                format!("= {}", plan.final_price),
            ]);
            row += 1;
        }

        let mut table = builder.build();
        let mut theme = Theme::from(Style::modern_rounded());
        let separator = HorizontalLine::new(Some('─'), Some('┼'), Some('├'), Some('┤'));

        theme.remove_horizontal_lines();
        theme.insert_horizontal_line(1, separator);

        for &row in &seller_rows {
            if row > 1 {
                theme.insert_horizontal_line(row, separator);
            }
        }

        table.with(theme);
        table.modify(Rows::first(), Color::BOLD);
        table.modify(Columns::new(3..8), Alignment::right());

        writeln!(out, "\n{table}").map_err(|_err| PlanError::IO)?;

        for (label, value) in [
            (" Products:", self.total_product_cost),
            (" Shipping:", self.total_shipping_cost),
            (" Rewards:", self.total_rewards_earned),
            (" Total:", self.total_cost),
        ] {
            let value = value.to_string();

            writeln!(out, "{label:<11}{value:>14}").map_err(|_err| PlanError::IO)?;
        }

        if !self.unresolved_items.is_empty() {
            writeln!(out, "\n Unresolved:").map_err(|_err| PlanError::IO)?;

            for item in &self.unresolved_items {
                writeln!(out, "  {} ({}): {}", item.name, item.key, describe(&item.reason))
                    .map_err(|_err| PlanError::IO)?;
            }
        }

        writeln!(out).map_err(|_err| PlanError::IO)
    }
}

fn describe(reason: &UnresolvedReason) -> String {
    match reason {
        UnresolvedReason::NoOffers => "no offers".to_string(),
        UnresolvedReason::Unavailable => "every offer is unavailable".to_string(),
        UnresolvedReason::Excluded => "every offer is excluded".to_string(),
        UnresolvedReason::NoMatchingOffers {
            available_rarities,
            available_languages,
            ..
        } => format!(
            "no matching offers (rarities: {}; languages: {})",
            join(available_rarities),
            join(available_languages)
        ),
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Builds a [`PurchasePlan`] from a priced assignment.
#[derive(Debug, Clone, Copy)]
pub struct PlanAssembler<'p, 'c> {
    cart: &'p Cart<'p>,
    ctx: &'p PricingContext<'c>,
}

impl<'p, 'c> PlanAssembler<'p, 'c> {
    /// Create an assembler for one run.
    pub fn new(cart: &'p Cart<'p>, ctx: &'p PricingContext<'c>) -> Self {
        Self { cart, ctx }
    }

    /// Assemble the plan. Empty sellers are left out. Line rewards are recomputed from the
    /// seller's reward terms with a fresh rewarded set, and every total is recomputed from the
    /// final lines and checked against the solver's own figures.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] if the assignment doesn't match the cart, the recomputed
    /// rewards or totals disagree with the assignment, or a sum overflows.
    #[tracing::instrument(name = "plan.assemble", skip_all, err)]
    pub fn assemble(
        &self,
        assignment: &Assignment,
        diagnostics: PlanDiagnostics,
    ) -> Result<PurchasePlan, PlanError> {
        let currency = self.cart.currency();
        let catalog = self.ctx.catalog();

        let mut sellers = BTreeMap::new();
        let mut unresolved_items = catalog.unresolved().to_vec();

        let (mut products, mut shipping, mut rewards) = (0_i64, 0_i64, 0_i64);
        let mut rewarded = self.ctx.seed().clone();

        for bucket in assignment.used_buckets() {
            let seller = catalog
                .seller(bucket.seller())
                .ok_or(PlanError::MissingSeller(bucket.seller()))?;
            let terms = self.ctx.terms(bucket.seller())?;

            let mut lines = SmallVec::new();
            let (mut subtotal, mut earned) = (0_i64, 0_i64);

            for line in bucket.lines() {
                let candidate = self.ctx.candidate(line.slot(), line.candidate())?;
                let entry = catalog
                    .entry(line.slot())
                    .ok_or(PlanError::Solver(SolverError::InvariantViolation {
                        message: "slot index out of range",
                    }))?;
                let item = self
                    .cart
                    .item(entry.item())
                    .ok_or(PlanError::MissingItem(entry.item()))?;
                let offer = self
                    .cart
                    .offer(candidate.offer())
                    .ok_or(PlanError::MissingOffer(candidate.offer()))?;

                let cheapest_elsewhere = entry
                    .candidates()
                    .iter()
                    .filter(|other| other.seller() != bucket.seller())
                    .map(|other| other.unit_price())
                    .min()
                    .map(|minor| to_money(minor, currency));

                let reward = terms
                    .rewards()
                    .reward(
                        candidate.unit_price(),
                        candidate.quantity(),
                        candidate.product(),
                        &mut rewarded,
                    )
                    .map_err(SolverError::from)?;

                if reward != line.reward() {
                    return Err(PlanError::RewardMismatch {
                        seller: seller.clone(),
                        item: item.key().to_string(),
                        recomputed: reward,
                        reported: line.reward(),
                    });
                }

                subtotal = subtotal
                    .checked_add(candidate.line_total())
                    .ok_or(SolverError::Overflow)?;
                earned = earned.checked_add(reward).ok_or(SolverError::Overflow)?;

                lines.push(PlanLine {
                    item_key: item.key().to_string(),
                    item_name: item.name().to_string(),
                    offer_id: offer.id().clone(),
                    quantity: candidate.quantity(),
                    unit_price: to_money(candidate.unit_price(), currency),
                    line_total: to_money(candidate.line_total(), currency),
                    reward: to_money(reward, currency),
                    cheapest_elsewhere,
                    rarity: offer.rarity().to_string(),
                    language: offer.language().to_string(),
                    variant: offer.variant().to_string(),
                });
            }

            let fee = terms.shipping().fee(subtotal);
            let final_price = subtotal
                .checked_add(fee)
                .and_then(|total| total.checked_sub(earned))
                .ok_or(SolverError::Overflow)?;

            if final_price != bucket.total() {
                return Err(PlanError::TotalMismatch {
                    seller: seller.clone(),
                    recomputed: final_price,
                    reported: bucket.total(),
                });
            }

            products = products.checked_add(subtotal).ok_or(SolverError::Overflow)?;
            shipping = shipping.checked_add(fee).ok_or(SolverError::Overflow)?;
            rewards = rewards.checked_add(earned).ok_or(SolverError::Overflow)?;

            sellers.insert(
                seller.clone(),
                SellerPlan {
                    lines,
                    subtotal: to_money(subtotal, currency),
                    shipping_fee: to_money(fee, currency),
                    rewards_earned: to_money(earned, currency),
                    final_price: to_money(final_price, currency),
                    policy_source: terms.shipping().source(),
                },
            );
        }

        for slot in assignment.unassigned() {
            let Some(item) = catalog.entry(slot).and_then(|entry| self.cart.item(entry.item()))
            else {
                continue;
            };

            unresolved_items.push(UnresolvedItem {
                key: item.key().to_string(),
                name: item.name().to_string(),
                reason: UnresolvedReason::NoOffers,
            });
        }

        let total = products
            .checked_add(shipping)
            .and_then(|total| total.checked_sub(rewards))
            .ok_or(SolverError::Overflow)?;

        if total != assignment.total() {
            return Err(PlanError::Solver(SolverError::InvariantViolation {
                message: "plan total disagrees with assignment total",
            }));
        }

        Ok(PurchasePlan {
            sellers,
            total_product_cost: to_money(products, currency),
            total_shipping_cost: to_money(shipping, currency),
            total_rewards_earned: to_money(rewards, currency),
            total_cost: to_money(total, currency),
            unresolved_items,
            diagnostics,
            currency,
        })
    }
}
