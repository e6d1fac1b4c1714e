//! Assignment State

use smallvec::SmallVec;

use crate::{
    catalog::{Candidate, CatalogEntry, OfferCatalog},
    offers::SellerId,
    products::ProductKey,
    rewards::{RewardTerms, RewardedProducts, RewardsCalculator},
    shipping::{PolicySource, ResolvedShipping, ShippingPolicyResolver},
    solvers::SolverError,
};

/// Shipping and reward terms of one seller, resolved once per run.
#[derive(Debug, Clone)]
pub struct SellerTerms {
    shipping: ResolvedShipping,
    rewards: RewardTerms,
}

impl SellerTerms {
    /// Shipping policy
    pub fn shipping(&self) -> &ResolvedShipping {
        &self.shipping
    }

    /// Active reward terms
    pub fn rewards(&self) -> &RewardTerms {
        &self.rewards
    }
}

/// Everything needed to price an assignment: the catalog, per-seller terms and the
/// products rewarded before this run.
#[derive(Debug, Clone)]
pub struct PricingContext<'c> {
    catalog: &'c OfferCatalog,
    sellers: Vec<SellerTerms>,
    seed: RewardedProducts,
}

impl<'c> PricingContext<'c> {
    /// Resolve the terms of every seller in the catalog.
    pub fn new(
        catalog: &'c OfferCatalog,
        shipping: &ShippingPolicyResolver<'_, '_>,
        rewards: &RewardsCalculator<'_, '_>,
        seed: RewardedProducts,
    ) -> Self {
        let sellers = catalog
            .sellers()
            .iter()
            .map(|seller| SellerTerms {
                shipping: shipping.resolve(seller),
                rewards: rewards.terms(seller),
            })
            .collect();

        Self {
            catalog,
            sellers,
            seed,
        }
    }

    /// The catalog being solved
    pub fn catalog(&self) -> &'c OfferCatalog {
        self.catalog
    }

    /// Number of resolvable items.
    pub fn slot_count(&self) -> usize {
        self.catalog.entries().len()
    }

    /// Number of sellers.
    pub fn seller_count(&self) -> usize {
        self.sellers.len()
    }

    /// Terms of a seller.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::InvariantViolation`] for an unknown seller index.
    pub fn terms(&self, seller: usize) -> Result<&SellerTerms, SolverError> {
        self.sellers
            .get(seller)
            .ok_or(SolverError::InvariantViolation {
                message: "seller index out of range",
            })
    }

    /// Candidate `candidate` of item slot `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::InvariantViolation`] for an unknown slot or candidate.
    pub fn candidate(&self, slot: usize, candidate: usize) -> Result<&'c Candidate, SolverError> {
        self.catalog
            .entry(slot)
            .and_then(|entry| entry.candidate(candidate))
            .ok_or(SolverError::InvariantViolation {
                message: "candidate index out of range",
            })
    }

    /// Candidates of item slot `slot`, cheapest first.
    pub fn candidates(&self, slot: usize) -> &'c [Candidate] {
        self.catalog
            .entry(slot)
            .map(CatalogEntry::candidates)
            .unwrap_or_default()
    }

    /// Products that were rewarded before this run
    pub fn seed(&self) -> &RewardedProducts {
        &self.seed
    }

    /// Sellers priced with the fallback shipping policy.
    pub fn fallback_sellers(&self) -> impl Iterator<Item = &'c SellerId> + '_ {
        self.catalog
            .sellers()
            .iter()
            .zip(&self.sellers)
            .filter(|(_, terms)| terms.shipping.source() == PolicySource::Fallback)
            .map(|(seller, _)| seller)
    }
}

/// One item routed to a seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    slot: usize,
    candidate: usize,
    unit_price: i64,
    quantity: u32,
    line_total: i64,
    product: ProductKey,
    reward: i64,
}

impl Line {
    /// Item slot (index into the catalog entries)
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Candidate index within the slot
    pub fn candidate(&self) -> usize {
        self.candidate
    }

    /// Unit price in minor units
    pub fn unit_price(&self) -> i64 {
        self.unit_price
    }

    /// Quantity bought
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// `unit_price × quantity`
    pub fn line_total(&self) -> i64 {
        self.line_total
    }

    /// Product identity
    pub fn product(&self) -> ProductKey {
        self.product
    }

    /// Reward earned by this line in the current assignment
    pub fn reward(&self) -> i64 {
        self.reward
    }
}

/// Working state of one seller: its lines and the derived totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SellerBucket {
    seller: usize,
    lines: SmallVec<[Line; 8]>,
    subtotal: i64,
    shipping_fee: i64,
    rewards_earned: i64,
}

impl SellerBucket {
    fn new(seller: usize) -> Self {
        Self {
            seller,
            ..Self::default()
        }
    }

    /// Seller index
    pub fn seller(&self) -> usize {
        self.seller
    }

    /// Lines in item order
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Sum of line totals
    pub fn subtotal(&self) -> i64 {
        self.subtotal
    }

    /// Shipping fee for the subtotal; zero when the bucket is empty
    pub fn shipping_fee(&self) -> i64 {
        self.shipping_fee
    }

    /// Rewards earned by the lines
    pub fn rewards_earned(&self) -> i64 {
        self.rewards_earned
    }

    /// `subtotal + shipping_fee − rewards_earned`
    pub fn total(&self) -> i64 {
        self.subtotal + self.shipping_fee - self.rewards_earned
    }

    /// Check if nothing is routed to this seller.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Slots routed to this seller.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.lines.iter().map(|line| line.slot)
    }
}

/// The candidate chosen for one item slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    candidate: usize,
    seller: usize,
}

impl Choice {
    /// Candidate index within the slot
    pub fn candidate(&self) -> usize {
        self.candidate
    }

    /// Seller index
    pub fn seller(&self) -> usize {
        self.seller
    }
}

/// Cost of adding one candidate to an assignment, priced against its current buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marginal {
    /// `line_total + (new_fee − current_fee) − reward`
    pub cost: i64,

    /// Reward the line would earn
    pub reward: i64,
}

/// A (possibly partial) routing of item slots to sellers, with derived bucket totals.
///
/// Choices are the source of truth. Bucket lines, totals and the rewarded-products set are
/// always derived from them by [`Assignment::recompute`], so every solver prices the same
/// choices identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    choices: Vec<Option<Choice>>,
    buckets: Vec<SellerBucket>,
    rewarded: RewardedProducts,
    total: i64,
}

impl Assignment {
    /// Create an assignment with nothing routed.
    pub fn new(ctx: &PricingContext<'_>) -> Self {
        Self {
            choices: vec![None; ctx.slot_count()],
            buckets: (0..ctx.seller_count()).map(SellerBucket::new).collect(),
            rewarded: ctx.seed().clone(),
            total: 0,
        }
    }

    /// Create and price an assignment from candidate indexes, one per slot.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if a candidate is out of range or pricing overflows.
    pub fn from_candidates(
        ctx: &PricingContext<'_>,
        candidates: &[Option<usize>],
    ) -> Result<Self, SolverError> {
        let mut assignment = Self::new(ctx);

        for (slot, candidate) in candidates.iter().enumerate() {
            if let Some(candidate) = candidate {
                assignment.place(ctx, slot, *candidate)?;
            }
        }

        assignment.recompute(ctx)?;

        Ok(assignment)
    }

    /// Route `slot` to one of its candidates. Totals are stale until [`Assignment::recompute`].
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::InvariantViolation`] if the slot or candidate is out of range.
    pub fn place(
        &mut self,
        ctx: &PricingContext<'_>,
        slot: usize,
        candidate: usize,
    ) -> Result<(), SolverError> {
        let seller = ctx.candidate(slot, candidate)?.seller();

        let choice = self
            .choices
            .get_mut(slot)
            .ok_or(SolverError::InvariantViolation {
                message: "slot index out of range",
            })?;

        *choice = Some(Choice { candidate, seller });

        Ok(())
    }

    /// Route `slot` to `seller`, if the seller offers it.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::InvariantViolation`] if the seller has no candidate for the slot.
    pub fn place_at(
        &mut self,
        ctx: &PricingContext<'_>,
        slot: usize,
        seller: usize,
    ) -> Result<(), SolverError> {
        let candidate = ctx
            .catalog()
            .entry(slot)
            .and_then(|entry| entry.candidate_at(seller))
            .ok_or(SolverError::InvariantViolation {
                message: "seller has no candidate for slot",
            })?;

        self.place(ctx, slot, candidate)
    }

    /// Unroute `slot`. Totals are stale until [`Assignment::recompute`].
    pub fn remove(&mut self, slot: usize) {
        if let Some(choice) = self.choices.get_mut(slot) {
            *choice = None;
        }
    }

    /// Rebuild every bucket from the choices and reprice it.
    ///
    /// Buckets are visited in seller order and lines in slot order, with a fresh rewarded
    /// set seeded from the products rewarded before this run. The same choices therefore
    /// always award each one-time bonus to the same line.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if a choice is out of range or a total overflows.
    pub fn recompute(&mut self, ctx: &PricingContext<'_>) -> Result<(), SolverError> {
        for bucket in &mut self.buckets {
            bucket.lines.clear();
        }

        for (slot, choice) in self.choices.iter().enumerate() {
            let Some(choice) = choice else {
                continue;
            };

            let candidate = ctx.candidate(slot, choice.candidate)?;

            let bucket =
                self.buckets
                    .get_mut(choice.seller)
                    .ok_or(SolverError::InvariantViolation {
                        message: "choice references unknown seller",
                    })?;

            bucket.lines.push(Line {
                slot,
                candidate: choice.candidate,
                unit_price: candidate.unit_price(),
                quantity: candidate.quantity(),
                line_total: candidate.line_total(),
                product: candidate.product(),
                reward: 0,
            });
        }

        let mut rewarded = ctx.seed().clone();
        let mut total: i64 = 0;

        for bucket in &mut self.buckets {
            let terms = ctx.terms(bucket.seller)?;

            let mut subtotal: i64 = 0;
            let mut rewards_earned: i64 = 0;

            for line in &mut bucket.lines {
                line.reward = terms.rewards.reward(
                    line.unit_price,
                    line.quantity,
                    line.product,
                    &mut rewarded,
                )?;

                subtotal = subtotal
                    .checked_add(line.line_total)
                    .ok_or(SolverError::Overflow)?;

                rewards_earned = rewards_earned
                    .checked_add(line.reward)
                    .ok_or(SolverError::Overflow)?;
            }

            bucket.subtotal = subtotal;
            bucket.rewards_earned = rewards_earned;
            bucket.shipping_fee = if bucket.lines.is_empty() {
                0
            } else {
                terms.shipping.fee(subtotal)
            };

            total = subtotal
                .checked_add(bucket.shipping_fee)
                .and_then(|t| t.checked_sub(rewards_earned))
                .and_then(|t| total.checked_add(t))
                .ok_or(SolverError::Overflow)?;
        }

        self.rewarded = rewarded;
        self.total = total;

        Ok(())
    }

    /// Copy this assignment, apply `mutate` to the copy and reprice it.
    ///
    /// `self` is left untouched, including its rewarded-products set, so a trial that
    /// isn't kept has no side effects. Keep the trial by replacing `self` with it.
    ///
    /// # Errors
    ///
    /// Returns any error from `mutate` or from [`Assignment::recompute`].
    pub fn trial<F>(&self, ctx: &PricingContext<'_>, mutate: F) -> Result<Self, SolverError>
    where
        F: FnOnce(&mut Self) -> Result<(), SolverError>,
    {
        let mut trial = self.clone();

        mutate(&mut trial)?;
        trial.recompute(ctx)?;

        Ok(trial)
    }

    /// Cost of routing `slot` to `candidate`, priced against the current buckets.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the candidate is out of range or pricing overflows.
    pub fn marginal(
        &self,
        ctx: &PricingContext<'_>,
        slot: usize,
        candidate: usize,
    ) -> Result<Marginal, SolverError> {
        let candidate = ctx.candidate(slot, candidate)?;
        let terms = ctx.terms(candidate.seller())?;
        let bucket = self.bucket(candidate.seller())?;

        let subtotal = bucket
            .subtotal
            .checked_add(candidate.line_total())
            .ok_or(SolverError::Overflow)?;

        let fee_delta = terms.shipping.fee(subtotal) - bucket.shipping_fee;

        let reward = terms.rewards.preview(
            candidate.unit_price(),
            candidate.quantity(),
            candidate.product(),
            &self.rewarded,
        )?;

        let cost = candidate
            .line_total()
            .checked_add(fee_delta)
            .and_then(|cost| cost.checked_sub(reward))
            .ok_or(SolverError::Overflow)?;

        Ok(Marginal { cost, reward })
    }

    /// Choice made for a slot.
    pub fn choice(&self, slot: usize) -> Option<Choice> {
        self.choices.get(slot).copied().flatten()
    }

    /// Choices of every slot, in slot order
    pub fn choices(&self) -> &[Option<Choice>] {
        &self.choices
    }

    /// Seller a slot is routed to.
    pub fn seller_of(&self, slot: usize) -> Option<usize> {
        self.choice(slot).map(|choice| choice.seller)
    }

    /// Slots not routed to any seller.
    pub fn unassigned(&self) -> impl Iterator<Item = usize> + '_ {
        self.choices
            .iter()
            .enumerate()
            .filter(|(_, choice)| choice.is_none())
            .map(|(slot, _)| slot)
    }

    /// Whether every slot is routed.
    pub fn is_complete(&self) -> bool {
        self.choices.iter().all(Option::is_some)
    }

    /// Bucket of a seller.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::InvariantViolation`] for an unknown seller index.
    pub fn bucket(&self, seller: usize) -> Result<&SellerBucket, SolverError> {
        self.buckets
            .get(seller)
            .ok_or(SolverError::InvariantViolation {
                message: "seller index out of range",
            })
    }

    /// Every bucket, in seller order, including empty ones
    pub fn buckets(&self) -> &[SellerBucket] {
        &self.buckets
    }

    /// Buckets with at least one line.
    pub fn used_buckets(&self) -> impl Iterator<Item = &SellerBucket> {
        self.buckets.iter().filter(|bucket| !bucket.is_empty())
    }

    /// Products rewarded in this assignment, including those rewarded before the run
    pub fn rewarded(&self) -> &RewardedProducts {
        &self.rewarded
    }

    /// Total cost: products plus shipping minus rewards
    pub fn total(&self) -> i64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::{Money, iso::JPY};
    use testresult::TestResult;

    use crate::{
        rewards::{ProductBonus, RewardToggles, SellerRewards},
        solvers::test_support::Fixture,
    };

    use super::*;

    #[test]
    fn recompute_derives_bucket_totals() -> TestResult {
        let fixture = Fixture::new(
            &[("a", "shop-a", 20_000), ("b", "shop-a", 15_000)],
            &[("shop-a", 3_000, Some(30_000))],
        )?;
        let ctx = fixture.context();
        let assignment = Assignment::from_candidates(&ctx, &[Some(0), Some(0)])?;
        let bucket = assignment.bucket(0)?;

        assert_eq!(bucket.subtotal(), 35_000);
        assert_eq!(bucket.shipping_fee(), 0);
        assert_eq!(bucket.total(), 35_000);
        assert_eq!(assignment.total(), 35_000);
        assert!(assignment.is_complete());

        Ok(())
    }

    #[test]
    fn empty_bucket_pays_no_shipping() -> TestResult {
        let fixture = Fixture::new(
            &[("a", "shop-a", 1_000), ("a", "shop-b", 1_200)],
            &[("shop-a", 3_000, Some(30_000)), ("shop-b", 0, Some(0))],
        )?;
        let ctx = fixture.context();
        let shop_b = fixture.seller("shop-b").ok_or("missing seller")?;

        let mut assignment = Assignment::new(&ctx);
        assignment.place_at(&ctx, 0, shop_b)?;
        assignment.recompute(&ctx)?;

        assert_eq!(assignment.total(), 1_200);
        assert_eq!(assignment.bucket(0)?.shipping_fee(), 0);
        assert_eq!(assignment.used_buckets().count(), 1);

        Ok(())
    }

    #[test]
    fn marginal_includes_shipping_delta() -> TestResult {
        let fixture = Fixture::new(
            &[("a", "shop-a", 20_000), ("b", "shop-a", 15_000)],
            &[("shop-a", 3_000, Some(30_000))],
        )?;
        let ctx = fixture.context();

        let mut assignment = Assignment::new(&ctx);
        assert_eq!(assignment.marginal(&ctx, 0, 0)?.cost, 23_000);

        assignment.place(&ctx, 0, 0)?;
        assignment.recompute(&ctx)?;

        // Reaching the threshold removes the 3,000 fee already being paid
        assert_eq!(assignment.marginal(&ctx, 1, 0)?.cost, 12_000);

        Ok(())
    }

    #[test]
    fn discarded_trial_leaves_original_untouched() -> TestResult {
        let mut fixture = Fixture::new(
            &[("a", "shop-a", 1_000), ("a", "shop-b", 1_000)],
            &[("shop-a", 0, None), ("shop-b", 0, None)],
        )?;

        fixture.rewards.insert(
            "shop-b",
            SellerRewards::new().with_bonus(ProductBonus::new(
                "first-copy",
                Money::from_minor(100, JPY),
                Money::from_minor(0, JPY),
            )),
        )?;
        fixture.toggles = RewardToggles::new().with_enabled("first-copy");

        let ctx = fixture.context();
        let shop_a = fixture.seller("shop-a").ok_or("missing seller")?;
        let shop_b = fixture.seller("shop-b").ok_or("missing seller")?;

        let mut committed = Assignment::new(&ctx);
        committed.place_at(&ctx, 0, shop_a)?;
        committed.recompute(&ctx)?;

        let before = committed.clone();
        let trial = committed.trial(&ctx, |a| a.place_at(&ctx, 0, shop_b))?;

        assert_eq!(trial.total(), 900);
        assert_eq!(trial.rewarded().len(), 1);
        assert_eq!(committed, before);
        assert!(committed.rewarded().is_empty());

        Ok(())
    }

    #[test]
    fn bonus_applies_once_per_distinct_product() -> TestResult {
        let mut fixture = Fixture::new(
            &[("a", "shop-a", 1_000), ("b", "shop-b", 1_000)],
            &[("shop-a", 0, None), ("shop-b", 0, None)],
        )?;

        let bonus = || {
            SellerRewards::new().with_bonus(ProductBonus::new(
                "first-copy",
                Money::from_minor(100, JPY),
                Money::from_minor(0, JPY),
            ))
        };

        fixture.rewards.insert("shop-a", bonus())?;
        fixture.rewards.insert("shop-b", bonus())?;
        fixture.toggles = RewardToggles::new().with_enabled("first-copy");

        let ctx = fixture.context();
        let assignment = Assignment::from_candidates(&ctx, &[Some(0), Some(0)])?;

        // Different products, so both lines earn the bonus
        assert_eq!(assignment.total(), 1_800);

        Ok(())
    }
}
