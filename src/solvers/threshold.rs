//! Threshold Combinations
//!
//! Finds groups of items that, moved together to one seller, lift its subtotal to the
//! free-shipping threshold. The search is a bounded backtracking enumeration: both the
//! number of combinations kept and the number of nodes visited are capped, and the caps
//! are checked before descending.

use smallvec::SmallVec;
use tracing::debug;

use crate::solvers::{
    SolverError,
    greedy::{GreedyOrdering, fill},
    state::{Assignment, PricingContext},
};

/// Default number of combinations kept per seller.
pub const DEFAULT_COMBINATION_LIMIT: usize = 50;

/// Default number of search nodes visited per seller.
pub const DEFAULT_NODE_LIMIT: usize = 10_000;

/// Default weight of the price premium in the combination score.
pub const DEFAULT_PREMIUM_WEIGHT: i64 = 2;

/// Search limits and scoring of the finder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdConfig {
    /// Combinations kept per seller
    pub combination_limit: usize,

    /// Search nodes visited per seller
    pub node_limit: usize,

    /// Weight of the premium in the score
    pub premium_weight: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            combination_limit: DEFAULT_COMBINATION_LIMIT,
            node_limit: DEFAULT_NODE_LIMIT,
            premium_weight: DEFAULT_PREMIUM_WEIGHT,
        }
    }
}

/// A set of items whose combined price reaches a seller's free-shipping threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdCombination {
    seller: usize,
    slots: SmallVec<[usize; 8]>,
    subset_price: i64,
    premium: i64,
    shipping_saved: i64,
    score: i64,
}

impl ThresholdCombination {
    /// Seller whose threshold is reached
    pub fn seller(&self) -> usize {
        self.seller
    }

    /// Item slots to move
    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    /// Combined price of the items at the seller
    pub fn subset_price(&self) -> i64 {
        self.subset_price
    }

    /// Extra paid compared to each item's cheapest offer elsewhere
    pub fn premium(&self) -> i64 {
        self.premium
    }

    /// The seller's flat fee plus the fees of source sellers the move would empty
    pub fn shipping_saved(&self) -> i64 {
        self.shipping_saved
    }

    /// `subset_price + premium × weight − shipping_saved`; lower is better
    pub fn score(&self) -> i64 {
        self.score
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolItem {
    slot: usize,
    price: i64,
    premium: i64,
    source: Option<usize>,
}

/// Bounded search for free-shipping combinations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdCombinationFinder {
    config: ThresholdConfig,
}

impl ThresholdCombinationFinder {
    /// Create a finder.
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    /// Combinations of items not yet at `seller` (and accepted by `allowed`) that would lift
    /// its subtotal to its threshold, best score first.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the seller is unknown or a sum overflows.
    pub fn find(
        &self,
        ctx: &PricingContext<'_>,
        assignment: &Assignment,
        seller: usize,
        allowed: impl Fn(usize) -> bool,
    ) -> Result<Vec<ThresholdCombination>, SolverError> {
        let shipping = ctx.terms(seller)?.shipping();

        let Some(threshold) = shipping.threshold() else {
            return Ok(Vec::new());
        };

        if !shipping.has_reachable_threshold() {
            return Ok(Vec::new());
        }

        let current = assignment.bucket(seller)?.subtotal();

        if current >= threshold {
            return Ok(Vec::new());
        }

        let needed = threshold - current;
        let pool = pool(ctx, assignment, seller, allowed);

        let mut suffix = vec![0_i64; pool.len() + 1];

        for (idx, item) in pool.iter().enumerate().rev() {
            let next = suffix.get(idx + 1).copied().unwrap_or(0);

            if let Some(sum) = suffix.get_mut(idx) {
                *sum = next.checked_add(item.price).ok_or(SolverError::Overflow)?;
            }
        }

        let mut search = Search {
            pool: &pool,
            suffix: &suffix,
            needed,
            combination_limit: self.config.combination_limit,
            node_limit: self.config.node_limit,
            nodes: 0,
            chosen: SmallVec::new(),
            found: Vec::new(),
        };

        search.descend(0, 0);

        let mut combinations = search
            .found
            .into_iter()
            .map(|picked| self.score(ctx, assignment, seller, &pool, &picked))
            .collect::<Result<Vec<_>, _>>()?;

        combinations.sort_by_key(ThresholdCombination::score);

        debug!(
            seller,
            needed,
            pool = pool.len(),
            combinations = combinations.len(),
            "threshold combinations"
        );

        Ok(combinations)
    }

    /// Apply a combination if it verifiably lowers the total.
    ///
    /// The summed premium must be below the shipping saved, and an exact recompute of the
    /// moved assignment must come out cheaper. Returns the improved assignment, or `None`.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if pricing fails.
    pub fn try_apply(
        &self,
        ctx: &PricingContext<'_>,
        assignment: &Assignment,
        combination: &ThresholdCombination,
    ) -> Result<Option<Assignment>, SolverError> {
        if combination.premium >= combination.shipping_saved {
            return Ok(None);
        }

        let trial = assignment.trial(ctx, |moved| {
            for slot in &combination.slots {
                moved.place_at(ctx, *slot, combination.seller)?;
            }

            Ok(())
        })?;

        Ok((trial.total() < assignment.total()).then_some(trial))
    }

    /// Build an assignment by first placing, seller by seller, the best combination whose
    /// premium is below the seller's flat fee, then routing the rest greedily.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if pricing fails.
    #[tracing::instrument(
        name = "solvers.threshold.seed",
        skip(self, ctx),
        fields(seeded = tracing::field::Empty, total = tracing::field::Empty),
        err
    )]
    pub fn seed(&self, ctx: &PricingContext<'_>) -> Result<Assignment, SolverError> {
        let mut assignment = Assignment::new(ctx);
        let mut seeded = 0_usize;

        for seller in 0..ctx.seller_count() {
            let combinations =
                self.find(ctx, &assignment, seller, |slot| assignment.choice(slot).is_none())?;

            let Some(best) = combinations
                .into_iter()
                .find(|combination| combination.premium < combination.shipping_saved)
            else {
                continue;
            };

            for slot in &best.slots {
                assignment.place_at(ctx, *slot, seller)?;
            }

            assignment.recompute(ctx)?;
            seeded += 1;
        }

        fill(
            ctx,
            &mut assignment,
            GreedyOrdering::DescendingPrice.order(ctx),
            |_| false,
        )?;

        tracing::Span::current().record("seeded", seeded);
        tracing::Span::current().record("total", assignment.total());

        Ok(assignment)
    }

    fn score(
        &self,
        ctx: &PricingContext<'_>,
        assignment: &Assignment,
        seller: usize,
        pool: &[PoolItem],
        picked: &[usize],
    ) -> Result<ThresholdCombination, SolverError> {
        let items: SmallVec<[PoolItem; 8]> =
            picked.iter().filter_map(|idx| pool.get(*idx)).copied().collect();

        let subset_price = items
            .iter()
            .try_fold(0_i64, |acc, item| acc.checked_add(item.price))
            .ok_or(SolverError::Overflow)?;

        let premium = items
            .iter()
            .try_fold(0_i64, |acc, item| acc.checked_add(item.premium))
            .ok_or(SolverError::Overflow)?;

        let mut shipping_saved = ctx.terms(seller)?.shipping().flat_fee();
        let mut sources: SmallVec<[usize; 8]> = items.iter().filter_map(|item| item.source).collect();

        sources.sort_unstable();
        sources.dedup();

        for source in sources {
            let bucket = assignment.bucket(source)?;
            let moved = items.iter().filter(|item| item.source == Some(source)).count();

            if moved == bucket.lines().len() {
                shipping_saved += bucket.shipping_fee();
            }
        }

        let score = premium
            .checked_mul(self.config.premium_weight)
            .and_then(|weighted| subset_price.checked_add(weighted))
            .and_then(|score| score.checked_sub(shipping_saved))
            .ok_or(SolverError::Overflow)?;

        Ok(ThresholdCombination {
            seller,
            slots: items.iter().map(|item| item.slot).collect(),
            subset_price,
            premium,
            shipping_saved,
            score,
        })
    }
}

fn pool(
    ctx: &PricingContext<'_>,
    assignment: &Assignment,
    seller: usize,
    allowed: impl Fn(usize) -> bool,
) -> Vec<PoolItem> {
    let mut pool = Vec::new();

    for (slot, entry) in ctx.catalog().entries().iter().enumerate() {
        let source = assignment.seller_of(slot);

        if source == Some(seller) || !allowed(slot) {
            continue;
        }

        let Some(candidate) = entry.candidate_at(seller).and_then(|c| entry.candidate(c))
        else {
            continue;
        };

        let cheapest_elsewhere = entry
            .candidates()
            .iter()
            .filter(|other| other.seller() != seller)
            .map(|other| other.line_total())
            .min();

        let premium = cheapest_elsewhere
            .map_or(0, |cheapest| (candidate.line_total() - cheapest).max(0));

        pool.push(PoolItem {
            slot,
            price: candidate.line_total(),
            premium,
            source,
        });
    }

    pool.sort_by(|a, b| b.price.cmp(&a.price).then_with(|| a.slot.cmp(&b.slot)));

    pool
}

struct Search<'p> {
    pool: &'p [PoolItem],
    suffix: &'p [i64],
    needed: i64,
    combination_limit: usize,
    node_limit: usize,
    nodes: usize,
    chosen: SmallVec<[usize; 8]>,
    found: Vec<SmallVec<[usize; 8]>>,
}

impl Search<'_> {
    fn exhausted(&self) -> bool {
        self.found.len() >= self.combination_limit || self.nodes >= self.node_limit
    }

    fn descend(&mut self, start: usize, sum: i64) {
        for idx in start..self.pool.len() {
            if self.exhausted() {
                return;
            }

            let remaining = self.suffix.get(idx).copied().unwrap_or(0);

            if sum.saturating_add(remaining) < self.needed {
                return;
            }

            let Some(item) = self.pool.get(idx) else {
                return;
            };

            self.nodes += 1;
            self.chosen.push(idx);

            let reached = sum.saturating_add(item.price);

            if reached >= self.needed {
                self.found.push(self.chosen.clone());
            } else {
                self.descend(idx + 1, reached);
            }

            self.chosen.pop();
        }
    }
}
