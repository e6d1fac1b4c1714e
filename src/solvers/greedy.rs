//! Greedy Assignment Strategies
//!
//! Each strategy orders the items deterministically, then routes them one at a time to the
//! seller with the smallest marginal cost given everything routed so far. Different orders
//! reach different free-shipping thresholds first, so the engine runs all of them.

use std::cmp::{Ordering, Reverse};

use tracing::debug;

use crate::solvers::{
    SolutionSource, SolverError,
    state::{Assignment, Marginal, PricingContext},
};

/// Order in which a greedy strategy visits items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreedyOrdering {
    /// Most expensive cheapest offer first
    DescendingPrice,

    /// Least expensive cheapest offer first
    AscendingPrice,

    /// Largest gap between the two cheapest offers first
    DescendingSpread,
}

impl GreedyOrdering {
    /// Every ordering, in the order the engine runs them
    pub const ALL: [Self; 3] = [
        Self::DescendingPrice,
        Self::AscendingPrice,
        Self::DescendingSpread,
    ];

    /// Solution source reported for assignments built with this ordering.
    pub fn source(self) -> SolutionSource {
        match self {
            Self::DescendingPrice => SolutionSource::DescendingPrice,
            Self::AscendingPrice => SolutionSource::AscendingPrice,
            Self::DescendingSpread => SolutionSource::DescendingSpread,
        }
    }

    /// Item slots in visiting order. Ties keep cart order.
    pub fn order(self, ctx: &PricingContext<'_>) -> Vec<usize> {
        let entries = ctx.catalog().entries();
        let cheapest = |slot: usize| {
            entries
                .get(slot)
                .and_then(|entry| entry.cheapest())
                .map_or(0, |candidate| candidate.line_total())
        };
        let spread = |slot: usize| entries.get(slot).map_or(0, |entry| entry.spread());

        let mut slots: Vec<usize> = (0..entries.len()).collect();

        match self {
            Self::DescendingPrice => slots.sort_by_key(|slot| Reverse(cheapest(*slot))),
            Self::AscendingPrice => slots.sort_by_key(|slot| cheapest(*slot)),
            Self::DescendingSpread => slots.sort_by_key(|slot| Reverse(spread(*slot))),
        }

        slots
    }
}

/// A greedy assignment strategy.
#[derive(Debug, Clone, Copy)]
pub struct GreedyStrategy {
    ordering: GreedyOrdering,
}

impl GreedyStrategy {
    /// Create a strategy.
    pub fn new(ordering: GreedyOrdering) -> Self {
        Self { ordering }
    }

    /// Ordering used by this strategy
    pub fn ordering(&self) -> GreedyOrdering {
        self.ordering
    }

    /// Build a complete assignment.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if pricing fails.
    #[tracing::instrument(
        name = "solvers.greedy.assign",
        skip(self, ctx),
        fields(ordering = ?self.ordering, total = tracing::field::Empty),
        err
    )]
    pub fn assign(&self, ctx: &PricingContext<'_>) -> Result<Assignment, SolverError> {
        let mut assignment = Assignment::new(ctx);

        fill(ctx, &mut assignment, self.ordering.order(ctx), |_| false)?;

        tracing::Span::current().record("total", assignment.total());

        Ok(assignment)
    }
}

/// Route each unassigned slot in `slots` to its cheapest marginal seller, skipping sellers
/// for which `excluded` returns true. Returns `false` if some slot had no allowed seller.
///
/// # Errors
///
/// Returns a [`SolverError`] if pricing fails.
pub(crate) fn fill(
    ctx: &PricingContext<'_>,
    assignment: &mut Assignment,
    slots: impl IntoIterator<Item = usize>,
    excluded: impl Fn(usize) -> bool,
) -> Result<bool, SolverError> {
    let mut complete = true;

    for slot in slots {
        if assignment.choice(slot).is_some() {
            continue;
        }

        let Some((candidate, marginal)) = best_candidate(ctx, assignment, slot, &excluded)? else {
            complete = false;
            continue;
        };

        assignment.place(ctx, slot, candidate)?;
        assignment.recompute(ctx)?;

        debug!(slot, candidate, cost = marginal.cost, "greedy placement");
    }

    Ok(complete)
}

/// Candidate of `slot` with the smallest marginal cost.
///
/// Ties go to the higher reward, then the lower unit price, then the lower seller index.
///
/// # Errors
///
/// Returns a [`SolverError`] if pricing fails.
pub(crate) fn best_candidate(
    ctx: &PricingContext<'_>,
    assignment: &Assignment,
    slot: usize,
    excluded: impl Fn(usize) -> bool,
) -> Result<Option<(usize, Marginal)>, SolverError> {
    let mut best: Option<(usize, Marginal, i64, usize)> = None;

    for (idx, candidate) in ctx.candidates(slot).iter().enumerate() {
        if excluded(candidate.seller()) {
            continue;
        }

        let marginal = assignment.marginal(ctx, slot, idx)?;
        let key = (marginal, candidate.unit_price(), candidate.seller());

        let better = match &best {
            None => true,
            Some((_, best_marginal, best_price, best_seller)) => {
                compare(key, (*best_marginal, *best_price, *best_seller)) == Ordering::Less
            }
        };

        if better {
            best = Some((idx, marginal, candidate.unit_price(), candidate.seller()));
        }
    }

    Ok(best.map(|(idx, marginal, _, _)| (idx, marginal)))
}

fn compare(a: (Marginal, i64, usize), b: (Marginal, i64, usize)) -> Ordering {
    a.0.cost
        .cmp(&b.0.cost)
        .then_with(|| b.0.reward.cmp(&a.0.reward))
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(&b.2))
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use crate::solvers::test_support::Fixture;

    use super::*;

    #[test]
    fn single_item_goes_to_cheapest_landed_seller() -> TestResult {
        let fixture = Fixture::new(
            &[("a", "seller-1", 1_000), ("a", "seller-2", 1_200)],
            &[("seller-1", 3_000, Some(30_000)), ("seller-2", 0, Some(0))],
        )?;
        let ctx = fixture.context();

        for ordering in GreedyOrdering::ALL {
            let assignment = GreedyStrategy::new(ordering).assign(&ctx)?;

            assert_eq!(assignment.total(), 1_200);
            assert_eq!(assignment.seller_of(0), fixture.seller("seller-2"));
        }

        Ok(())
    }

    #[test]
    fn later_items_join_a_seller_already_paying_shipping() -> TestResult {
        let fixture = Fixture::new(
            &[
                ("a", "shop-a", 5_000),
                ("b", "shop-a", 5_000),
                ("b", "shop-b", 5_000),
            ],
            &[
                ("shop-a", 3_000, Some(30_000)),
                ("shop-b", 3_000, Some(30_000)),
            ],
        )?;
        let ctx = fixture.context();
        let assignment = GreedyStrategy::new(GreedyOrdering::DescendingPrice).assign(&ctx)?;

        assert_eq!(assignment.total(), 13_000);
        assert_eq!(assignment.used_buckets().count(), 1);

        Ok(())
    }

    #[test]
    fn orderings_sort_slots_deterministically() -> TestResult {
        let fixture = Fixture::new(
            &[
                ("a", "shop-a", 100),
                ("a", "shop-b", 900),
                ("b", "shop-a", 500),
                ("b", "shop-b", 600),
                ("c", "shop-a", 300),
            ],
            &[],
        )?;
        let ctx = fixture.context();

        assert_eq!(GreedyOrdering::DescendingPrice.order(&ctx), vec![1, 2, 0]);
        assert_eq!(GreedyOrdering::AscendingPrice.order(&ctx), vec![0, 2, 1]);
        assert_eq!(GreedyOrdering::DescendingSpread.order(&ctx), vec![0, 1, 2]);

        Ok(())
    }

    #[test]
    fn excluded_sellers_are_skipped() -> TestResult {
        let fixture = Fixture::new(
            &[("a", "shop-a", 100), ("b", "shop-a", 100), ("b", "shop-b", 900)],
            &[("shop-a", 0, None), ("shop-b", 0, None)],
        )?;
        let ctx = fixture.context();
        let shop_a = fixture.seller("shop-a").ok_or("missing seller")?;

        let mut assignment = Assignment::new(&ctx);
        let complete = fill(&ctx, &mut assignment, [0, 1], |seller| seller == shop_a)?;

        assert!(!complete);
        assert_eq!(assignment.seller_of(0), None);
        assert_eq!(assignment.seller_of(1), fixture.seller("shop-b"));

        Ok(())
    }
}
