//! Bounded Exhaustive Solver
//!
//! Enumerates every assignment of a small cart with branch-and-bound. A branch is cut once
//! its lower bound reaches the best complete total found so far, starting from the refined
//! incumbent. The bound never overestimates, so when the search finishes the result is a
//! global optimum.

use std::fmt;

use tracing::{debug, info};

use crate::solvers::{
    SolverError,
    state::{Assignment, PricingContext},
};

/// Default largest cart the exhaustive solver accepts.
pub const DEFAULT_MAX_ITEMS: usize = 12;

/// Default largest number of complete assignments the exhaustive solver accepts.
pub const DEFAULT_MAX_SEARCH_SPACE: u64 = 1_000_000;

/// Size limits of the exhaustive solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExhaustiveLimits {
    /// Largest number of resolvable items
    pub max_items: usize,

    /// Largest product of per-item candidate counts
    pub max_search_space: u64,
}

impl Default for ExhaustiveLimits {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_search_space: DEFAULT_MAX_SEARCH_SPACE,
        }
    }
}

/// Why the exhaustive solver didn't run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustiveSkip {
    /// The cart has more resolvable items than allowed.
    TooManyItems {
        /// Resolvable items
        items: usize,

        /// Limit
        max: usize,
    },

    /// The search space is larger than allowed.
    SearchSpaceTooLarge {
        /// Product of candidate counts, saturating at `u64::MAX`
        size: u64,

        /// Limit
        max: u64,
    },
}

impl fmt::Display for ExhaustiveSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustiveSkip::TooManyItems { items, max } => {
                write!(f, "{items} items exceeds the limit of {max}")
            }
            ExhaustiveSkip::SearchSpaceTooLarge { size, max } => {
                write!(f, "search space of {size} exceeds the limit of {max}")
            }
        }
    }
}

/// Outcome of the exhaustive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustiveStatus {
    /// The solver was not asked to run.
    NotRun,

    /// The cart is too large; the heuristic result stands.
    Skipped(ExhaustiveSkip),

    /// The search finished, so the best total is a global optimum.
    Completed {
        /// Search nodes visited
        nodes: u64,

        /// Whether the search beat the incumbent
        improved: bool,
    },
}

/// Branch-and-bound over every assignment of a small cart.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExhaustiveSolver {
    limits: ExhaustiveLimits,
}

impl ExhaustiveSolver {
    /// Create a solver.
    pub fn new(limits: ExhaustiveLimits) -> Self {
        Self { limits }
    }

    /// Check whether the cart is small enough, returning the search-space size.
    ///
    /// # Errors
    ///
    /// Returns the [`ExhaustiveSkip`] reason when the cart is too large.
    pub fn check(&self, ctx: &PricingContext<'_>) -> Result<u64, ExhaustiveSkip> {
        let items = ctx.slot_count();

        if items > self.limits.max_items {
            return Err(ExhaustiveSkip::TooManyItems {
                items,
                max: self.limits.max_items,
            });
        }

        let size = ctx
            .catalog()
            .entries()
            .iter()
            .map(|entry| u64::try_from(entry.candidates().len()).unwrap_or(u64::MAX))
            .fold(1_u64, u64::saturating_mul);

        if size > self.limits.max_search_space {
            return Err(ExhaustiveSkip::SearchSpaceTooLarge {
                size,
                max: self.limits.max_search_space,
            });
        }

        Ok(size)
    }

    /// Search for an assignment cheaper than `incumbent`.
    ///
    /// Returns the improved assignment, if any, and the search status.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if pricing fails.
    #[tracing::instrument(
        name = "solvers.exhaustive.solve",
        skip(self, ctx, incumbent),
        fields(incumbent = incumbent.total()),
        err
    )]
    pub fn solve(
        &self,
        ctx: &PricingContext<'_>,
        incumbent: &Assignment,
    ) -> Result<(Option<Assignment>, ExhaustiveStatus), SolverError> {
        let size = match self.check(ctx) {
            Ok(size) => size,
            Err(skip) => {
                info!(reason = %skip, "exhaustive search skipped");

                return Ok((None, ExhaustiveStatus::Skipped(skip)));
            }
        };

        let bounds = Bounds::new(ctx)?;
        let slots = ctx.slot_count();

        let mut search = Search {
            ctx,
            bounds: &bounds,
            subtotals: vec![0; ctx.seller_count()],
            line_counts: vec![0; ctx.seller_count()],
            chosen: vec![None; slots],
            placed_bound: 0,
            best_total: incumbent.total(),
            best: None,
            nodes: 0,
        };

        search.descend(0)?;

        let improved = search.best.is_some();

        info!(size, nodes = search.nodes, improved, "exhaustive search finished");

        Ok((
            search.best,
            ExhaustiveStatus::Completed {
                nodes: search.nodes,
                improved,
            },
        ))
    }
}

/// Precomputed optimistic costs.
struct Bounds {
    /// Per slot and candidate: `line_total − max_reward`
    optimistic: Vec<Vec<i64>>,

    /// `suffix_min[d]`: cheapest optimistic cost of slots `d..`
    suffix_min: Vec<i64>,

    /// `reachable[d][s]`: sum of line totals at seller `s` over slots `d..`
    reachable: Vec<Vec<i64>>,
}

impl Bounds {
    fn new(ctx: &PricingContext<'_>) -> Result<Self, SolverError> {
        let slots = ctx.slot_count();
        let sellers = ctx.seller_count();

        let mut optimistic = Vec::with_capacity(slots);

        for slot in 0..slots {
            let mut costs = Vec::new();

            for candidate in ctx.candidates(slot) {
                let max_reward = ctx
                    .terms(candidate.seller())?
                    .rewards()
                    .max_reward(candidate.unit_price(), candidate.quantity())?;

                costs.push(candidate.line_total() - max_reward);
            }

            optimistic.push(costs);
        }

        let mut suffix_min = vec![0_i64; slots + 1];
        let mut reachable = vec![vec![0_i64; sellers]; slots + 1];

        for slot in (0..slots).rev() {
            let cheapest = optimistic
                .get(slot)
                .and_then(|costs| costs.iter().min().copied())
                .unwrap_or(0);

            let next_min = suffix_min.get(slot + 1).copied().unwrap_or(0);

            if let Some(min) = suffix_min.get_mut(slot) {
                *min = next_min.checked_add(cheapest).ok_or(SolverError::Overflow)?;
            }

            let mut row = reachable.get(slot + 1).cloned().unwrap_or_default();

            for candidate in ctx.candidates(slot) {
                if let Some(sum) = row.get_mut(candidate.seller()) {
                    *sum = sum
                        .checked_add(candidate.line_total())
                        .ok_or(SolverError::Overflow)?;
                }
            }

            if let Some(target) = reachable.get_mut(slot) {
                *target = row;
            }
        }

        Ok(Self {
            optimistic,
            suffix_min,
            reachable,
        })
    }
}

struct Search<'s, 'c> {
    ctx: &'s PricingContext<'c>,
    bounds: &'s Bounds,
    subtotals: Vec<i64>,
    line_counts: Vec<usize>,
    chosen: Vec<Option<usize>>,
    placed_bound: i64,
    best_total: i64,
    best: Option<Assignment>,
    nodes: u64,
}

impl Search<'_, '_> {
    fn descend(&mut self, depth: usize) -> Result<(), SolverError> {
        self.nodes += 1;

        if depth == self.chosen.len() {
            let assignment = Assignment::from_candidates(self.ctx, &self.chosen)?;

            if assignment.total() < self.best_total {
                debug!(total = assignment.total(), "exhaustive improvement");

                self.best_total = assignment.total();
                self.best = Some(assignment);
            }

            return Ok(());
        }

        if self.lower_bound(depth)? >= self.best_total {
            return Ok(());
        }

        let candidates = self.ctx.candidates(depth);

        for (idx, candidate) in candidates.iter().enumerate() {
            let optimistic = self
                .bounds
                .optimistic
                .get(depth)
                .and_then(|costs| costs.get(idx))
                .copied()
                .unwrap_or(0);

            let seller = candidate.seller();

            self.apply(depth, Some(idx), seller, candidate.line_total(), optimistic, 1)?;
            self.descend(depth + 1)?;
            self.apply(depth, None, seller, -candidate.line_total(), -optimistic, -1)?;
        }

        Ok(())
    }

    fn apply(
        &mut self,
        depth: usize,
        choice: Option<usize>,
        seller: usize,
        line_total: i64,
        optimistic: i64,
        lines: isize,
    ) -> Result<(), SolverError> {
        let (Some(subtotal), Some(count), Some(slot)) = (
            self.subtotals.get_mut(seller),
            self.line_counts.get_mut(seller),
            self.chosen.get_mut(depth),
        ) else {
            return Err(SolverError::InvariantViolation {
                message: "exhaustive search index out of range",
            });
        };

        *subtotal += line_total;
        *count = count.checked_add_signed(lines).ok_or(SolverError::Overflow)?;
        *slot = choice;

        self.placed_bound += optimistic;

        Ok(())
    }

    /// Cost no completion of the current partial assignment can beat.
    ///
    /// Placed lines count at their price minus the largest reward they could earn. A seller
    /// already in use pays at least the fee for the largest subtotal it could still reach,
    /// since fees never increase with the subtotal. Remaining slots count at their cheapest
    /// optimistic cost.
    fn lower_bound(&self, depth: usize) -> Result<i64, SolverError> {
        let reachable = self
            .bounds
            .reachable
            .get(depth)
            .ok_or(SolverError::InvariantViolation {
                message: "exhaustive bound index out of range",
            })?;

        let mut fees: i64 = 0;

        for (seller, (subtotal, count)) in self.subtotals.iter().zip(&self.line_counts).enumerate() {
            if *count == 0 {
                continue;
            }

            let max_subtotal = subtotal.saturating_add(reachable.get(seller).copied().unwrap_or(0));

            fees += self.ctx.terms(seller)?.shipping().fee(max_subtotal);
        }

        let remaining = self.bounds.suffix_min.get(depth).copied().unwrap_or(0);

        Ok(self.placed_bound + fees + remaining)
    }
}
