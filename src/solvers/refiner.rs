//! Local Search Refiner
//!
//! Improves an assignment with four kinds of move, tried in a fixed order on every pass:
//! single-item moves, bundle moves onto a free-shipping threshold, seller consolidation and
//! seller elimination. Every candidate move is evaluated on a trial copy through the
//! canonical recompute and only kept if it passes its acceptance rule.
//!
//! A pass that commits nothing leaves the refiner [`RefinerState::Stable`], as does running
//! out of passes.

use std::collections::BTreeSet;

use decimal_percentage::Percentage;
use num_traits::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};

use crate::{
    pricing::percentage_value,
    solvers::{
        SolverError,
        greedy::fill,
        state::{Assignment, PricingContext},
        threshold::{ThresholdCombinationFinder, ThresholdConfig},
    },
};

/// Default number of refinement passes.
pub const DEFAULT_ITERATION_BUDGET: usize = 100;

/// Refiner state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinerState {
    /// The last pass committed at least one move.
    Improving,

    /// No move applies, or the pass budget is spent. Terminal.
    Stable,
}

/// Refiner settings.
#[derive(Debug, Clone, Copy)]
pub struct RefinerConfig {
    /// Maximum number of passes
    pub iteration_budget: usize,

    /// Largest cost increase accepted for a consolidation, as a share of the two sellers'
    /// combined cost. Zero disables tolerated consolidations.
    pub consolidation_tolerance: Percentage,

    /// Threshold finder settings used for bundle moves
    pub threshold: ThresholdConfig,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            iteration_budget: DEFAULT_ITERATION_BUDGET,
            consolidation_tolerance: Percentage::from(Decimal::new(5, 2)),
            threshold: ThresholdConfig::default(),
        }
    }
}

/// Number of moves committed, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveCounts {
    /// One item moved to another seller
    pub single_item: usize,

    /// Items moved together onto a free-shipping threshold
    pub bundle: usize,

    /// Every item of one seller moved to another
    pub consolidation: usize,

    /// Consolidations accepted within the tolerance, also counted in `consolidation`
    pub tolerated_consolidation: usize,

    /// A seller removed and its items reassigned
    pub elimination: usize,
}

impl MoveCounts {
    /// Total number of committed moves.
    pub fn total(&self) -> usize {
        self.single_item + self.bundle + self.consolidation + self.elimination
    }
}

/// What a refinement run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementReport {
    /// Passes run
    pub passes: usize,

    /// Moves committed
    pub moves: MoveCounts,

    /// Whether the run stopped because the budget was spent
    pub budget_exhausted: bool,

    /// Total before refinement
    pub initial_total: i64,

    /// Total after refinement
    pub final_total: i64,
}

/// Local search over seller assignments.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSearchRefiner {
    config: RefinerConfig,
}

impl LocalSearchRefiner {
    /// Create a refiner.
    pub fn new(config: RefinerConfig) -> Self {
        Self { config }
    }

    /// Refine an assignment until no move applies or the budget runs out.
    ///
    /// Every committed move lowers the total except a tolerated consolidation, which may raise
    /// it by at most the consolidation tolerance and closes its source seller. The returned
    /// assignment is the final state, so a tolerated consolidation is part of it.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if pricing fails.
    #[tracing::instrument(
        name = "solvers.refiner.refine",
        skip(self, ctx, assignment),
        fields(initial_total = assignment.total(), final_total = tracing::field::Empty),
        err
    )]
    pub fn refine(
        &self,
        ctx: &PricingContext<'_>,
        assignment: Assignment,
    ) -> Result<(Assignment, RefinementReport), SolverError> {
        let mut run = Run {
            ctx,
            finder: ThresholdCombinationFinder::new(self.config.threshold),
            tolerance: percentage_value(&self.config.consolidation_tolerance),
            initial_total: assignment.total(),
            current: assignment,
            closed: BTreeSet::new(),
            moves: MoveCounts::default(),
        };

        let mut state = RefinerState::Improving;
        let mut passes = 0;

        while state == RefinerState::Improving {
            if passes >= self.config.iteration_budget {
                break;
            }

            passes += 1;
            state = run.pass()?;

            debug!(pass = passes, total = run.current.total(), ?state, "refinement pass");
        }

        let budget_exhausted = state == RefinerState::Improving;
        let report = RefinementReport {
            passes,
            moves: run.moves,
            budget_exhausted,
            initial_total: run.initial_total,
            final_total: run.current.total(),
        };

        tracing::Span::current().record("final_total", report.final_total);

        info!(
            passes,
            moves = report.moves.total(),
            budget_exhausted,
            "refinement finished"
        );

        Ok((run.current, report))
    }
}

struct Run<'r, 'c> {
    ctx: &'r PricingContext<'c>,
    finder: ThresholdCombinationFinder,
    tolerance: Decimal,
    initial_total: i64,
    current: Assignment,
    closed: BTreeSet<usize>,
    moves: MoveCounts,
}

impl Run<'_, '_> {
    fn pass(&mut self) -> Result<RefinerState, SolverError> {
        let before = self.moves.total();

        self.single_item_moves()?;
        self.bundle_moves()?;
        self.consolidations()?;
        self.eliminations()?;

        if self.moves.total() == before {
            Ok(RefinerState::Stable)
        } else {
            Ok(RefinerState::Improving)
        }
    }

    fn commit(&mut self, assignment: Assignment) {
        self.current = assignment;
    }

    fn single_item_moves(&mut self) -> Result<(), SolverError> {
        let ctx = self.ctx;

        for slot in 0..ctx.slot_count() {
            let Some(current) = self.current.choice(slot) else {
                continue;
            };

            let mut best: Option<Assignment> = None;

            for (idx, candidate) in ctx.candidates(slot).iter().enumerate() {
                if idx == current.candidate() || self.closed.contains(&candidate.seller()) {
                    continue;
                }

                let trial = self.current.trial(ctx, |moved| moved.place(ctx, slot, idx))?;
                let incumbent = best.as_ref().map_or(self.current.total(), Assignment::total);

                if trial.total() < incumbent {
                    best = Some(trial);
                }
            }

            if let Some(moved) = best {
                debug!(slot, from = self.current.total(), to = moved.total(), "single-item move");

                self.commit(moved);
                self.moves.single_item += 1;
            }
        }

        Ok(())
    }

    fn bundle_moves(&mut self) -> Result<(), SolverError> {
        let ctx = self.ctx;

        for seller in 0..ctx.seller_count() {
            if self.closed.contains(&seller) {
                continue;
            }

            let combinations = self.finder.find(ctx, &self.current, seller, |_| true)?;

            for combination in &combinations {
                if let Some(moved) = self.finder.try_apply(ctx, &self.current, combination)? {
                    debug!(
                        seller,
                        items = combination.slots().len(),
                        from = self.current.total(),
                        to = moved.total(),
                        "bundle move"
                    );

                    self.commit(moved);
                    self.moves.bundle += 1;

                    break;
                }
            }
        }

        Ok(())
    }

    fn consolidations(&mut self) -> Result<(), SolverError> {
        let ctx = self.ctx;

        for source in 0..ctx.seller_count() {
            if self.closed.contains(&source) {
                continue;
            }

            let source_bucket = self.current.bucket(source)?;

            if source_bucket.is_empty() {
                continue;
            }

            let slots: Vec<usize> = source_bucket.slots().collect();
            let source_total = source_bucket.total();

            let mut improving: Option<Assignment> = None;
            let mut tolerated: Option<(Assignment, usize)> = None;

            for target in 0..ctx.seller_count() {
                if target == source || self.closed.contains(&target) {
                    continue;
                }

                let target_bucket = self.current.bucket(target)?;

                if target_bucket.is_empty() {
                    continue;
                }

                let offered = slots.iter().all(|slot| {
                    ctx.catalog()
                        .entry(*slot)
                        .is_some_and(|entry| entry.candidate_at(target).is_some())
                });

                if !offered {
                    continue;
                }

                let combined = source_total
                    .checked_add(target_bucket.total())
                    .ok_or(SolverError::Overflow)?;

                let trial = self.current.trial(ctx, |moved| {
                    for slot in &slots {
                        moved.place_at(ctx, *slot, target)?;
                    }

                    Ok(())
                })?;

                let increase = trial
                    .total()
                    .checked_sub(self.current.total())
                    .ok_or(SolverError::Overflow)?;

                if increase < 0 {
                    let incumbent = improving.as_ref().map_or(i64::MAX, Assignment::total);

                    if trial.total() < incumbent {
                        improving = Some(trial);
                    }
                } else if self.tolerance > Decimal::ZERO && increase <= self.allowance(combined) {
                    let incumbent = tolerated.as_ref().map_or(i64::MAX, |(a, _)| a.total());

                    if trial.total() < incumbent {
                        tolerated = Some((trial, target));
                    }
                }
            }

            if let Some(moved) = improving {
                debug!(source, to = moved.total(), "consolidation");

                self.commit(moved);
                self.moves.consolidation += 1;
            } else if let Some((moved, target)) = tolerated {
                debug!(
                    source,
                    target,
                    from = self.current.total(),
                    to = moved.total(),
                    "tolerated consolidation, closing seller"
                );

                self.commit(moved);
                self.closed.insert(source);
                self.moves.consolidation += 1;
                self.moves.tolerated_consolidation += 1;
            }
        }

        Ok(())
    }

    fn eliminations(&mut self) -> Result<(), SolverError> {
        let ctx = self.ctx;

        for seller in 0..ctx.seller_count() {
            let bucket = self.current.bucket(seller)?;

            if bucket.is_empty() {
                continue;
            }

            let slots: Vec<usize> = bucket.slots().collect();
            let closed = &self.closed;
            let mut complete = false;

            let trial = self.current.trial(ctx, |moved| {
                for slot in &slots {
                    moved.remove(*slot);
                }

                moved.recompute(ctx)?;

                complete = fill(ctx, moved, slots.iter().copied(), |other| {
                    other == seller || closed.contains(&other)
                })?;

                Ok(())
            })?;

            if complete && trial.total() < self.current.total() {
                debug!(seller, from = self.current.total(), to = trial.total(), "seller elimination");

                self.commit(trial);
                self.moves.elimination += 1;
            }
        }

        Ok(())
    }

    fn allowance(&self, combined: i64) -> i64 {
        if self.tolerance <= Decimal::ZERO || combined <= 0 {
            return 0;
        }

        (self.tolerance * Decimal::from(combined))
            .round_dp_with_strategy(0, RoundingStrategy::ToZero)
            .to_i64()
            .unwrap_or(0)
    }
}
