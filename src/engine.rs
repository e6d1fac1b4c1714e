//! Engine
//!
//! Runs every heuristic strategy, refines each result, keeps the cheapest and checks it
//! against the exact solvers when the cart is small enough. The engine performs no I/O.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    cart::Cart,
    catalog::OfferCatalog,
    config::{ConfigError, EngineOptions},
    plan::{CandidateTotal, PlanAssembler, PlanDiagnostics, PlanError, PurchasePlan},
    pricing::PricingError,
    rewards::{RewardsCalculator, RewardsTable},
    shipping::{ShippingPolicyResolver, ShippingPolicyTable},
    solvers::{
        SolutionSource, SolverError,
        greedy::{GreedyOrdering, GreedyStrategy},
        milp::MilpStatus,
        refiner::{LocalSearchRefiner, RefinementReport},
        state::{Assignment, PricingContext},
        threshold::ThresholdCombinationFinder,
    },
};

/// Engine Errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Options are out of range.
    #[error("invalid input: {0}")]
    InvalidOptions(#[from] ConfigError),

    /// A policy table uses a different currency from the cart.
    #[error("invalid input: {table} table uses {actual}, cart uses {expected}")]
    CurrencyMismatch {
        /// Which table
        table: &'static str,

        /// Cart currency
        expected: &'static str,

        /// Table currency
        actual: &'static str,
    },

    /// Wrapped pricing error
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// Wrapped solver error
    #[error(transparent)]
    Solver(#[from] SolverError),

    /// Wrapped plan error
    #[error(transparent)]
    Plan(#[from] PlanError),
}

impl EngineError {
    /// Whether the error was caused by the caller's input rather than by the engine.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidOptions(_) | EngineError::CurrencyMismatch { .. }
        )
    }
}

/// Result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum PurchaseOutcome {
    /// Every item is in the plan.
    Solved(PurchasePlan),

    /// Some items are in the plan; the rest are listed as unresolved.
    Partial(PurchasePlan),

    /// No item could be bought. The plan is empty apart from its unresolved items.
    NoFeasiblePlan(PurchasePlan),
}

impl PurchaseOutcome {
    /// The plan, whatever the outcome
    pub fn plan(&self) -> &PurchasePlan {
        match self {
            PurchaseOutcome::Solved(plan)
            | PurchaseOutcome::Partial(plan)
            | PurchaseOutcome::NoFeasiblePlan(plan) => plan,
        }
    }

    /// Take the plan, whatever the outcome.
    pub fn into_plan(self) -> PurchasePlan {
        match self {
            PurchaseOutcome::Solved(plan)
            | PurchaseOutcome::Partial(plan)
            | PurchaseOutcome::NoFeasiblePlan(plan) => plan,
        }
    }

    /// False only when nothing could be bought.
    pub fn is_success(&self) -> bool {
        !matches!(self, PurchaseOutcome::NoFeasiblePlan(_))
    }
}

impl fmt::Display for PurchaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseOutcome::Solved(_) => write!(f, "solved"),
            PurchaseOutcome::Partial(plan) => {
                write!(f, "partial ({} unresolved)", plan.unresolved_items().len())
            }
            PurchaseOutcome::NoFeasiblePlan(_) => write!(f, "no feasible plan"),
        }
    }
}

/// Compute the cheapest way to buy `cart` from its sellers.
///
/// # Errors
///
/// Returns an [`EngineError`] for invalid options, policy tables in another currency, or an
/// internal solver failure.
pub fn compute_optimal_purchase(
    cart: &Cart<'_>,
    shipping: &ShippingPolicyTable<'_>,
    rewards: &RewardsTable<'_>,
    options: &EngineOptions,
) -> Result<PurchaseOutcome, EngineError> {
    Engine::new(options.clone())?.run(cart, shipping, rewards)
}

/// Purchase optimisation engine with validated options.
#[derive(Debug, Clone)]
pub struct Engine {
    options: EngineOptions,
}

struct Winner {
    assignment: Assignment,
    source: SolutionSource,
    report: Option<RefinementReport>,
}

impl Engine {
    /// Create an engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidOptions`] if an option is out of range.
    pub fn new(options: EngineOptions) -> Result<Self, EngineError> {
        options.validate()?;

        Ok(Self { options })
    }

    /// Options in use
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run the engine on one cart.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if a table's currency differs from the cart's or a solver
    /// fails.
    #[tracing::instrument(
        name = "engine.run",
        skip_all,
        fields(
            items = cart.len(),
            offers = cart.offers().len(),
            region = ?self.options.region,
            total = tracing::field::Empty,
            source = tracing::field::Empty,
        ),
        err
    )]
    pub fn run(
        &self,
        cart: &Cart<'_>,
        shipping: &ShippingPolicyTable<'_>,
        rewards: &RewardsTable<'_>,
    ) -> Result<PurchaseOutcome, EngineError> {
        let expected = cart.currency().iso_alpha_code;

        for (table, actual) in [
            ("shipping", shipping.currency().iso_alpha_code),
            ("rewards", rewards.currency().iso_alpha_code),
        ] {
            if actual != expected {
                return Err(EngineError::CurrencyMismatch {
                    table,
                    expected,
                    actual,
                });
            }
        }

        let catalog = OfferCatalog::build(cart, &self.options.catalog_options())?;
        let resolver =
            ShippingPolicyResolver::new(shipping, self.options.region, &self.options.pickup_enabled_sellers);
        let calculator = RewardsCalculator::new(rewards, &self.options.reward_toggles);
        let seed = catalog.rewarded_products(&self.options.previously_rewarded);
        let ctx = PricingContext::new(&catalog, &resolver, &calculator, seed);

        let mut diagnostics = PlanDiagnostics {
            fallback_policy_sellers: ctx.fallback_sellers().cloned().collect(),
            dropped_offers: catalog.dropped().clone(),
            ..PlanDiagnostics::default()
        };

        let assembler = PlanAssembler::new(cart, &ctx);

        if ctx.slot_count() == 0 {
            info!(unresolved = catalog.unresolved().len(), "no item has an eligible offer");

            let plan = assembler.assemble(&Assignment::new(&ctx), diagnostics)?;

            return Ok(PurchaseOutcome::NoFeasiblePlan(plan));
        }

        let mut winner = self.best_heuristic(&ctx, &mut diagnostics)?;

        let (exhaustive, status) = self.options.exhaustive_solver().solve(&ctx, &winner.assignment)?;

        diagnostics.exhaustive = status;

        if let Some(assignment) = exhaustive {
            winner = Winner {
                assignment,
                source: SolutionSource::Exhaustive,
                report: winner.report,
            };
        }

        diagnostics.milp = self.run_milp(&ctx, &mut winner);
        diagnostics.source = Some(winner.source);
        diagnostics.refinement = winner.report;

        let span = tracing::Span::current();
        span.record("total", winner.assignment.total());
        span.record("source", winner.source.to_string());

        let plan = assembler.assemble(&winner.assignment, diagnostics)?;

        info!(
            total = %plan.total_cost(),
            sellers = plan.sellers().len(),
            unresolved = plan.unresolved_items().len(),
            source = %winner.source,
            "purchase plan computed"
        );

        if plan.unresolved_items().is_empty() {
            Ok(PurchaseOutcome::Solved(plan))
        } else {
            Ok(PurchaseOutcome::Partial(plan))
        }
    }

    fn best_heuristic(
        &self,
        ctx: &PricingContext<'_>,
        diagnostics: &mut PlanDiagnostics,
    ) -> Result<Winner, EngineError> {
        let refiner = LocalSearchRefiner::new(self.options.refiner_config());
        let finder = ThresholdCombinationFinder::new(self.options.threshold_config());

        let mut best: Option<Winner> = None;

        let mut starts = Vec::with_capacity(GreedyOrdering::ALL.len() + 1);

        for ordering in GreedyOrdering::ALL {
            starts.push((ordering.source(), GreedyStrategy::new(ordering).assign(ctx)?));
        }

        starts.push((SolutionSource::ThresholdSeeded, finder.seed(ctx)?));

        for (source, start) in starts {
            let (refined, report) = refiner.refine(ctx, start)?;

            diagnostics.candidates.push(CandidateTotal {
                source,
                initial_total: report.initial_total,
                refined_total: report.final_total,
            });

            let better = best
                .as_ref()
                .is_none_or(|current| refined.total() < current.assignment.total());

            if better {
                best = Some(Winner {
                    assignment: refined,
                    source,
                    report: Some(report),
                });
            }
        }

        best.ok_or(EngineError::Solver(SolverError::InvariantViolation {
            message: "no heuristic candidate was produced",
        }))
    }

    fn run_milp(&self, ctx: &PricingContext<'_>, winner: &mut Winner) -> MilpStatus {
        let solver = self.options.milp_solver();

        if let Err(status) = solver.check(ctx) {
            return status;
        }

        match solver.solve(ctx) {
            Ok(assignment) => {
                let total = assignment.total();
                let improved = total < winner.assignment.total();

                if improved {
                    winner.assignment = assignment;
                    winner.source = SolutionSource::Milp;
                }

                MilpStatus::Solved { total, improved }
            }
            Err(err) => {
                warn!(error = %err, "milp solver failed, keeping heuristic result");

                MilpStatus::Failed(err.to_string())
            }
        }
    }
}
