//! MILP Solver
//!
//! Formulates the whole purchase as a mixed integer program. One binary variable per
//! (item, candidate) routes the item; per-seller binaries pay or waive the flat fee; bonus
//! binaries claim each product's one-time bonus at most once. The solved routing is priced
//! again through [`Assignment`], so the MILP objective never leaks into reported totals.

use std::fmt;

use good_lp::{Expression, ProblemVariables, Solution, SolverModel, Variable, variable};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, info};

#[cfg(feature = "solver-highs")]
use good_lp::solvers::highs::highs as default_solver;
#[cfg(all(not(feature = "solver-highs"), feature = "solver-microlp"))]
use good_lp::solvers::microlp::microlp as default_solver;

use crate::{
    pricing::i64_to_f64_exact,
    products::ProductKey,
    solvers::{
        SolverError,
        state::{Assignment, PricingContext},
    },
};

/// Binary threshold for determining truthiness
pub const BINARY_THRESHOLD: f64 = 0.5;

/// Default largest cart the MILP solver accepts. Zero disables it.
pub const DEFAULT_MAX_ITEMS: usize = 0;

/// Outcome of the MILP pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MilpStatus {
    /// The MILP pass is disabled.
    Disabled,

    /// The cart is too large for the configured limit.
    Skipped {
        /// Resolvable items
        items: usize,

        /// Limit
        max: usize,
    },

    /// The solver returned a routing.
    Solved {
        /// Exact total of the routing
        total: i64,

        /// Whether it beat the incumbent
        improved: bool,
    },

    /// The solver failed; the heuristic result stands.
    Failed(String),
}

impl fmt::Display for MilpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MilpStatus::Disabled => write!(f, "disabled"),
            MilpStatus::Skipped { items, max } => {
                write!(f, "skipped ({items} items exceeds the limit of {max})")
            }
            MilpStatus::Solved { total, improved } => {
                write!(f, "solved (total {total}, improved: {improved})")
            }
            MilpStatus::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Relation operator for a linear constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintRelation {
    Eq,
    Leq,
}

#[derive(Debug, Clone)]
struct LinearConstraint {
    lhs: Expression,
    relation: ConstraintRelation,
    rhs: f64,
}

/// Variables, objective and constraints of a purchase MILP.
struct Formulation {
    pb: ProblemVariables,
    cost: Expression,
    placements: Vec<SmallVec<[Variable; 8]>>,
    constraints: Vec<LinearConstraint>,
}

impl fmt::Debug for Formulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formulation")
            .field("pb", &"<ProblemVariables>")
            .field("cost", &"<Expression>")
            .field(
                "placements",
                &format!("[{} slots]", self.placements.len()),
            )
            .field(
                "constraints",
                &format!("[{} constraints]", self.constraints.len()),
            )
            .finish()
    }
}

impl Formulation {
    fn build(ctx: &PricingContext<'_>) -> Result<Self, SolverError> {
        let mut formulation = Self {
            pb: ProblemVariables::new(),
            cost: Expression::default(),
            placements: Vec::with_capacity(ctx.slot_count()),
            constraints: Vec::new(),
        };

        let sellers = ctx.seller_count();
        let mut seller_lines: Vec<Expression> = vec![Expression::default(); sellers];
        let mut seller_placements: Vec<SmallVec<[Variable; 8]>> = vec![SmallVec::new(); sellers];
        let mut bonus_claims: FxHashMap<ProductKey, Expression> = FxHashMap::default();

        for slot in 0..ctx.slot_count() {
            let mut presence = Expression::default();
            let mut vars = SmallVec::new();

            for candidate in ctx.candidates(slot) {
                let x = formulation.pb.add(variable().binary());
                let rewards = ctx.terms(candidate.seller())?.rewards();

                let line = candidate.line_total();
                let percentage = rewards.percentage_reward(candidate.unit_price(), candidate.quantity())?;

                formulation.add_to_objective(x, line - percentage)?;
                presence += x;

                if let Some(expr) = seller_lines.get_mut(candidate.seller()) {
                    *expr += x * coefficient(line)?;
                }

                if let Some(list) = seller_placements.get_mut(candidate.seller()) {
                    list.push(x);
                }

                if let Some((amount, min_price)) = rewards.bonus()
                    && candidate.unit_price() >= min_price
                    && !ctx.seed().contains(candidate.product())
                {
                    let b = formulation.pb.add(variable().binary());

                    formulation.add_to_objective(b, -amount)?;
                    formulation.add_leq(Expression::from(b) - x, 0.0);

                    *bonus_claims.entry(candidate.product()).or_default() += b;
                }

                vars.push(x);
            }

            formulation.add_eq(presence, 1.0);
            formulation.placements.push(vars);
        }

        for claims in bonus_claims.into_values() {
            formulation.add_leq(claims, 1.0);
        }

        for (seller, (lines, placed)) in seller_lines.into_iter().zip(seller_placements).enumerate() {
            if placed.is_empty() {
                continue;
            }

            let shipping = ctx.terms(seller)?.shipping();
            let used = formulation.pb.add(variable().binary());

            for x in &placed {
                formulation.add_leq(Expression::from(*x) - used, 0.0);
            }

            if let Some(pickup_fee) = shipping.pickup_fee() {
                formulation.add_to_objective(used, pickup_fee)?;
                continue;
            }

            formulation.add_to_objective(used, shipping.flat_fee())?;

            if let (true, Some(threshold)) = (shipping.has_reachable_threshold(), shipping.threshold())
            {
                let free = formulation.pb.add(variable().binary());

                formulation.add_to_objective(free, -shipping.flat_fee())?;
                formulation.add_leq(Expression::from(free) - used, 0.0);
                formulation.add_leq(free * coefficient(threshold)? - lines, 0.0);
            }
        }

        Ok(formulation)
    }

    fn add_to_objective(&mut self, var: Variable, minor_units: i64) -> Result<(), SolverError> {
        self.cost += var * coefficient(minor_units)?;

        Ok(())
    }

    fn add_eq(&mut self, lhs: Expression, rhs: f64) {
        self.constraints.push(LinearConstraint {
            lhs,
            relation: ConstraintRelation::Eq,
            rhs,
        });
    }

    fn add_leq(&mut self, lhs: Expression, rhs: f64) {
        self.constraints.push(LinearConstraint {
            lhs,
            relation: ConstraintRelation::Leq,
            rhs,
        });
    }
}

fn coefficient(minor_units: i64) -> Result<f64, SolverError> {
    i64_to_f64_exact(minor_units).ok_or(SolverError::MinorUnitsNotRepresentable(minor_units))
}

fn apply_constraints<S: SolverModel>(mut model: S, constraints: Vec<LinearConstraint>) -> S {
    for constraint in constraints {
        model = match constraint.relation {
            ConstraintRelation::Eq => model.with(constraint.lhs.eq(constraint.rhs)),
            ConstraintRelation::Leq => model.with(constraint.lhs.leq(constraint.rhs)),
        };
    }

    model
}

/// Exact MILP solver for carts up to a configured size.
#[derive(Debug, Clone, Copy)]
pub struct MilpSolver {
    max_items: usize,
}

impl Default for MilpSolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS)
    }
}

impl MilpSolver {
    /// Create a solver accepting carts of at most `max_items` items. Zero disables it.
    pub fn new(max_items: usize) -> Self {
        Self { max_items }
    }

    /// Whether the solver should run for this cart, or the status explaining why not.
    ///
    /// # Errors
    ///
    /// Returns [`MilpStatus::Disabled`] or [`MilpStatus::Skipped`].
    pub fn check(&self, ctx: &PricingContext<'_>) -> Result<(), MilpStatus> {
        if self.max_items == 0 {
            return Err(MilpStatus::Disabled);
        }

        let items = ctx.slot_count();

        if items > self.max_items {
            return Err(MilpStatus::Skipped {
                items,
                max: self.max_items,
            });
        }

        Ok(())
    }

    /// Solve the purchase MILP and return the exactly priced routing.
    ///
    /// # Errors
    ///
    /// Returns a [`SolverError`] if the model cannot be built or solved, or if the solution
    /// doesn't route every item.
    #[tracing::instrument(
        name = "solvers.milp.solve",
        skip(self, ctx),
        fields(items = ctx.slot_count(), total = tracing::field::Empty),
        err
    )]
    pub fn solve(&self, ctx: &PricingContext<'_>) -> Result<Assignment, SolverError> {
        let Formulation {
            pb,
            cost,
            placements,
            constraints,
        } = Formulation::build(ctx)?;

        debug!(constraints = constraints.len(), "milp formulation built");

        let model = apply_constraints(pb.minimise(cost).using(default_solver), constraints);
        let solution = model.solve()?;

        let mut choices = Vec::with_capacity(placements.len());

        for vars in &placements {
            let chosen = vars
                .iter()
                .position(|var| solution.value(*var) > BINARY_THRESHOLD)
                .ok_or(SolverError::InvariantViolation {
                    message: "milp solution left an item unrouted",
                })?;

            choices.push(Some(chosen));
        }

        let assignment = Assignment::from_candidates(ctx, &choices)?;

        tracing::Span::current().record("total", assignment.total());
        info!(total = assignment.total(), "milp routing priced");

        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use decimal_percentage::Percentage;
    use rust_decimal::Decimal;
    use rusty_money::{Money, iso::JPY};
    use testresult::TestResult;

    use crate::{
        rewards::{PercentageRule, ProductBonus, SellerRewards},
        solvers::test_support::Fixture,
    };

    use super::*;

    #[test]
    fn disabled_by_default() -> TestResult {
        let fixture = Fixture::new(&[("a", "shop-a", 100)], &[])?;
        let ctx = fixture.context();

        assert_eq!(MilpSolver::default().check(&ctx), Err(MilpStatus::Disabled));

        Ok(())
    }

    #[test]
    fn skips_carts_over_the_limit() -> TestResult {
        let fixture = Fixture::new(&[("a", "shop-a", 100), ("b", "shop-a", 100)], &[])?;
        let ctx = fixture.context();

        assert_eq!(
            MilpSolver::new(1).check(&ctx),
            Err(MilpStatus::Skipped { items: 2, max: 1 })
        );

        Ok(())
    }

    #[test]
    fn reaches_threshold_when_it_pays() -> TestResult {
        let fixture = Fixture::new(
            &[
                ("a", "shop-a", 10_500),
                ("a", "shop-b", 10_000),
                ("b", "shop-a", 10_500),
                ("b", "shop-b", 10_000),
                ("c", "shop-a", 10_000),
                ("c", "shop-c", 9_000),
            ],
            &[
                ("shop-a", 3_000, Some(30_000)),
                ("shop-b", 2_000, None),
                ("shop-c", 2_000, None),
            ],
        )?;
        let ctx = fixture.context();
        let assignment = MilpSolver::new(10).solve(&ctx)?;

        assert_eq!(assignment.total(), 31_000);
        assert_eq!(assignment.used_buckets().count(), 1);

        Ok(())
    }

    #[test]
    fn pays_flat_fee_below_threshold() -> TestResult {
        let fixture = Fixture::new(
            &[("a", "seller-1", 1_000), ("a", "seller-2", 1_200)],
            &[("seller-1", 3_000, Some(30_000)), ("seller-2", 0, Some(0))],
        )?;
        let ctx = fixture.context();
        let assignment = MilpSolver::new(10).solve(&ctx)?;

        assert_eq!(assignment.total(), 1_200);
        assert_eq!(assignment.seller_of(0), fixture.seller("seller-2"));

        Ok(())
    }

    #[test]
    fn rewards_shift_the_routing() -> TestResult {
        let mut fixture = Fixture::new(
            &[("a", "shop-a", 1_000), ("a", "shop-b", 1_050)],
            &[("shop-a", 0, None), ("shop-b", 0, None)],
        )?;

        fixture.rewards.insert(
            "shop-b",
            SellerRewards::new()
                .with_rule(PercentageRule::new("points", Percentage::from(Decimal::new(10, 2))))
                .with_bonus(ProductBonus::new(
                    "welcome",
                    Money::from_minor(100, JPY),
                    Money::from_minor(500, JPY),
                )),
        )?;
        fixture.toggles.set("points", true);
        fixture.toggles.set("welcome", true);

        let ctx = fixture.context();
        let assignment = MilpSolver::new(10).solve(&ctx)?;

        // 1050 − 105 − 100
        assert_eq!(assignment.total(), 845);
        assert_eq!(assignment.seller_of(0), fixture.seller("shop-b"));

        Ok(())
    }
}
