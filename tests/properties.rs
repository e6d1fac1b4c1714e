//! Properties every plan must satisfy, checked against the demo fixture set and a few
//! hand-built carts.

use std::path::PathBuf;

use rusty_money::{Money, iso::JPY};
use testresult::TestResult;

use splitcart::{
    cart::Cart,
    config::EngineOptions,
    engine::{PurchaseOutcome, compute_optimal_purchase},
    fixtures::Fixture,
    items::Item,
    offers::Offer,
    rewards::{ProductBonus, RewardsTable, SellerRewards},
    shipping::{ShippingPolicy, ShippingPolicyTable},
    solvers::exhaustive::ExhaustiveStatus,
};

fn demo() -> Result<Fixture, Box<dyn std::error::Error>> {
    Ok(Fixture::from_set_in(
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        "demo",
    )?)
}

#[test]
fn totals_are_conserved() -> TestResult {
    let outcome = demo()?.run()?;
    let plan = outcome.plan();

    let mut products = 0;
    let mut shipping = 0;
    let mut rewards = 0;

    for seller in plan.sellers().values() {
        let mut subtotal = 0;

        for line in &seller.lines {
            assert_eq!(
                line.line_total.to_minor_units(),
                line.unit_price.to_minor_units() * i64::from(line.quantity)
            );

            subtotal += line.line_total.to_minor_units();
        }

        assert_eq!(seller.subtotal.to_minor_units(), subtotal);
        assert_eq!(
            seller.final_price.to_minor_units(),
            subtotal + seller.shipping_fee.to_minor_units() - seller.rewards_earned.to_minor_units()
        );

        products += subtotal;
        shipping += seller.shipping_fee.to_minor_units();
        rewards += seller.rewards_earned.to_minor_units();
    }

    assert_eq!(plan.total_product_cost(), Money::from_minor(products, JPY));
    assert_eq!(plan.total_shipping_cost(), Money::from_minor(shipping, JPY));
    assert_eq!(plan.total_rewards_earned(), Money::from_minor(rewards, JPY));
    assert_eq!(
        plan.total_cost(),
        Money::from_minor(products + shipping - rewards, JPY)
    );

    Ok(())
}

#[test]
fn identical_input_gives_identical_plans() -> TestResult {
    let fixture = demo()?;

    let first = fixture.run()?;
    let second = fixture.run()?;

    assert_eq!(first, second);

    Ok(())
}

#[test]
fn exhaustive_never_loses_to_the_heuristics() -> TestResult {
    let mut fixture = demo()?;

    let with_exhaustive = fixture.run()?;
    let diagnostics = with_exhaustive.plan().diagnostics();

    assert!(matches!(diagnostics.exhaustive, ExhaustiveStatus::Completed { .. }));

    let best_heuristic = diagnostics
        .candidates
        .iter()
        .map(|candidate| candidate.refined_total)
        .min()
        .ok_or("expected heuristic candidates")?;

    assert!(with_exhaustive.plan().total_cost().to_minor_units() <= best_heuristic);

    fixture.options_mut().exhaustive.max_items = 0;
    let heuristics_only = fixture.run()?;

    assert!(matches!(
        heuristics_only.plan().diagnostics().exhaustive,
        ExhaustiveStatus::Skipped(_)
    ));
    assert!(
        with_exhaustive.plan().total_cost().to_minor_units()
            <= heuristics_only.plan().total_cost().to_minor_units()
    );
    assert_eq!(
        heuristics_only.plan().total_cost().to_minor_units(),
        best_heuristic
    );

    Ok(())
}

#[test]
fn previously_rewarded_products_earn_no_bonus() -> TestResult {
    let cart = Cart::with_items(
        [Item::new("a", "Card A")],
        [Offer::new("a", "shop-a", Money::from_minor(5_000, JPY)).with_product("prod-a")],
        JPY,
    )?;

    let mut shipping = ShippingPolicyTable::new(JPY);
    shipping.insert("shop-a", ShippingPolicy::new(Money::from_minor(0, JPY)))?;

    let mut rewards = RewardsTable::new(JPY);
    rewards.insert(
        "shop-a",
        SellerRewards::new().with_bonus(ProductBonus::new(
            "bonus",
            Money::from_minor(500, JPY),
            Money::from_minor(1_000, JPY),
        )),
    )?;

    let mut options = EngineOptions::default();
    options.reward_toggles.set("bonus", true);

    let first_time = compute_optimal_purchase(&cart, &shipping, &rewards, &options)?;

    assert_eq!(first_time.plan().total_cost(), Money::from_minor(4_500, JPY));

    options.previously_rewarded.insert("prod-a".to_string());

    let repeat = compute_optimal_purchase(&cart, &shipping, &rewards, &options)?;

    assert_eq!(repeat.plan().total_cost(), Money::from_minor(5_000, JPY));
    assert_eq!(repeat.plan().total_rewards_earned(), Money::from_minor(0, JPY));

    Ok(())
}

#[test]
fn a_sole_unresolvable_item_has_no_feasible_plan() -> TestResult {
    let cart = Cart::with_items(
        [Item::new("a", "Card A").with_rarity("UR")],
        [Offer::new("a", "shop-a", Money::from_minor(1_000, JPY)).with_rarity("SR")],
        JPY,
    )?;

    let outcome = compute_optimal_purchase(
        &cart,
        &ShippingPolicyTable::new(JPY),
        &RewardsTable::new(JPY),
        &EngineOptions::default(),
    )?;

    assert!(matches!(outcome, PurchaseOutcome::NoFeasiblePlan(_)));
    assert!(!outcome.is_success());
    assert_eq!(outcome.plan().unresolved_items().len(), 1);
    assert_eq!(outcome.plan().total_cost(), Money::from_minor(0, JPY));

    Ok(())
}
