//! Integration tests for the bundled fixture sets.
//!
//! Each set is a small, hand-checkable cart:
//!
//! - `single-item`: 1000 + 3000 shipping at card-castle against 1200 shipped free at
//!   duel-depot. The free-shipping seller wins at 1200.
//! - `free-shipping`: 20000 + 15000 at one seller crosses its 30000 threshold, so the total is
//!   35000 with no shipping.
//! - `consolidation`: splitting 5000 + 5000 across two sellers costs two 3000 fees; buying
//!   both at card-castle costs one, for 13000.
//! - `rarity-mismatch`: Blue-Eyes asks for UR but only SR and R are on offer, so it is
//!   reported unresolved while Dark Magician is still bought.

use std::path::PathBuf;

use rusty_money::{Money, iso::JPY};
use testresult::TestResult;

use splitcart::{
    catalog::UnresolvedReason,
    engine::PurchaseOutcome,
    fixtures::Fixture,
    offers::SellerId,
    shipping::PolicySource,
};

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn run_set(name: &str) -> Result<PurchaseOutcome, Box<dyn std::error::Error>> {
    Ok(Fixture::from_set_in(fixtures_path(), name)?.run()?)
}

#[test]
fn single_item_prefers_the_free_shipping_seller() -> TestResult {
    let outcome = run_set("single-item")?;
    let plan = outcome.plan();

    assert!(matches!(outcome, PurchaseOutcome::Solved(_)));
    assert_eq!(plan.total_cost(), Money::from_minor(1_200, JPY));
    assert_eq!(plan.total_shipping_cost(), Money::from_minor(0, JPY));
    assert_eq!(plan.seller_of("blue-eyes"), Some(&SellerId::new("duel-depot")));
    assert_eq!(plan.sellers().len(), 1);

    Ok(())
}

#[test]
fn crossing_the_threshold_ships_free() -> TestResult {
    let outcome = run_set("free-shipping")?;
    let plan = outcome.plan();

    let seller = plan
        .seller(&SellerId::new("card-castle"))
        .ok_or("card-castle should be in the plan")?;

    assert_eq!(seller.subtotal, Money::from_minor(35_000, JPY));
    assert_eq!(seller.shipping_fee, Money::from_minor(0, JPY));
    assert_eq!(seller.policy_source, PolicySource::Table);
    assert_eq!(plan.total_cost(), Money::from_minor(35_000, JPY));

    Ok(())
}

#[test]
fn equal_prices_consolidate_at_one_seller() -> TestResult {
    let outcome = run_set("consolidation")?;
    let plan = outcome.plan();

    assert_eq!(plan.total_cost(), Money::from_minor(13_000, JPY));
    assert_eq!(plan.total_shipping_cost(), Money::from_minor(3_000, JPY));
    assert_eq!(plan.sellers().len(), 1);
    assert_eq!(plan.seller_of("blue-eyes"), Some(&SellerId::new("card-castle")));
    assert_eq!(plan.seller_of("dark-magician"), Some(&SellerId::new("card-castle")));

    Ok(())
}

#[test]
fn rarity_mismatch_is_reported_with_what_was_available() -> TestResult {
    let outcome = run_set("rarity-mismatch")?;
    let plan = outcome.plan();

    assert!(matches!(outcome, PurchaseOutcome::Partial(_)));
    assert!(outcome.is_success());

    let [unresolved] = plan.unresolved_items() else {
        return Err("expected exactly one unresolved item".into());
    };

    assert_eq!(unresolved.key, "blue-eyes");

    let UnresolvedReason::NoMatchingOffers {
        desired_rarity,
        available_rarities,
        ..
    } = &unresolved.reason
    else {
        return Err("expected a rarity mismatch".into());
    };

    assert_eq!(desired_rarity.as_deref(), Some("UR"));
    assert_eq!(
        available_rarities.iter().map(String::as_str).collect::<Vec<_>>(),
        ["R", "SR"]
    );

    // card-castle has no policy of its own, so the set's default applies
    assert_eq!(plan.total_cost(), Money::from_minor(2_500, JPY));
    assert!(
        plan.diagnostics()
            .fallback_policy_sellers
            .contains(&SellerId::new("card-castle"))
    );

    Ok(())
}

#[test]
fn demo_set_solves_every_item() -> TestResult {
    let outcome = run_set("demo")?;
    let plan = outcome.plan();

    assert!(matches!(outcome, PurchaseOutcome::Solved(_)));
    assert!(plan.unresolved_items().is_empty());
    assert_eq!(plan.line_count(), 5);

    let dropped = &plan.diagnostics().dropped_offers;

    assert_eq!(dropped.get("pot-of-greed").map(|d| d.unavailable), Some(1));
    assert_eq!(dropped.get("blue-eyes").map(|d| d.mismatched), Some(1));
    assert_eq!(dropped.get("dark-magician").map(|d| d.mismatched), Some(1));

    let mut rendered = Vec::new();
    plan.write_to(&mut rendered)?;
    let rendered = String::from_utf8(rendered)?;

    assert!(rendered.contains("Blue-Eyes White Dragon"));

    Ok(())
}
