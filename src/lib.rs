//! splitcart
//!
//! splitcart is a multi-seller purchase optimisation engine: given a cart of items, the
//! offers each seller has for them, and every seller's shipping and rewards policy, it picks
//! one offer per item so the total paid (products plus shipping, less rewards) is as low as
//! possible.
//!
//! Greedy orderings and free-shipping threshold seeds produce candidates, a local-search
//! refiner improves each, and small carts are confirmed by a bounded exhaustive search (and
//! optionally a MILP). See [`engine::compute_optimal_purchase`].

pub mod cart;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod fixtures;
pub mod items;
pub mod offers;
pub mod plan;
pub mod prelude;
pub mod pricing;
pub mod products;
pub mod rewards;
pub mod shipping;
pub mod solvers;
