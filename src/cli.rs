//! Command line arguments

use std::path::PathBuf;

use clap::Parser;
use splitcart::{config::EngineOptions, shipping::Region};

use crate::logging::LoggingConfig;

/// Split a cart across sellers at the lowest total cost.
#[derive(Debug, Parser)]
#[command(name = "splitcart", version, about)]
pub struct Args {
    /// Fixture set to load (cart, sellers and optional options with this name)
    #[arg(short, long, default_value = "demo")]
    pub fixture: String,

    /// Directory holding the `carts`, `sellers` and `options` fixture folders
    #[arg(long, env = "SPLITCART_FIXTURES", default_value = "./fixtures")]
    pub fixtures_path: PathBuf,

    /// Delivery region
    #[arg(short, long, value_enum)]
    pub region: Option<Region>,

    /// Most refinement passes per candidate
    #[arg(long)]
    pub iteration_budget: Option<usize>,

    /// Most distinct sellers considered per item
    #[arg(long)]
    pub max_sellers_per_item: Option<usize>,

    /// Largest cart searched exhaustively (0 disables exhaustive search)
    #[arg(long)]
    pub exhaustive_max_items: Option<usize>,

    /// Largest cart handed to the MILP solver (0 disables it)
    #[arg(long)]
    pub milp_max_items: Option<usize>,

    /// Enable a named reward rule; repeatable
    #[arg(long = "reward", value_name = "NAME")]
    pub rewards: Vec<String>,

    /// Sellers whose pickup option is used; repeatable
    #[arg(long = "pickup", value_name = "SELLER")]
    pub pickup: Vec<String>,

    /// Logging settings
    #[command(flatten)]
    pub logging: LoggingConfig,
}

impl Args {
    /// Apply command line overrides on top of the fixture's options.
    pub fn apply(&self, options: &mut EngineOptions) {
        if let Some(region) = self.region {
            options.region = region;
        }

        if let Some(budget) = self.iteration_budget {
            options.iteration_budget = budget;
        }

        if let Some(max) = self.max_sellers_per_item {
            options.max_sellers_per_item = max;
        }

        if let Some(max) = self.exhaustive_max_items {
            options.exhaustive.max_items = max;
        }

        if let Some(max) = self.milp_max_items {
            options.milp.max_items = max;
        }

        for name in &self.rewards {
            options.reward_toggles.set(name.as_str(), true);
        }

        options
            .pickup_enabled_sellers
            .extend(self.pickup.iter().map(|seller| seller.as_str().into()));
    }
}

#[cfg(test)]
mod tests {
    use splitcart::offers::SellerId;

    use super::*;

    #[test]
    fn overrides_only_what_was_given() {
        let args = Args::parse_from([
            "splitcart",
            "--region",
            "remote-a",
            "--milp-max-items",
            "20",
            "--reward",
            "points",
            "--pickup",
            "card-castle",
        ]);

        let mut options = EngineOptions::default();
        args.apply(&mut options);

        assert_eq!(options.region, Region::RemoteA);
        assert_eq!(options.milp.max_items, 20);
        assert_eq!(options.iteration_budget, 100);
        assert!(options.reward_toggles.is_enabled("points"));
        assert!(
            options
                .pickup_enabled_sellers
                .contains(&SellerId::new("card-castle"))
        );
    }
}
