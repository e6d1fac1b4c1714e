//! Engine Options
//!
//! Per-run settings. Every field has a default, so an empty YAML document is a valid
//! configuration.

use std::{collections::BTreeSet, fs, path::Path};

use decimal_percentage::Percentage;
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, de};
use thiserror::Error;

use crate::{
    catalog::{CatalogOptions, DEFAULT_MAX_SELLERS_PER_ITEM},
    offers::{OfferId, SellerId},
    pricing::{parse_percentage, percentage_value},
    rewards::RewardToggles,
    shipping::Region,
    solvers::{
        exhaustive::{DEFAULT_MAX_ITEMS, DEFAULT_MAX_SEARCH_SPACE, ExhaustiveLimits, ExhaustiveSolver},
        milp::{self, MilpSolver},
        refiner::{DEFAULT_ITERATION_BUDGET, RefinerConfig},
        threshold::{
            DEFAULT_COMBINATION_LIMIT, DEFAULT_NODE_LIMIT, DEFAULT_PREMIUM_WEIGHT, ThresholdConfig,
        },
    },
};

/// Configuration Errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading a configuration file
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// An option is out of range.
    #[error("Invalid option {name}: {reason}")]
    Invalid {
        /// Option name
        name: &'static str,

        /// What is wrong with it
        reason: &'static str,
    },
}

/// Exhaustive search settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExhaustiveOptions {
    /// Largest cart searched exhaustively
    pub max_items: usize,

    /// Largest product of candidate counts searched exhaustively
    pub max_search_space: u64,
}

impl Default for ExhaustiveOptions {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_search_space: DEFAULT_MAX_SEARCH_SPACE,
        }
    }
}

/// MILP settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MilpOptions {
    /// Largest cart handed to the MILP solver. Zero disables it.
    pub max_items: usize,
}

impl Default for MilpOptions {
    fn default() -> Self {
        Self {
            max_items: milp::DEFAULT_MAX_ITEMS,
        }
    }
}

/// Options for one engine run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Delivery region
    pub region: Region,

    /// Sellers whose pickup option the buyer uses
    pub pickup_enabled_sellers: BTreeSet<SellerId>,

    /// Which named reward rules are active
    pub reward_toggles: RewardToggles,

    /// Most distinct sellers considered per item
    pub max_sellers_per_item: usize,

    /// Most refinement passes per candidate
    pub iteration_budget: usize,

    /// Sellers to ignore entirely
    pub excluded_sellers: BTreeSet<SellerId>,

    /// Offers to ignore
    pub excluded_offers: BTreeSet<OfferId>,

    /// Product identities that already received their one-time bonus
    pub previously_rewarded: BTreeSet<String>,

    /// Most threshold combinations kept per seller
    pub combination_limit: usize,

    /// Most search nodes visited per threshold search
    pub node_limit: usize,

    /// Weight of the price premium in threshold combination scores
    pub premium_weight: i64,

    /// Largest cost increase accepted for a consolidation, e.g. `"5%"`
    #[serde(deserialize_with = "deserialize_percentage")]
    pub consolidation_tolerance: Percentage,

    /// Exhaustive search settings
    pub exhaustive: ExhaustiveOptions,

    /// MILP settings
    pub milp: MilpOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let refiner = RefinerConfig::default();

        Self {
            region: Region::Default,
            pickup_enabled_sellers: BTreeSet::new(),
            reward_toggles: RewardToggles::new(),
            max_sellers_per_item: DEFAULT_MAX_SELLERS_PER_ITEM,
            iteration_budget: DEFAULT_ITERATION_BUDGET,
            excluded_sellers: BTreeSet::new(),
            excluded_offers: BTreeSet::new(),
            previously_rewarded: BTreeSet::new(),
            combination_limit: DEFAULT_COMBINATION_LIMIT,
            node_limit: DEFAULT_NODE_LIMIT,
            premium_weight: DEFAULT_PREMIUM_WEIGHT,
            consolidation_tolerance: refiner.consolidation_tolerance,
            exhaustive: ExhaustiveOptions::default(),
            milp: MilpOptions::default(),
        }
    }
}

impl EngineOptions {
    /// Parse options from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the YAML is malformed or an option is out of range.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_norway::from_str(yaml)?;

        options.validate()?;

        Ok(options)
    }

    /// Load options from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file can't be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml(&fs::read_to_string(path)?)
    }

    /// Check every option is in range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name, reason| Err(ConfigError::Invalid { name, reason });

        if self.max_sellers_per_item == 0 {
            return invalid("max_sellers_per_item", "must be at least 1");
        }

        if self.combination_limit == 0 {
            return invalid("combination_limit", "must be at least 1");
        }

        if self.node_limit == 0 {
            return invalid("node_limit", "must be at least 1");
        }

        if self.premium_weight < 0 {
            return invalid("premium_weight", "must not be negative");
        }

        let tolerance = percentage_value(&self.consolidation_tolerance);

        if tolerance < Decimal::ZERO || tolerance > Decimal::ONE {
            return invalid("consolidation_tolerance", "must be between 0% and 100%");
        }

        Ok(())
    }

    /// Catalog settings for this run.
    pub fn catalog_options(&self) -> CatalogOptions {
        CatalogOptions {
            max_sellers_per_item: self.max_sellers_per_item,
            excluded_sellers: self.excluded_sellers.clone(),
            excluded_offers: self.excluded_offers.clone(),
        }
    }

    /// Threshold finder settings for this run.
    pub fn threshold_config(&self) -> ThresholdConfig {
        ThresholdConfig {
            combination_limit: self.combination_limit,
            node_limit: self.node_limit,
            premium_weight: self.premium_weight,
        }
    }

    /// Refiner settings for this run.
    pub fn refiner_config(&self) -> RefinerConfig {
        RefinerConfig {
            iteration_budget: self.iteration_budget,
            consolidation_tolerance: self.consolidation_tolerance,
            threshold: self.threshold_config(),
        }
    }

    /// Exhaustive solver for this run.
    pub fn exhaustive_solver(&self) -> ExhaustiveSolver {
        ExhaustiveSolver::new(ExhaustiveLimits {
            max_items: self.exhaustive.max_items,
            max_search_space: self.exhaustive.max_search_space,
        })
    }

    /// MILP solver for this run.
    pub fn milp_solver(&self) -> MilpSolver {
        MilpSolver::new(self.milp.max_items)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PercentageInput {
    Text(String),
    Number(f64),
}

fn deserialize_percentage<'de, D>(deserializer: D) -> Result<Percentage, D::Error>
where
    D: Deserializer<'de>,
{
    match PercentageInput::deserialize(deserializer)? {
        PercentageInput::Text(text) => parse_percentage(&text).map_err(de::Error::custom),
        PercentageInput::Number(number) => Decimal::from_f64(number)
            .map(Percentage::from)
            .ok_or_else(|| de::Error::custom(format!("invalid percentage: {number}"))),
    }
}
