//! Fixtures
//!
//! YAML fixture sets under `fixtures/`: a cart (`carts/<name>.yml`), the sellers' shipping
//! and rewards policies (`sellers/<name>.yml`) and optional engine options
//! (`options/<name>.yml`).

use std::{fs, path::PathBuf};

use rusty_money::iso::Currency;
use thiserror::Error;

use crate::{
    cart::{Cart, CartError},
    config::{ConfigError, EngineOptions},
    engine::{EngineError, PurchaseOutcome, compute_optimal_purchase},
    fixtures::{carts::CartFixture, sellers::SellersFixture},
    offers::Offer,
    rewards::{RewardsError, RewardsTable},
    shipping::{ShippingError, ShippingPolicyTable},
};

pub mod carts;
pub mod sellers;

/// Fixture Parsing Errors
#[derive(Debug, Error)]
pub enum FixtureError {
    /// IO error reading fixture files
    #[error("Failed to read fixture file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// Invalid price format
    #[error("Invalid price format: {0}")]
    InvalidPrice(String),

    /// Invalid percentage format
    #[error("Invalid percentage format: {0}")]
    InvalidPercentage(String),

    /// Unknown currency code
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    /// Currency mismatch between prices
    #[error("Currency mismatch: expected {0}, found {1}")]
    CurrencyMismatch(String, String),

    /// No priced offer to take the currency from
    #[error("Currency unknown: no cart loaded, or the cart has no offers")]
    NoCurrency,

    /// No cart loaded
    #[error("No cart loaded")]
    NoCart,

    /// Cart validation error
    #[error(transparent)]
    Cart(#[from] CartError),

    /// Shipping table error
    #[error(transparent)]
    Shipping(#[from] ShippingError),

    /// Rewards table error
    #[error(transparent)]
    Rewards(#[from] RewardsError),

    /// Options error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Fixture
#[derive(Debug)]
pub struct Fixture {
    /// Base path for fixture files
    base_path: PathBuf,

    cart: Option<Cart<'static>>,
    shipping: Option<ShippingPolicyTable<'static>>,
    rewards: Option<RewardsTable<'static>>,
    options: EngineOptions,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    /// Create a new empty fixture with default base path
    pub fn new() -> Self {
        Self::with_base_path("./fixtures")
    }

    /// Create a new empty fixture with custom base path
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cart: None,
            shipping: None,
            rewards: None,
            options: EngineOptions::default(),
        }
    }

    /// Load a cart from a YAML fixture file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, a price is malformed, prices
    /// use more than one currency, or the cart is invalid.
    pub fn load_cart(&mut self, name: &str) -> Result<&mut Self, FixtureError> {
        let file_path = self.base_path.join("carts").join(format!("{name}.yml"));
        let contents = fs::read_to_string(&file_path)?;
        let fixture: CartFixture = serde_norway::from_str(&contents)?;

        let mut currency: Option<&'static Currency> = None;
        let mut offers: Vec<Offer<'static>> = Vec::with_capacity(fixture.offers.len());

        for offer_fixture in fixture.offers {
            let (offer, offer_currency) = offer_fixture.try_into_offer()?;

            match currency {
                Some(existing) if existing != offer_currency => {
                    return Err(FixtureError::CurrencyMismatch(
                        existing.iso_alpha_code.to_string(),
                        offer_currency.iso_alpha_code.to_string(),
                    ));
                }
                Some(_) => {}
                None => currency = Some(offer_currency),
            }

            offers.push(offer);
        }

        let currency = currency.ok_or(FixtureError::NoCurrency)?;

        self.cart = Some(Cart::with_items(fixture.items, offers, currency)?);

        Ok(self)
    }

    /// Load shipping and rewards policies from a YAML fixture file
    ///
    /// # Errors
    ///
    /// Returns an error if no cart is loaded, the file cannot be read or parsed, or a price
    /// is malformed or in another currency.
    pub fn load_sellers(&mut self, name: &str) -> Result<&mut Self, FixtureError> {
        let currency = self
            .cart
            .as_ref()
            .map(Cart::currency)
            .ok_or(FixtureError::NoCurrency)?;

        let file_path = self.base_path.join("sellers").join(format!("{name}.yml"));
        let contents = fs::read_to_string(&file_path)?;
        let fixture: SellersFixture = serde_norway::from_str(&contents)?;

        let mut shipping = ShippingPolicyTable::new(currency);
        let mut rewards = RewardsTable::new(currency);

        if let Some(default_policy) = fixture.default_policy {
            shipping = shipping.with_fallback(default_policy.try_into_policy(currency)?)?;
        }

        for (seller, seller_fixture) in fixture.sellers {
            if let Some(policy) = seller_fixture.shipping {
                shipping.insert(seller.as_str(), policy.try_into_policy(currency)?)?;
            }

            if let Some(seller_rewards) = seller_fixture.rewards {
                rewards.insert(seller.as_str(), seller_rewards.try_into_rewards(currency)?)?;
            }
        }

        self.shipping = Some(shipping);
        self.rewards = Some(rewards);

        Ok(self)
    }

    /// Load engine options from a YAML fixture file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the options are invalid.
    pub fn load_options(&mut self, name: &str) -> Result<&mut Self, FixtureError> {
        let file_path = self.base_path.join("options").join(format!("{name}.yml"));

        self.options = EngineOptions::load(file_path)?;

        Ok(self)
    }

    /// Load a complete fixture set (cart, sellers and, when present, options with the same
    /// name) from the default base path
    ///
    /// # Errors
    ///
    /// Returns an error if any of the fixture files cannot be loaded.
    pub fn from_set(name: &str) -> Result<Self, FixtureError> {
        Self::from_set_in("./fixtures", name)
    }

    /// Load a complete fixture set from `base_path`
    ///
    /// # Errors
    ///
    /// Returns an error if any of the fixture files cannot be loaded.
    pub fn from_set_in(base_path: impl Into<PathBuf>, name: &str) -> Result<Self, FixtureError> {
        let mut fixture = Self::with_base_path(base_path);

        fixture.load_cart(name)?.load_sellers(name)?;

        if fixture
            .base_path
            .join("options")
            .join(format!("{name}.yml"))
            .is_file()
        {
            fixture.load_options(name)?;
        }

        Ok(fixture)
    }

    /// The loaded cart
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NoCart`] if no cart is loaded.
    pub fn cart(&self) -> Result<&Cart<'static>, FixtureError> {
        self.cart.as_ref().ok_or(FixtureError::NoCart)
    }

    /// The loaded shipping table, or an empty one in the cart's currency
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NoCart`] if no cart is loaded.
    pub fn shipping(&self) -> Result<ShippingPolicyTable<'static>, FixtureError> {
        match &self.shipping {
            Some(shipping) => Ok(shipping.clone()),
            None => Ok(ShippingPolicyTable::new(self.cart()?.currency())),
        }
    }

    /// The loaded rewards table, or an empty one in the cart's currency
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::NoCart`] if no cart is loaded.
    pub fn rewards(&self) -> Result<RewardsTable<'static>, FixtureError> {
        match &self.rewards {
            Some(rewards) => Ok(rewards.clone()),
            None => Ok(RewardsTable::new(self.cart()?.currency())),
        }
    }

    /// Engine options
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Mutable engine options, for overrides
    pub fn options_mut(&mut self) -> &mut EngineOptions {
        &mut self.options
    }

    /// Run the engine on the loaded fixture set.
    ///
    /// # Errors
    ///
    /// Returns an error if no cart is loaded or the engine fails.
    pub fn run(&self) -> Result<PurchaseOutcome, FixtureError> {
        let outcome = compute_optimal_purchase(
            self.cart()?,
            &self.shipping()?,
            &self.rewards()?,
            &self.options,
        )?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rusty_money::{Money, iso::JPY};
    use tempfile::TempDir;
    use testresult::TestResult;

    use crate::{offers::SellerId, shipping::Region};

    use super::*;

    fn write_set(dir: &TempDir, name: &str, cart: &str, sellers: &str) -> TestResult {
        fs::create_dir_all(dir.path().join("carts"))?;
        fs::create_dir_all(dir.path().join("sellers"))?;
        fs::write(dir.path().join("carts").join(format!("{name}.yml")), cart)?;
        fs::write(dir.path().join("sellers").join(format!("{name}.yml")), sellers)?;

        Ok(())
    }

    const CART: &str = r"
items:
  - key: blue-eyes
    name: Blue-Eyes White Dragon
  - key: dark-magician
    name: Dark Magician
    rarity: ultra
offers:
  - item: blue-eyes
    seller: shop-a
    price: 20000 JPY
  - item: dark-magician
    seller: shop-a
    price: 15000 JPY
    rarity: Ultra
";

    const SELLERS: &str = r"
sellers:
  shop-a:
    shipping:
      flat_fee: 3000 JPY
      free_shipping_threshold: 30000 JPY
    rewards:
      rules:
        - name: points
          rate: 1%
";

    #[test]
    fn loads_and_runs_a_set() -> TestResult {
        let dir = TempDir::new()?;
        write_set(&dir, "basic", CART, SELLERS)?;

        let fixture = Fixture::from_set_in(dir.path(), "basic")?;

        assert_eq!(fixture.cart()?.len(), 2);
        assert_eq!(fixture.shipping()?.len(), 1);

        let outcome = fixture.run()?;

        assert!(matches!(outcome, PurchaseOutcome::Solved(_)));
        assert_eq!(outcome.plan().total_cost(), Money::from_minor(35_000, JPY));
        assert_eq!(
            outcome.plan().seller_of("blue-eyes"),
            Some(&SellerId::new("shop-a"))
        );

        Ok(())
    }

    #[test]
    fn options_file_is_optional() -> TestResult {
        let dir = TempDir::new()?;
        write_set(&dir, "basic", CART, SELLERS)?;

        fs::create_dir_all(dir.path().join("options"))?;
        fs::write(
            dir.path().join("options").join("basic.yml"),
            "region: remote-b\nreward_toggles:\n  points: true\n",
        )?;

        let fixture = Fixture::from_set_in(dir.path(), "basic")?;

        assert_eq!(fixture.options().region, Region::RemoteB);

        // 1% of 35000
        assert_eq!(
            fixture.run()?.plan().total_rewards_earned(),
            Money::from_minor(350, JPY)
        );

        Ok(())
    }

    #[test]
    fn sellers_require_a_cart() -> TestResult {
        let dir = TempDir::new()?;
        write_set(&dir, "basic", CART, SELLERS)?;

        let mut fixture = Fixture::with_base_path(dir.path());

        assert!(matches!(
            fixture.load_sellers("basic"),
            Err(FixtureError::NoCurrency)
        ));

        Ok(())
    }

    #[test]
    fn mixed_currencies_are_rejected() -> TestResult {
        let dir = TempDir::new()?;
        let cart = r"
items:
  - key: a
    name: A
offers:
  - item: a
    seller: shop-a
    price: 1000 JPY
  - item: a
    seller: shop-b
    price: 10.00 GBP
";
        write_set(&dir, "mixed", cart, "sellers: {}\n")?;

        let mut fixture = Fixture::with_base_path(dir.path());

        assert!(matches!(
            fixture.load_cart("mixed"),
            Err(FixtureError::CurrencyMismatch(_, _))
        ));

        Ok(())
    }

    #[test]
    fn missing_files_are_io_errors() {
        let result = Fixture::from_set_in("/nonexistent", "nothing");

        assert!(matches!(result, Err(FixtureError::Io(_))));
    }
}
