//! Cart Fixtures

use std::collections::BTreeMap;

use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use rusty_money::{
    Money,
    iso::{Currency, EUR, GBP, JPY, USD},
};
use serde::Deserialize;

use crate::{fixtures::FixtureError, items::Item, offers::Offer};

/// Wrapper for a cart in YAML
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CartFixture {
    /// Items in cart order
    pub items: Vec<Item>,

    /// Offers for those items
    #[serde(default)]
    pub offers: Vec<OfferFixture>,
}

/// Offer Fixture
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OfferFixture {
    /// Offer id, defaulting to `seller/item`
    pub id: Option<String>,

    /// Key of the item on offer
    pub item: String,

    /// Seller id
    pub seller: String,

    /// Unit price (e.g., "1200 JPY")
    pub price: String,

    /// Rarity
    #[serde(default)]
    pub rarity: String,

    /// Language
    #[serde(default)]
    pub language: String,

    /// Illustration variant
    #[serde(default)]
    pub variant: String,

    /// Product identity used for one-time bonuses
    pub product: Option<String>,

    /// Whether the offer can be bought
    #[serde(default = "default_available")]
    pub available: bool,

    /// Source metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_available() -> bool {
    true
}

impl OfferFixture {
    /// Build the offer, returning it with the currency of its price.
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] if the price is malformed.
    pub fn try_into_offer(self) -> Result<(Offer<'static>, &'static Currency), FixtureError> {
        let (minor_units, currency) = parse_price(&self.price)?;

        let mut offer = Offer::new(self.item, self.seller, Money::from_minor(minor_units, currency))
            .with_rarity(self.rarity)
            .with_language(self.language)
            .with_variant(self.variant)
            .with_available(self.available);

        if let Some(id) = self.id {
            offer = offer.with_id(id);
        }

        if let Some(product) = self.product {
            offer = offer.with_product(product);
        }

        for (key, value) in self.metadata {
            offer = offer.with_metadata(key, value);
        }

        Ok((offer, currency))
    }
}

/// Parse price string (e.g., "1200 JPY" or "2.99 GBP") into minor units and currency.
///
/// The amount is scaled by the currency's exponent, so yen have no minor digits and
/// pounds have two. Amounts finer than the currency's minor unit are rejected.
///
/// # Errors
///
/// Returns an error if the string is not in the format "AMOUNT CURRENCY", if the amount
/// is not a decimal number, or if the currency code is not recognized.
pub fn parse_price(s: &str) -> Result<(i64, &'static Currency), FixtureError> {
    let parts: Vec<&str> = s.split_whitespace().collect();

    let [amount, currency_code] = parts.as_slice() else {
        return Err(FixtureError::InvalidPrice(format!(
            "Expected format 'AMOUNT CURRENCY', got: {s}"
        )));
    };

    let amount = amount
        .parse::<Decimal>()
        .map_err(|_err| FixtureError::InvalidPrice(s.to_string()))?;

    let currency = match *currency_code {
        "JPY" => JPY,
        "GBP" => GBP,
        "USD" => USD,
        "EUR" => EUR,
        other => return Err(FixtureError::UnknownCurrency(other.to_string())),
    };

    let scale = 10_i64
        .checked_pow(currency.exponent)
        .map(Decimal::from)
        .ok_or_else(|| FixtureError::InvalidPrice(s.to_string()))?;

    let minor = amount
        .checked_mul(scale)
        .filter(|value| value.fract().is_zero())
        .and_then(|value| value.to_i64())
        .ok_or_else(|| FixtureError::InvalidPrice(s.to_string()))?;

    Ok((minor, currency))
}
