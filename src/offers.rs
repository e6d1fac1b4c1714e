//! Offers

use std::{collections::BTreeMap, fmt};

use rusty_money::{Money, iso::Currency};
use serde::Deserialize;

/// Identity of an independent seller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct SellerId(String);

impl SellerId {
    /// Create a seller id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SellerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SellerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SellerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of a single offer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct OfferId(String);

impl OfferId {
    /// Create an offer id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OfferId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A (seller, price, variant) option for purchasing one item.
///
/// Offers arrive pre-normalised: rarity, language and variant have already been
/// extracted from the storefront listing by an upstream collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer<'a> {
    id: OfferId,
    item_key: String,
    seller: SellerId,
    unit_price: Money<'a, Currency>,
    rarity: String,
    language: String,
    variant: String,
    available: bool,
    product: Option<String>,
    source: BTreeMap<String, String>,
}

impl<'a> Offer<'a> {
    /// Create an available offer with no rarity, language or variant information.
    ///
    /// The offer id defaults to `seller/item_key`.
    pub fn new(
        item_key: impl Into<String>,
        seller: impl Into<SellerId>,
        unit_price: Money<'a, Currency>,
    ) -> Self {
        let item_key = item_key.into();
        let seller = seller.into();

        Self {
            id: OfferId::new(format!("{seller}/{item_key}")),
            item_key,
            seller,
            unit_price,
            rarity: String::new(),
            language: String::new(),
            variant: String::new(),
            available: true,
            product: None,
            source: BTreeMap::new(),
        }
    }

    /// Override the offer id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = OfferId::new(id);
        self
    }

    /// Set the rarity of the listed copy.
    #[must_use]
    pub fn with_rarity(mut self, rarity: impl Into<String>) -> Self {
        self.rarity = rarity.into();
        self
    }

    /// Set the language of the listed copy.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the illustration variant of the listed copy.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    /// Set an explicit product identity for the one-time bonus.
    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Set availability.
    #[must_use]
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Attach a piece of source metadata (listing URL, scrape time, ...).
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.source.insert(key.into(), value.into());
        self
    }

    /// Offer id
    pub fn id(&self) -> &OfferId {
        &self.id
    }

    /// Key of the item this offer is for
    pub fn item_key(&self) -> &str {
        &self.item_key
    }

    /// Seller of the offer
    pub fn seller(&self) -> &SellerId {
        &self.seller
    }

    /// Price of one copy
    pub fn unit_price(&self) -> &Money<'a, Currency> {
        &self.unit_price
    }

    /// Rarity of the listed copy
    pub fn rarity(&self) -> &str {
        &self.rarity
    }

    /// Language of the listed copy
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Illustration variant of the listed copy
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Whether the offer can currently be bought
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Source metadata carried through from the offer source
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.source
    }

    /// Identity used for the once-per-product bonus.
    ///
    /// An explicit product wins; otherwise the item key, qualified by the variant when
    /// one is set.
    pub fn product_identity(&self) -> String {
        match (&self.product, self.variant.is_empty()) {
            (Some(product), _) => product.clone(),
            (None, true) => self.item_key.clone(),
            (None, false) => format!("{}#{}", self.item_key, self.variant),
        }
    }
}
