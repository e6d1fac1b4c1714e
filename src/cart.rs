//! Cart

use rustc_hash::{FxHashMap, FxHashSet};
use rusty_money::iso::Currency;
use thiserror::Error;

use crate::{
    items::Item,
    offers::{Offer, OfferId},
    pricing::line_total,
};

/// Errors related to cart construction. Every variant means the input is rejected
/// before any optimisation starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    /// The cart contains no items.
    #[error("cart has no items")]
    Empty,

    /// Two items share the same key.
    #[error("duplicate item key: {0}")]
    DuplicateItem(String),

    /// An item asks for zero copies.
    #[error("item {0} has a quantity of zero")]
    ZeroQuantity(String),

    /// Two offers share the same id.
    #[error("duplicate offer id: {0}")]
    DuplicateOffer(OfferId),

    /// An offer references an item that isn't in the cart.
    #[error("offer {offer} references unknown item {item}")]
    UnknownItem {
        /// Offer id
        offer: OfferId,

        /// Item key referenced by the offer
        item: String,
    },

    /// An offer has a negative unit price.
    #[error("offer {0} has a negative unit price")]
    NegativePrice(OfferId),

    /// An offer's currency differs from the cart currency (offer, offer currency, cart currency).
    #[error("Offer {0} has currency {1}, but cart has currency {2}")]
    CurrencyMismatch(OfferId, &'static str, &'static str),

    /// Buying the requested quantity at the offer price overflows.
    #[error("offer {offer} overflows when bought {quantity} times")]
    LineOverflow {
        /// Offer id
        offer: OfferId,

        /// Requested quantity
        quantity: u32,
    },
}

/// Cart
///
/// The items a buyer wants plus every candidate offer the offer source returned for them.
#[derive(Debug, Clone)]
pub struct Cart<'a> {
    items: Vec<Item>,
    offers: Vec<Offer<'a>>,
    currency: &'static Currency,
}

impl<'a> Cart<'a> {
    /// Create a cart with the given items and offers.
    ///
    /// # Errors
    ///
    /// Returns a [`CartError`] if the cart is empty, keys are duplicated, a quantity is zero,
    /// an offer is malformed or an offer is priced in a different currency.
    pub fn with_items(
        items: impl Into<Vec<Item>>,
        offers: impl Into<Vec<Offer<'a>>>,
        currency: &'static Currency,
    ) -> Result<Self, CartError> {
        let items = items.into();
        let offers = offers.into();

        if items.is_empty() {
            return Err(CartError::Empty);
        }

        let mut quantities: FxHashMap<&str, u32> = FxHashMap::default();

        for item in &items {
            if item.quantity() == 0 {
                return Err(CartError::ZeroQuantity(item.key().to_string()));
            }

            if quantities.insert(item.key(), item.quantity()).is_some() {
                return Err(CartError::DuplicateItem(item.key().to_string()));
            }
        }

        let mut offer_ids: FxHashSet<&OfferId> = FxHashSet::default();

        for offer in &offers {
            if !offer_ids.insert(offer.id()) {
                return Err(CartError::DuplicateOffer(offer.id().clone()));
            }

            let Some(quantity) = quantities.get(offer.item_key()).copied() else {
                return Err(CartError::UnknownItem {
                    offer: offer.id().clone(),
                    item: offer.item_key().to_string(),
                });
            };

            let offer_currency = offer.unit_price().currency();

            if offer_currency != currency {
                return Err(CartError::CurrencyMismatch(
                    offer.id().clone(),
                    offer_currency.iso_alpha_code,
                    currency.iso_alpha_code,
                ));
            }

            let unit_minor = offer.unit_price().to_minor_units();

            if unit_minor < 0 {
                return Err(CartError::NegativePrice(offer.id().clone()));
            }

            line_total(unit_minor, quantity).map_err(|_err| CartError::LineOverflow {
                offer: offer.id().clone(),
                quantity,
            })?;
        }

        Ok(Cart {
            items,
            offers,
            currency,
        })
    }

    /// Iterate over the items in the cart.
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    /// Get an item by its index.
    pub fn item(&self, idx: usize) -> Option<&Item> {
        self.items.get(idx)
    }

    /// All offers, in input order.
    pub fn offers(&self) -> &[Offer<'a>] {
        &self.offers
    }

    /// Get an offer by its index.
    pub fn offer(&self, idx: usize) -> Option<&Offer<'a>> {
        self.offers.get(idx)
    }

    /// Get the number of items in the cart.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the cart is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the currency of the cart.
    pub fn currency(&self) -> &'static Currency {
        self.currency
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::{Money, iso};
    use testresult::TestResult;

    use super::*;

    fn test_items() -> [Item; 2] {
        [
            Item::new("blue-eyes", "Blue-Eyes White Dragon"),
            Item::new("dark-magician", "Dark Magician").with_quantity(2),
        ]
    }

    fn test_offers<'a>() -> [Offer<'a>; 3] {
        [
            Offer::new("blue-eyes", "shop-a", Money::from_minor(1_000, iso::JPY)),
            Offer::new("blue-eyes", "shop-b", Money::from_minor(1_200, iso::JPY)),
            Offer::new("dark-magician", "shop-a", Money::from_minor(800, iso::JPY)),
        ]
    }

    #[test]
    fn with_items_accepts_valid_cart() -> TestResult {
        let cart = Cart::with_items(test_items(), test_offers(), iso::JPY)?;

        assert_eq!(cart.len(), 2);
        assert_eq!(cart.offers().len(), 3);
        assert_eq!(cart.currency(), iso::JPY);

        Ok(())
    }

    #[test]
    fn with_items_rejects_empty_cart() {
        let result = Cart::with_items(Vec::new(), test_offers(), iso::JPY);

        assert_eq!(result.err(), Some(CartError::Empty));
    }

    #[test]
    fn with_items_rejects_duplicate_item_keys() {
        let items = [
            Item::new("blue-eyes", "Blue-Eyes White Dragon"),
            Item::new("blue-eyes", "Blue-Eyes again"),
        ];

        let result = Cart::with_items(items, Vec::new(), iso::JPY);

        assert_eq!(
            result.err(),
            Some(CartError::DuplicateItem("blue-eyes".to_string()))
        );
    }

    #[test]
    fn with_items_rejects_zero_quantity() {
        let items = [Item::new("blue-eyes", "").with_quantity(0)];

        let result = Cart::with_items(items, Vec::new(), iso::JPY);

        assert_eq!(
            result.err(),
            Some(CartError::ZeroQuantity("blue-eyes".to_string()))
        );
    }

    #[test]
    fn with_items_rejects_offer_for_unknown_item() {
        let offers = [Offer::new("exodia", "shop-a", Money::from_minor(100, iso::JPY))];

        let result = Cart::with_items(test_items(), offers, iso::JPY);

        assert!(matches!(result, Err(CartError::UnknownItem { .. })));
    }

    #[test]
    fn with_items_rejects_currency_mismatch() {
        let offers = [Offer::new("blue-eyes", "shop-a", Money::from_minor(100, iso::USD))];

        let result = Cart::with_items(test_items(), offers, iso::JPY);

        match result {
            Err(CartError::CurrencyMismatch(offer, offer_currency, cart_currency)) => {
                assert_eq!(offer.as_str(), "shop-a/blue-eyes");
                assert_eq!(offer_currency, iso::USD.iso_alpha_code);
                assert_eq!(cart_currency, iso::JPY.iso_alpha_code);
            }
            other => panic!("expected CurrencyMismatch error, got {other:?}"),
        }
    }

    #[test]
    fn with_items_rejects_negative_price() {
        let offers = [Offer::new("blue-eyes", "shop-a", Money::from_minor(-1, iso::JPY))];

        let result = Cart::with_items(test_items(), offers, iso::JPY);

        assert!(matches!(result, Err(CartError::NegativePrice(_))));
    }

    #[test]
    fn with_items_rejects_duplicate_offer_ids() {
        let offers = [
            Offer::new("blue-eyes", "shop-a", Money::from_minor(100, iso::JPY)),
            Offer::new("blue-eyes", "shop-a", Money::from_minor(90, iso::JPY)),
        ];

        let result = Cart::with_items(test_items(), offers, iso::JPY);

        assert!(matches!(result, Err(CartError::DuplicateOffer(_))));
    }

    #[test]
    fn accessors_return_items_and_offers() -> TestResult {
        let cart = Cart::with_items(test_items(), test_offers(), iso::JPY)?;

        assert_eq!(cart.item(1).map(Item::key), Some("dark-magician"));
        assert!(cart.item(2).is_none());
        assert_eq!(
            cart.offer(2).map(|offer| offer.seller().as_str()),
            Some("shop-a")
        );
        assert!(!cart.is_empty());
        assert_eq!(cart.iter().count(), 2);

        Ok(())
    }
}
