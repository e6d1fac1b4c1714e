//! Offer Catalog
//!
//! Filters and normalises the cart's offers into per-item candidate lists. Every dropped offer
//! is counted, and an item left with no candidates is reported as unresolved instead of being
//! silently omitted. Candidate lists are ordered cheapest first; ties fall back to seller id and
//! then offer id so the same cart always yields the same catalog.

use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use crate::{
    cart::Cart,
    items::{Item, attribute_matches},
    offers::{Offer, OfferId, SellerId},
    pricing::{PricingError, line_total},
    products::{ProductKey, Products},
    rewards::RewardedProducts,
};

/// Default number of distinct sellers kept per item.
pub const DEFAULT_MAX_SELLERS_PER_ITEM: usize = 40;

/// Filters applied while building the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Keep at most this many distinct sellers per item
    pub max_sellers_per_item: usize,

    /// Offers from these sellers are never considered
    pub excluded_sellers: BTreeSet<SellerId>,

    /// These offers are never considered
    pub excluded_offers: BTreeSet<OfferId>,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            max_sellers_per_item: DEFAULT_MAX_SELLERS_PER_ITEM,
            excluded_sellers: BTreeSet::new(),
            excluded_offers: BTreeSet::new(),
        }
    }
}

/// One eligible way of buying an item: a seller, its offer and the resulting line price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    seller: usize,
    offer: usize,
    unit_price: i64,
    quantity: u32,
    line_total: i64,
    product: ProductKey,
}

impl Candidate {
    /// Index of the seller in [`OfferCatalog::sellers`]
    pub fn seller(&self) -> usize {
        self.seller
    }

    /// Index of the offer in [`Cart::offers`]
    pub fn offer(&self) -> usize {
        self.offer
    }

    /// Unit price in minor units
    pub fn unit_price(&self) -> i64 {
        self.unit_price
    }

    /// Quantity bought
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// `unit_price × quantity` in minor units
    pub fn line_total(&self) -> i64 {
        self.line_total
    }

    /// Product identity used for the one-time bonus
    pub fn product(&self) -> ProductKey {
        self.product
    }
}

/// Number of offers each filter removed for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DroppedOffers {
    /// Offers flagged as unavailable
    pub unavailable: usize,

    /// Offers from an excluded seller or with an excluded offer id
    pub excluded: usize,

    /// Offers not matching the item's desired rarity or language
    pub mismatched: usize,

    /// More expensive offers from a seller that already had a cheaper one
    pub duplicate_seller: usize,

    /// Offers beyond the per-item seller cap
    pub over_cap: usize,
}

impl DroppedOffers {
    /// Total number of dropped offers.
    pub fn total(&self) -> usize {
        self.unavailable + self.excluded + self.mismatched + self.duplicate_seller + self.over_cap
    }
}

/// Why an item has no eligible offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The offer source returned nothing for the item.
    NoOffers,

    /// Every offer was unavailable.
    Unavailable,

    /// Every available offer came from an excluded seller or was excluded by id.
    Excluded,

    /// Offers exist, but none match the desired rarity or language.
    NoMatchingOffers {
        /// Rarity the item asked for
        desired_rarity: Option<String>,

        /// Language the item asked for
        desired_language: Option<String>,

        /// Rarities that were on offer
        available_rarities: BTreeSet<String>,

        /// Languages that were on offer
        available_languages: BTreeSet<String>,
    },
}

/// An item that cannot be bought from any seller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedItem {
    /// Item key
    pub key: String,

    /// Display name
    pub name: String,

    /// Why no offer qualified
    pub reason: UnresolvedReason,
}

/// Eligible candidates for one resolvable item.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    item: usize,
    candidates: SmallVec<[Candidate; 8]>,
    dropped: DroppedOffers,
}

impl CatalogEntry {
    /// Index of the item in the cart
    pub fn item(&self) -> usize {
        self.item
    }

    /// Candidates, cheapest first
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Get a candidate by index.
    pub fn candidate(&self, idx: usize) -> Option<&Candidate> {
        self.candidates.get(idx)
    }

    /// Index of the candidate sold by `seller`, if any.
    pub fn candidate_at(&self, seller: usize) -> Option<usize> {
        self.candidates.iter().position(|c| c.seller == seller)
    }

    /// Cheapest candidate
    pub fn cheapest(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// Difference between the two cheapest line totals (zero with a single candidate).
    pub fn spread(&self) -> i64 {
        match (self.candidates.first(), self.candidates.get(1)) {
            (Some(first), Some(second)) => second.line_total - first.line_total,
            _ => 0,
        }
    }

    /// Offers removed by each filter
    pub fn dropped(&self) -> &DroppedOffers {
        &self.dropped
    }
}

/// Catalog of eligible candidates for every resolvable item in a cart.
#[derive(Debug, Clone)]
pub struct OfferCatalog {
    sellers: Vec<SellerId>,
    entries: Vec<CatalogEntry>,
    unresolved: Vec<UnresolvedItem>,
    dropped: BTreeMap<String, DroppedOffers>,
    products: Products,
}

impl OfferCatalog {
    /// Build the catalog for a cart.
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if a line total overflows. [`Cart`] construction already
    /// rejects such offers, so this only fires for carts built some other way.
    pub fn build(cart: &Cart<'_>, options: &CatalogOptions) -> Result<Self, PricingError> {
        let mut by_item: Vec<Vec<usize>> = vec![Vec::new(); cart.len()];
        let item_index: BTreeMap<&str, usize> = cart
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.key(), idx))
            .collect();

        for (offer_idx, offer) in cart.offers().iter().enumerate() {
            if let Some(offers) = item_index
                .get(offer.item_key())
                .and_then(|idx| by_item.get_mut(*idx))
            {
                offers.push(offer_idx);
            }
        }

        let mut sellers: BTreeSet<SellerId> = BTreeSet::new();
        let mut filtered: Vec<(usize, Vec<usize>, DroppedOffers)> = Vec::new();
        let mut unresolved = Vec::new();
        let mut dropped = BTreeMap::new();

        for (item_idx, (item, offer_indexes)) in cart.iter().zip(&by_item).enumerate() {
            let (kept, counts, reason) = filter_offers(cart, item, offer_indexes, options);

            dropped.insert(item.key().to_string(), counts);

            if let Some(reason) = reason {
                unresolved.push(UnresolvedItem {
                    key: item.key().to_string(),
                    name: item.name().to_string(),
                    reason,
                });

                continue;
            }

            for offer_idx in &kept {
                if let Some(offer) = cart.offer(*offer_idx) {
                    sellers.insert(offer.seller().clone());
                }
            }

            filtered.push((item_idx, kept, counts));
        }

        let sellers: Vec<SellerId> = sellers.into_iter().collect();
        let mut products = Products::new();
        let mut entries = Vec::with_capacity(filtered.len());

        for (item_idx, kept, counts) in filtered {
            let quantity = cart.item(item_idx).map_or(1, Item::quantity);
            let mut candidates = SmallVec::new();

            for offer_idx in kept {
                let Some(offer) = cart.offer(offer_idx) else {
                    continue;
                };

                let Ok(seller) = sellers.binary_search(offer.seller()) else {
                    continue;
                };

                let unit_price = offer.unit_price().to_minor_units();

                candidates.push(Candidate {
                    seller,
                    offer: offer_idx,
                    unit_price,
                    quantity,
                    line_total: line_total(unit_price, quantity)?,
                    product: products.intern(&offer.product_identity()),
                });
            }

            entries.push(CatalogEntry {
                item: item_idx,
                candidates,
                dropped: counts,
            });
        }

        Ok(Self {
            sellers,
            entries,
            unresolved,
            dropped,
            products,
        })
    }

    /// Sellers with at least one eligible candidate, sorted by id
    pub fn sellers(&self) -> &[SellerId] {
        &self.sellers
    }

    /// Get a seller id by index.
    pub fn seller(&self, idx: usize) -> Option<&SellerId> {
        self.sellers.get(idx)
    }

    /// Resolvable items, in cart order
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Get an entry by index.
    pub fn entry(&self, idx: usize) -> Option<&CatalogEntry> {
        self.entries.get(idx)
    }

    /// Items with no eligible offers, in cart order
    pub fn unresolved(&self) -> &[UnresolvedItem] {
        &self.unresolved
    }

    /// Dropped-offer counts for every item, keyed by item key
    pub fn dropped(&self) -> &BTreeMap<String, DroppedOffers> {
        &self.dropped
    }

    /// Interned product identities
    pub fn products(&self) -> &Products {
        &self.products
    }

    /// Product keys of the given identities that appear in this catalog.
    ///
    /// Identities no offer carries can't earn a bonus in this run and are skipped.
    pub fn rewarded_products<'s>(
        &self,
        identities: impl IntoIterator<Item = &'s String>,
    ) -> RewardedProducts {
        identities
            .into_iter()
            .filter_map(|identity| self.products.key(identity))
            .collect()
    }
}

fn filter_offers(
    cart: &Cart<'_>,
    item: &Item,
    offer_indexes: &[usize],
    options: &CatalogOptions,
) -> (Vec<usize>, DroppedOffers, Option<UnresolvedReason>) {
    let mut counts = DroppedOffers::default();

    if offer_indexes.is_empty() {
        return (Vec::new(), counts, Some(UnresolvedReason::NoOffers));
    }

    let offers = offer_indexes
        .iter()
        .filter_map(|idx| cart.offer(*idx).map(|offer| (*idx, offer)));

    let mut available: Vec<(usize, &Offer<'_>)> = Vec::new();

    for (idx, offer) in offers {
        if !offer.is_available() {
            counts.unavailable += 1;
        } else if options.excluded_sellers.contains(offer.seller())
            || options.excluded_offers.contains(offer.id())
        {
            counts.excluded += 1;
        } else {
            available.push((idx, offer));
        }
    }

    if available.is_empty() {
        let reason = if counts.excluded == 0 {
            UnresolvedReason::Unavailable
        } else {
            UnresolvedReason::Excluded
        };

        return (Vec::new(), counts, Some(reason));
    }

    let mut matching: Vec<(usize, &Offer<'_>)> = available
        .iter()
        .copied()
        .filter(|(_, offer)| offer_matches(item, offer))
        .collect();

    counts.mismatched = available.len() - matching.len();

    if matching.is_empty() {
        let reason = UnresolvedReason::NoMatchingOffers {
            desired_rarity: item.desired_rarity().map(str::to_string),
            desired_language: item.desired_language().map(str::to_string),
            available_rarities: distinct_values(&available, Offer::rarity),
            available_languages: distinct_values(&available, Offer::language),
        };

        return (Vec::new(), counts, Some(reason));
    }

    matching.sort_by(|(_, a), (_, b)| {
        a.unit_price()
            .to_minor_units()
            .cmp(&b.unit_price().to_minor_units())
            .then_with(|| a.seller().cmp(b.seller()))
            .then_with(|| a.id().cmp(b.id()))
    });

    let mut seen: BTreeSet<&SellerId> = BTreeSet::new();
    let mut kept = Vec::new();

    for (idx, offer) in matching {
        if !seen.insert(offer.seller()) {
            counts.duplicate_seller += 1;
        } else if kept.len() >= options.max_sellers_per_item {
            counts.over_cap += 1;
        } else {
            kept.push(idx);
        }
    }

    (kept, counts, None)
}

fn offer_matches(item: &Item, offer: &Offer<'_>) -> bool {
    let rarity_ok = item
        .desired_rarity()
        .is_none_or(|wanted| attribute_matches(wanted, offer.rarity()));

    let language_ok = item
        .desired_language()
        .is_none_or(|wanted| attribute_matches(wanted, offer.language()));

    rarity_ok && language_ok
}

fn distinct_values<'o>(
    offers: &[(usize, &'o Offer<'o>)],
    value: fn(&'o Offer<'o>) -> &'o str,
) -> BTreeSet<String> {
    offers
        .iter()
        .map(|(_, offer)| value(offer).trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use rusty_money::{Money, iso::JPY};
    use testresult::TestResult;

    use super::*;

    fn offer<'a>(item: &str, seller: &str, price: i64) -> Offer<'a> {
        Offer::new(item, seller, Money::from_minor(price, JPY))
    }

    #[test]
    fn candidates_are_sorted_cheapest_first_with_seller_tie_break() -> TestResult {
        let cart = Cart::with_items(
            [Item::new("blue-eyes", "Blue-Eyes")],
            [
                offer("blue-eyes", "shop-c", 900),
                offer("blue-eyes", "shop-b", 800),
                offer("blue-eyes", "shop-a", 900),
            ],
            JPY,
        )?;

        let catalog = OfferCatalog::build(&cart, &CatalogOptions::default())?;
        let entry = catalog.entry(0).ok_or("missing entry")?;

        let sellers: Vec<&str> = entry
            .candidates()
            .iter()
            .filter_map(|c| catalog.seller(c.seller()).map(SellerId::as_str))
            .collect();

        assert_eq!(sellers, vec!["shop-b", "shop-a", "shop-c"]);
        assert_eq!(entry.spread(), 100);

        Ok(())
    }

    #[test]
    fn keeps_one_offer_per_seller_and_applies_cap() -> TestResult {
        let cart = Cart::with_items(
            [Item::new("blue-eyes", "Blue-Eyes").with_quantity(2)],
            [
                offer("blue-eyes", "shop-a", 1_000),
                offer("blue-eyes", "shop-a", 700).with_id("shop-a/blue-eyes/2"),
                offer("blue-eyes", "shop-b", 800),
                offer("blue-eyes", "shop-c", 900),
            ],
            JPY,
        )?;

        let options = CatalogOptions {
            max_sellers_per_item: 2,
            ..CatalogOptions::default()
        };

        let catalog = OfferCatalog::build(&cart, &options)?;
        let entry = catalog.entry(0).ok_or("missing entry")?;

        assert_eq!(entry.candidates().len(), 2);
        assert_eq!(entry.cheapest().map(Candidate::line_total), Some(1_400));
        assert_eq!(entry.dropped().duplicate_seller, 1);
        assert_eq!(entry.dropped().over_cap, 1);

        Ok(())
    }

    #[test]
    fn unavailable_and_excluded_offers_are_counted() -> TestResult {
        let cart = Cart::with_items(
            [Item::new("blue-eyes", "Blue-Eyes")],
            [
                offer("blue-eyes", "shop-a", 1_000).with_available(false),
                offer("blue-eyes", "shop-b", 800),
                offer("blue-eyes", "shop-c", 900),
            ],
            JPY,
        )?;

        let options = CatalogOptions {
            excluded_sellers: BTreeSet::from([SellerId::from("shop-b")]),
            ..CatalogOptions::default()
        };

        let catalog = OfferCatalog::build(&cart, &options)?;
        let counts = catalog.dropped().get("blue-eyes").ok_or("missing counts")?;

        assert_eq!(counts.unavailable, 1);
        assert_eq!(counts.excluded, 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(catalog.sellers(), &[SellerId::from("shop-c")]);

        Ok(())
    }

    #[test]
    fn rarity_mismatch_reports_available_rarities() -> TestResult {
        let cart = Cart::with_items(
            [Item::new("blue-eyes", "Blue-Eyes").with_rarity("UR")],
            [
                offer("blue-eyes", "shop-a", 1_000).with_rarity("SR"),
                offer("blue-eyes", "shop-b", 800).with_rarity("R "),
            ],
            JPY,
        )?;

        let catalog = OfferCatalog::build(&cart, &CatalogOptions::default())?;

        assert!(catalog.entries().is_empty());

        let unresolved = catalog.unresolved().first().ok_or("missing unresolved")?;

        assert_eq!(unresolved.key, "blue-eyes");
        assert_eq!(
            unresolved.reason,
            UnresolvedReason::NoMatchingOffers {
                desired_rarity: Some("UR".to_string()),
                desired_language: None,
                available_rarities: BTreeSet::from(["R".to_string(), "SR".to_string()]),
                available_languages: BTreeSet::new(),
            }
        );

        Ok(())
    }

    #[test]
    fn language_match_ignores_case() -> TestResult {
        let cart = Cart::with_items(
            [Item::new("blue-eyes", "Blue-Eyes").with_language("jp")],
            [
                offer("blue-eyes", "shop-a", 1_000).with_language("JP"),
                offer("blue-eyes", "shop-b", 800).with_language("EN"),
            ],
            JPY,
        )?;

        let catalog = OfferCatalog::build(&cart, &CatalogOptions::default())?;
        let entry = catalog.entry(0).ok_or("missing entry")?;

        assert_eq!(entry.candidates().len(), 1);
        assert_eq!(entry.dropped().mismatched, 1);

        Ok(())
    }

    #[test]
    fn items_without_offers_are_unresolved() -> TestResult {
        let cart = Cart::with_items(
            [
                Item::new("blue-eyes", "Blue-Eyes"),
                Item::new("exodia", "Exodia"),
            ],
            [offer("blue-eyes", "shop-a", 1_000)],
            JPY,
        )?;

        let catalog = OfferCatalog::build(&cart, &CatalogOptions::default())?;

        assert_eq!(catalog.entries().len(), 1);
        assert_eq!(
            catalog.unresolved().first().map(|u| &u.reason),
            Some(&UnresolvedReason::NoOffers)
        );

        Ok(())
    }

    #[test]
    fn all_unavailable_is_reported_as_unavailable() -> TestResult {
        let cart = Cart::with_items(
            [Item::new("blue-eyes", "Blue-Eyes")],
            [offer("blue-eyes", "shop-a", 1_000).with_available(false)],
            JPY,
        )?;

        let catalog = OfferCatalog::build(&cart, &CatalogOptions::default())?;

        assert_eq!(
            catalog.unresolved().first().map(|u| &u.reason),
            Some(&UnresolvedReason::Unavailable)
        );

        Ok(())
    }

    #[test]
    fn rewarded_products_skips_unknown_identities() -> TestResult {
        let cart = Cart::with_items(
            [Item::new("blue-eyes", "Blue-Eyes")],
            [offer("blue-eyes", "shop-a", 1_000)],
            JPY,
        )?;

        let catalog = OfferCatalog::build(&cart, &CatalogOptions::default())?;
        let identities = ["blue-eyes".to_string(), "exodia".to_string()];
        let rewarded = catalog.rewarded_products(&identities);

        assert_eq!(rewarded.len(), 1);

        Ok(())
    }
}
