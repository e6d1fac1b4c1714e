//! Products
//!
//! A product identity is what the one-time loyalty bonus is keyed on. Identities are
//! interned into a [`SlotMap`] once per run so the search can carry cheap copyable keys.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Product Key
    pub struct ProductKey;
}

/// Interned product identities for one optimisation run.
#[derive(Debug, Clone, Default)]
pub struct Products {
    identities: SlotMap<ProductKey, String>,
    keys: FxHashMap<String, ProductKey>,
}

impl Products {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a product identity, returning the existing key if already known.
    pub fn intern(&mut self, identity: &str) -> ProductKey {
        if let Some(key) = self.keys.get(identity) {
            return *key;
        }

        let key = self.identities.insert(identity.to_string());

        self.keys.insert(identity.to_string(), key);

        key
    }

    /// Look up the key of an identity without interning it.
    pub fn key(&self, identity: &str) -> Option<ProductKey> {
        self.keys.get(identity).copied()
    }

    /// Return the identity behind a key.
    pub fn identity(&self, key: ProductKey) -> Option<&str> {
        self.identities.get(key).map(String::as_str)
    }

    /// Number of interned identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Check if no identity has been interned.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
