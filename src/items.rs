//! Items

use serde::Deserialize;

/// An item the buyer wants to source.
///
/// Items are read-only inputs to one optimisation run. An item may declare a desired
/// rarity and/or language; offers that don't match are never considered for it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Item {
    key: String,

    #[serde(default)]
    name: String,

    #[serde(default, rename = "rarity")]
    desired_rarity: Option<String>,

    #[serde(default, rename = "language")]
    desired_language: Option<String>,

    #[serde(default = "default_quantity")]
    quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl Item {
    /// Create an item with a quantity of one and no rarity or language preference.
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            desired_rarity: None,
            desired_language: None,
            quantity: 1,
        }
    }

    /// Set the quantity wanted.
    #[must_use]
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Only accept offers of this rarity.
    #[must_use]
    pub fn with_rarity(mut self, rarity: impl Into<String>) -> Self {
        self.desired_rarity = Some(rarity.into());
        self
    }

    /// Only accept offers in this language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.desired_language = Some(language.into());
        self
    }

    /// Unique key of the item within a cart
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Display name, falling back to the key when none was given
    pub fn name(&self) -> &str {
        if self.name.is_empty() {
            &self.key
        } else {
            &self.name
        }
    }

    /// Desired rarity, if declared
    pub fn desired_rarity(&self) -> Option<&str> {
        self.desired_rarity.as_deref()
    }

    /// Desired language, if declared
    pub fn desired_language(&self) -> Option<&str> {
        self.desired_language.as_deref()
    }

    /// Number of copies wanted
    pub fn quantity(&self) -> u32 {
        self.quantity
    }
}

/// Compare two attribute values the way offer filters do: trimmed, ASCII case-insensitive.
pub fn attribute_matches(wanted: &str, actual: &str) -> bool {
    wanted.trim().eq_ignore_ascii_case(actual.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_falls_back_to_key() {
        let item = Item::new("dark-magician", "");

        assert_eq!(item.name(), "dark-magician");
    }

    #[test]
    fn builder_sets_preferences() {
        let item = Item::new("blue-eyes", "Blue-Eyes White Dragon")
            .with_quantity(3)
            .with_rarity("UR")
            .with_language("JP");

        assert_eq!(item.quantity(), 3);
        assert_eq!(item.desired_rarity(), Some("UR"));
        assert_eq!(item.desired_language(), Some("JP"));
    }

    #[test]
    fn attribute_matching_ignores_case_and_padding() {
        assert!(attribute_matches("ur", " UR "));
        assert!(!attribute_matches("UR", "SR"));
    }
}
