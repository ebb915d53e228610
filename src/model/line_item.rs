// Line items and the normalized key they are merged on

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

use super::money::Money;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex is valid"));

/// Normalized item name. Two names with the same key are the same line.
///
/// Lowercased, with every run of non-alphanumeric characters collapsed to a
/// single space: `"Water-Heater  Installation"` → `"water heater installation"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    /// Returns `None` when the name has no alphanumeric content.
    pub fn normalize(name: &str) -> Option<ItemKey> {
        let lowered = name.to_lowercase();
        let collapsed = NON_ALNUM.replace_all(&lowered, " ");
        let trimmed = collapsed.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(ItemKey(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Good/better/best grouping for optional packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionTier {
    Good,
    Better,
    Best,
}

impl OptionTier {
    pub fn parse(value: &str) -> Option<OptionTier> {
        match value.trim().to_ascii_lowercase().as_str() {
            "good" => Some(OptionTier::Good),
            "better" => Some(OptionTier::Better),
            "best" => Some(OptionTier::Best),
            _ => None,
        }
    }
}

/// One priced line on a work item's quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub key: ItemKey,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    #[serde(default)]
    pub is_upsell: bool,
    #[serde(default)]
    pub catalog_ref: Option<Uuid>,
    #[serde(default)]
    pub option_tier: Option<OptionTier>,
    /// Price was set by hand and must survive AI proposals.
    #[serde(default)]
    pub manual_override: bool,
}

impl LineItem {
    /// `unit_price × quantity`. Saturates instead of overflowing; callers that
    /// sum totals use [`LineItem::checked_total`].
    pub fn line_total(&self) -> Money {
        self.checked_total()
            .unwrap_or(if self.unit_price.is_negative() {
                Money::from_cents(i64::MIN)
            } else {
                Money::from_cents(i64::MAX)
            })
    }

    pub fn checked_total(&self) -> Option<Money> {
        self.unit_price.checked_mul_qty(self.quantity)
    }

    pub fn is_discount(&self) -> bool {
        self.unit_price.is_negative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_case_and_punctuation() {
        let a = ItemKey::normalize("Water Heater Installation").unwrap();
        let b = ItemKey::normalize("  water-heater   INSTALLATION ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "water heater installation");
        assert!(ItemKey::normalize(" -- ").is_none());
    }

    #[test]
    fn test_line_total() {
        let item = LineItem {
            key: ItemKey::normalize("Labor").unwrap(),
            name: "Labor".to_string(),
            description: None,
            quantity: 2,
            unit_price: Money::from_cents(7_500),
            is_upsell: false,
            catalog_ref: None,
            option_tier: None,
            manual_override: false,
        };
        assert_eq!(item.line_total(), Money::from_cents(15_000));
        assert!(!item.is_discount());
    }
}
