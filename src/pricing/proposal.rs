// Parsing and validating untrusted AI proposals

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::warn;

use crate::error::ValidationError;
use crate::model::{ItemKey, LineItem, Money, OptionTier, TaxRate};

// First '{' through the last '}', across newlines.
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex is valid"));

/// Proposal as delivered by the model: dollar amounts, loose types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProposal {
    #[serde(alias = "line_items")]
    pub items: Vec<RawProposedItem>,
    /// Percent, e.g. `8.5`.
    #[serde(default)]
    pub tax_rate: Option<f64>,
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProposedItem {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    /// Claimed line total. Recomputed, never trusted.
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub is_upsell: bool,
    #[serde(default)]
    pub is_discount: bool,
    #[serde(default)]
    pub option_tier: Option<String>,
}

impl RawProposal {
    /// Extract and parse the first JSON object embedded in free model text.
    pub fn from_model_text(text: &str) -> Result<Self, ValidationError> {
        let json = JSON_OBJECT
            .find(text)
            .ok_or_else(|| ValidationError::MalformedProposal("no JSON object found".to_string()))?;
        serde_json::from_str(json.as_str())
            .map_err(|e| ValidationError::MalformedProposal(e.to_string()))
    }

    pub fn validate(&self) -> Result<Proposal, ValidationError> {
        let items = self
            .items
            .iter()
            .map(RawProposedItem::validate)
            .collect::<Result<Vec<_>, _>>()?;

        let tax_rate = match self.tax_rate {
            Some(percent) => Some(TaxRate::from_percent(percent).ok_or_else(|| {
                ValidationError::InvalidField {
                    field: "tax_rate",
                    reason: format!("{percent} is not a percentage between 0 and 100"),
                }
            })?),
            None => None,
        };

        let notes = self
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let proposal = Proposal::new(items)?
            .with_tax_rate(tax_rate)
            .with_notes(notes);

        if let Some(claimed) = self.subtotal.and_then(Money::from_dollars) {
            if let Some(actual) = proposal.claimed_subtotal() {
                if actual != claimed {
                    warn!(
                        claimed = %claimed,
                        recomputed = %actual,
                        "Proposal subtotal differs from recomputed value"
                    );
                }
            }
        }

        Ok(proposal)
    }
}

impl RawProposedItem {
    fn validate(&self) -> Result<ProposedItem, ValidationError> {
        let key = ItemKey::normalize(&self.name).ok_or(ValidationError::EmptyItemName)?;

        let quantity = self.quantity;
        if !quantity.is_finite()
            || quantity.fract() != 0.0
            || quantity < 1.0
            || quantity > f64::from(u32::MAX)
        {
            return Err(ValidationError::InvalidQuantity {
                item: self.name.clone(),
                quantity: quantity.to_string(),
            });
        }
        let quantity = quantity as u32;

        let unit_price =
            Money::from_dollars(self.unit_price).ok_or_else(|| ValidationError::InvalidPrice {
                item: self.name.clone(),
                price: self.unit_price.to_string(),
            })?;
        if self.is_discount && !unit_price.is_negative() {
            return Err(ValidationError::DiscountNotNegative(self.name.clone()));
        }

        let option_tier = match self.option_tier.as_deref() {
            Some(tier) => Some(OptionTier::parse(tier).ok_or_else(|| {
                ValidationError::InvalidField {
                    field: "option_tier",
                    reason: format!("'{tier}' is not good, better or best"),
                }
            })?),
            None => None,
        };

        if let Some(claimed) = self.total.and_then(Money::from_dollars) {
            match unit_price.checked_mul_qty(quantity) {
                Some(actual) if actual != claimed => warn!(
                    item = %self.name,
                    claimed = %claimed,
                    recomputed = %actual,
                    "Proposed line total differs from quantity x unit price"
                ),
                _ => {}
            }
        }

        Ok(ProposedItem {
            key,
            name: self.name.trim().to_string(),
            description: self.description.clone().filter(|d| !d.trim().is_empty()),
            quantity,
            unit_price,
            is_upsell: self.is_upsell,
            option_tier,
            manual_override: false,
        })
    }
}

/// A validated proposed line. Quantities are positive and prices are cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedItem {
    pub key: ItemKey,
    pub name: String,
    pub description: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub is_upsell: bool,
    pub option_tier: Option<OptionTier>,
    pub manual_override: bool,
}

impl ProposedItem {
    pub fn is_discount(&self) -> bool {
        self.unit_price.is_negative()
    }
}

impl From<&LineItem> for ProposedItem {
    fn from(item: &LineItem) -> Self {
        Self {
            key: item.key.clone(),
            name: item.name.clone(),
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            is_upsell: item.is_upsell,
            option_tier: item.option_tier,
            manual_override: item.manual_override,
        }
    }
}

/// A validated proposal with unique item keys, in proposal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal {
    items: Vec<ProposedItem>,
    tax_rate: Option<TaxRate>,
    /// The model's explanation of what it changed.
    notes: Option<String>,
}

impl Proposal {
    pub fn new(items: Vec<ProposedItem>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(&item.key) {
                return Err(ValidationError::DuplicateItem(item.key.clone()));
            }
        }
        Ok(Self {
            items,
            tax_rate: None,
            notes: None,
        })
    }

    pub fn with_tax_rate(mut self, tax_rate: Option<TaxRate>) -> Self {
        self.tax_rate = tax_rate;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    /// The proposal that reproduces an existing item set exactly.
    pub fn from_line_items(items: &[LineItem]) -> Self {
        Self {
            items: items.iter().map(ProposedItem::from).collect(),
            tax_rate: None,
            notes: None,
        }
    }

    pub fn items(&self) -> &[ProposedItem] {
        &self.items
    }

    pub fn tax_rate(&self) -> Option<TaxRate> {
        self.tax_rate
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    fn claimed_subtotal(&self) -> Option<Money> {
        self.items.iter().try_fold(Money::ZERO, |acc, item| {
            acc.checked_add(item.unit_price.checked_mul_qty(item.quantity)?)
        })
    }
}
