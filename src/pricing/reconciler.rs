// Merging a proposed item set into the saved one

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::catalog::{Catalog, CatalogPriceResolver, PriceClaim};
use super::proposal::{Proposal, ProposedItem};
use crate::error::ValidationError;
use crate::model::{ItemKey, LineItem, Money};

/// What happens to saved items the proposal does not mention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Keep them. Proposals only add and update.
    #[default]
    Retain,
    /// Drop them and report them as removed.
    Replace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub removal: RemovalPolicy,
    pub resolver: CatalogPriceResolver,
}

/// Display names of the lines that changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl ItemDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub items: Vec<LineItem>,
    pub subtotal: Money,
    pub diff: ItemDiff,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.diff.is_empty()
    }
}

/// Merge `proposal` into `existing`.
///
/// Saved lines keep their position; new lines follow in proposal order.
/// Lines marked `manual_override` only take the proposed quantity.
pub fn reconcile(
    existing: &[LineItem],
    proposal: &Proposal,
    catalog: &Catalog,
    policy: &ReconcilePolicy,
) -> Result<Reconciliation, ValidationError> {
    let proposed: HashMap<&ItemKey, &ProposedItem> =
        proposal.items().iter().map(|p| (&p.key, p)).collect();

    let mut seen = HashSet::with_capacity(existing.len());
    let mut items = Vec::with_capacity(existing.len() + proposal.items().len());
    let mut diff = ItemDiff::default();

    for current in existing {
        if !seen.insert(&current.key) {
            return Err(ValidationError::Invariant(format!(
                "saved items contain '{}' twice",
                current.key
            )));
        }

        match proposed.get(&current.key) {
            Some(update) => {
                let next = merge_existing(current, update, catalog, &policy.resolver)?;
                if next != *current {
                    diff.modified.push(next.name.clone());
                }
                items.push(next);
            }
            None => match policy.removal {
                RemovalPolicy::Retain => items.push(current.clone()),
                RemovalPolicy::Replace => diff.removed.push(current.name.clone()),
            },
        }
    }

    for candidate in proposal.items() {
        if seen.contains(&candidate.key) {
            continue;
        }
        let item = new_line(candidate, catalog, &policy.resolver)?;
        diff.added.push(item.name.clone());
        items.push(item);
    }

    let subtotal = subtotal_of(&items)?;
    if subtotal.is_negative() {
        return Err(ValidationError::NegativeTotal(subtotal));
    }

    Ok(Reconciliation {
        items,
        subtotal,
        diff,
    })
}

/// Sum of line totals, failing instead of wrapping on overflow.
pub fn subtotal_of(items: &[LineItem]) -> Result<Money, ValidationError> {
    items.iter().try_fold(Money::ZERO, |acc, item| {
        item.checked_total()
            .and_then(|line| acc.checked_add(line))
            .ok_or(ValidationError::AmountOverflow)
    })
}

fn merge_existing(
    current: &LineItem,
    update: &ProposedItem,
    catalog: &Catalog,
    resolver: &CatalogPriceResolver,
) -> Result<LineItem, ValidationError> {
    let mut next = current.clone();
    next.quantity = update.quantity;

    if current.manual_override {
        return Ok(next);
    }

    if update.unit_price != current.unit_price {
        let resolved = resolver.resolve(
            catalog,
            PriceClaim {
                key: &update.key,
                name: &update.name,
                unit_price: update.unit_price,
                manual_override: update.manual_override,
            },
        )?;
        next.unit_price = resolved.unit_price;
        next.name = resolved.name;
        next.catalog_ref = resolved.catalog_ref.or(current.catalog_ref);
    }

    next.description = update
        .description
        .clone()
        .or_else(|| current.description.clone());
    next.is_upsell = update.is_upsell;
    next.option_tier = update.option_tier.or(current.option_tier);
    next.manual_override = update.manual_override;
    Ok(next)
}

fn new_line(
    candidate: &ProposedItem,
    catalog: &Catalog,
    resolver: &CatalogPriceResolver,
) -> Result<LineItem, ValidationError> {
    let resolved = resolver.resolve(
        catalog,
        PriceClaim {
            key: &candidate.key,
            name: &candidate.name,
            unit_price: candidate.unit_price,
            manual_override: candidate.manual_override,
        },
    )?;

    Ok(LineItem {
        key: candidate.key.clone(),
        name: resolved.name,
        description: candidate.description.clone(),
        quantity: candidate.quantity,
        unit_price: resolved.unit_price,
        is_upsell: candidate.is_upsell,
        catalog_ref: resolved.catalog_ref,
        option_tier: candidate.option_tier,
        manual_override: candidate.manual_override,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::catalog::CatalogEntry;

    fn catalog() -> Catalog {
        Catalog::with_entries([
            CatalogEntry::new("Water Heater", Money::from_cents(120_000)),
            CatalogEntry::new("Pipe Replacement", Money::from_cents(30_000)),
            CatalogEntry::new("Labor", Money::from_cents(15_000)),
        ])
    }

    fn proposed(name: &str, quantity: u32, cents: i64) -> ProposedItem {
        ProposedItem {
            key: ItemKey::normalize(name).unwrap(),
            name: name.to_string(),
            description: None,
            quantity,
            unit_price: Money::from_cents(cents),
            is_upsell: false,
            option_tier: None,
            manual_override: false,
        }
    }

    fn saved(name: &str, quantity: u32, cents: i64) -> LineItem {
        LineItem {
            key: ItemKey::normalize(name).unwrap(),
            name: name.to_string(),
            description: None,
            quantity,
            unit_price: Money::from_cents(cents),
            is_upsell: false,
            catalog_ref: None,
            option_tier: None,
            manual_override: false,
        }
    }

    #[test]
    fn test_additive_merge_keeps_omitted_items() {
        let existing = vec![
            saved("Water Heater", 1, 120_000),
            saved("Pipe Replacement", 1, 30_000),
        ];
        let proposal = Proposal::new(vec![
            proposed("Water Heater", 1, 120_000),
            proposed("Labor", 1, 15_000),
        ])
        .unwrap();

        let result = reconcile(&existing, &proposal, &catalog(), &ReconcilePolicy::default()).unwrap();
        let names: Vec<_> = result.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Water Heater", "Pipe Replacement", "Labor"]);
        assert_eq!(result.subtotal, Money::from_cents(165_000));
        assert_eq!(result.diff.added, ["Labor"]);
        assert!(result.diff.removed.is_empty());
        assert!(result.diff.modified.is_empty());
    }

    #[test]
    fn test_replace_policy_reports_removed() {
        let existing = vec![
            saved("Water Heater", 1, 120_000),
            saved("Pipe Replacement", 1, 30_000),
        ];
        let proposal = Proposal::new(vec![proposed("Water Heater", 1, 120_000)]).unwrap();
        let policy = ReconcilePolicy {
            removal: RemovalPolicy::Replace,
            ..Default::default()
        };

        let result = reconcile(&existing, &proposal, &catalog(), &policy).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.diff.removed, ["Pipe Replacement"]);
        assert_eq!(result.subtotal, Money::from_cents(120_000));
    }

    #[test]
    fn test_manual_override_keeps_price() {
        let mut hand_priced = saved("Water Heater", 1, 99_000);
        hand_priced.manual_override = true;
        hand_priced.description = Some("Customer-supplied unit".to_string());
        let proposal = Proposal::new(vec![proposed("Water Heater", 2, 120_000)]).unwrap();

        let result = reconcile(&[hand_priced], &proposal, &catalog(), &ReconcilePolicy::default())
            .unwrap();
        let item = &result.items[0];
        assert_eq!(item.quantity, 2);
        assert_eq!(item.unit_price, Money::from_cents(99_000));
        assert_eq!(item.description.as_deref(), Some("Customer-supplied unit"));
        assert_eq!(result.diff.modified, ["Water Heater"]);
    }

    #[test]
    fn test_changed_price_is_validated() {
        let existing = vec![saved("Labor", 1, 15_000)];
        let proposal = Proposal::new(vec![proposed("Labor", 1, 40_000)]).unwrap();
        let err = reconcile(&existing, &proposal, &catalog(), &ReconcilePolicy::default())
            .unwrap_err();
        assert!(matches!(err, ValidationError::PriceOutOfTolerance { .. }));
    }

    #[test]
    fn test_identity_is_noop() {
        let existing = vec![
            saved("Water Heater", 1, 120_000),
            saved("Labor", 3, 15_000),
            saved("Spring special", 1, -5_000),
        ];
        let proposal = Proposal::from_line_items(&existing);
        let result = reconcile(&existing, &proposal, &catalog(), &ReconcilePolicy::default()).unwrap();
        assert_eq!(result.items, existing);
        assert!(result.is_noop());
    }

    #[test]
    fn test_negative_subtotal_rejected() {
        let proposal = Proposal::new(vec![proposed("Goodwill credit", 1, -10_000)]).unwrap();
        assert_eq!(
            reconcile(&[], &proposal, &catalog(), &ReconcilePolicy::default()),
            Err(ValidationError::NegativeTotal(Money::from_cents(-10_000)))
        );
    }

    #[test]
    fn test_overflow_detected() {
        let existing = vec![saved("Labor", u32::MAX, i64::MAX / 2)];
        assert_eq!(subtotal_of(&existing), Err(ValidationError::AmountOverflow));
    }
}
