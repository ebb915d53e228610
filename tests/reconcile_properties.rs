// Property tests for line-item reconciliation and money arithmetic

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeSet;

use fieldquote::model::{ItemKey, LineItem, Money, TaxRate, Totals};
use fieldquote::pricing::{
    reconcile, Catalog, CatalogEntry, CatalogPriceResolver, Proposal, ProposedItem, RawProposal,
    ReconcilePolicy, RemovalPolicy,
};

const NAMES: [&str; 8] = [
    "Water Heater",
    "Pipe Replacement",
    "Labor",
    "Shutoff Valve",
    "Expansion Tank",
    "Haul Away",
    "Permit Fee",
    "Drain Cleaning",
];

#[derive(Debug, Clone, Arbitrary)]
struct Line {
    #[proptest(strategy = "0usize..8")]
    name: usize,
    #[proptest(strategy = "1u32..25")]
    quantity: u32,
    #[proptest(strategy = "1i64..400_000")]
    cents: i64,
}

fn key(name: &str) -> ItemKey {
    ItemKey::normalize(name).unwrap()
}

fn saved(lines: &[Line]) -> Vec<LineItem> {
    let mut seen = BTreeSet::new();
    lines
        .iter()
        .filter(|line| seen.insert(line.name))
        .map(|line| LineItem {
            key: key(NAMES[line.name]),
            name: NAMES[line.name].to_string(),
            description: None,
            quantity: line.quantity,
            unit_price: Money::from_cents(line.cents),
            is_upsell: false,
            catalog_ref: None,
            option_tier: None,
            manual_override: false,
        })
        .collect()
}

fn proposal(lines: &[Line]) -> Proposal {
    let items = saved(lines).iter().map(ProposedItem::from).collect();
    Proposal::new(items).unwrap()
}

fn open_policy(removal: RemovalPolicy) -> ReconcilePolicy {
    ReconcilePolicy {
        removal,
        resolver: CatalogPriceResolver::new(1_000, true),
    }
}

fn keys(items: &[LineItem]) -> BTreeSet<ItemKey> {
    items.iter().map(|i| i.key.clone()).collect()
}

proptest! {
    #[test]
    fn prop_identity_is_noop(lines in proptest::collection::vec(any::<Line>(), 0..8)) {
        let existing = saved(&lines);
        let result = reconcile(
            &existing,
            &Proposal::from_line_items(&existing),
            &Catalog::new(),
            &open_policy(RemovalPolicy::Retain),
        )
        .unwrap();
        prop_assert!(result.is_noop());
        prop_assert_eq!(result.items, existing);
    }

    #[test]
    fn prop_additive_keeps_union(
        existing in proptest::collection::vec(any::<Line>(), 0..8),
        proposed in proptest::collection::vec(any::<Line>(), 0..8),
    ) {
        let existing = saved(&existing);
        let result = reconcile(
            &existing,
            &proposal(&proposed),
            &Catalog::new(),
            &open_policy(RemovalPolicy::Retain),
        )
        .unwrap();

        let expected: BTreeSet<_> = keys(&existing).union(&keys(&saved(&proposed))).cloned().collect();
        prop_assert_eq!(keys(&result.items), expected);
        prop_assert_eq!(result.items.len(), keys(&result.items).len());
        prop_assert!(result.diff.removed.is_empty());

        let sum: Money = result.items.iter().map(LineItem::line_total).sum();
        prop_assert_eq!(result.subtotal, sum);
    }

    #[test]
    fn prop_replace_matches_proposal(
        existing in proptest::collection::vec(any::<Line>(), 0..8),
        proposed in proptest::collection::vec(any::<Line>(), 0..8),
    ) {
        let existing = saved(&existing);
        let proposed = saved(&proposed);
        let result = reconcile(
            &existing,
            &Proposal::from_line_items(&proposed),
            &Catalog::new(),
            &open_policy(RemovalPolicy::Replace),
        )
        .unwrap();
        prop_assert_eq!(keys(&result.items), keys(&proposed));
        let dropped = keys(&existing).difference(&keys(&proposed)).count();
        prop_assert_eq!(result.diff.removed.len(), dropped);
    }

    #[test]
    fn prop_total_is_derived(
        subtotal in 0i64..10_000_000,
        discount_share in 0i64..=100,
        bps in 0u32..=2_500,
    ) {
        let discount = subtotal * discount_share / 100;
        let totals = Totals::compute(
            Money::from_cents(subtotal),
            Money::from_cents(discount),
            TaxRate::from_bps(bps),
        )
        .unwrap();
        prop_assert_eq!(
            totals.total,
            totals.subtotal - totals.discount_amount + totals.tax_amount
        );
        prop_assert!(!totals.tax_amount.is_negative());
    }
}

#[test]
fn test_additive_example_from_catalog() {
    let catalog = Catalog::with_entries([
        CatalogEntry::new("Water Heater", Money::from_cents(120_000)),
        CatalogEntry::new("Pipe Replacement", Money::from_cents(30_000)),
        CatalogEntry::new("Labor", Money::from_cents(15_000)),
    ]);
    let existing = saved(&[
        Line { name: 0, quantity: 1, cents: 120_000 },
        Line { name: 1, quantity: 1, cents: 30_000 },
    ]);
    let proposed = proposal(&[
        Line { name: 0, quantity: 1, cents: 120_000 },
        Line { name: 2, quantity: 1, cents: 15_000 },
    ]);

    let result = reconcile(&existing, &proposed, &catalog, &ReconcilePolicy::default()).unwrap();
    assert_eq!(result.items.len(), 3);
    assert_eq!(result.subtotal, Money::from_cents(165_000));
    let names: Vec<_> = result.items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["Water Heater", "Pipe Replacement", "Labor"]);
    assert_eq!(result.diff.added, ["Labor"]);
}

#[test]
fn test_labor_added_to_saved_heater_and_pipe() {
    let catalog = Catalog::with_entries([
        CatalogEntry::new("Water Heater Installation", Money::from_cents(120_000)),
        CatalogEntry::new("Pipe Replacement", Money::from_cents(30_000)),
        CatalogEntry::new("Labor", Money::from_cents(7_500)),
    ]);
    let saved_line = |name: &str, cents: i64| LineItem {
        key: key(name),
        name: name.to_string(),
        description: None,
        quantity: 1,
        unit_price: Money::from_cents(cents),
        is_upsell: false,
        catalog_ref: None,
        option_tier: None,
        manual_override: false,
    };
    let existing = vec![
        saved_line("Water Heater Installation", 120_000),
        saved_line("Pipe Replacement", 30_000),
    ];
    let proposed = RawProposal::from_model_text(
        r#"{"line_items": [{"name": "Labor", "quantity": 2, "unit_price": 75}]}"#,
    )
    .unwrap()
    .validate()
    .unwrap();

    let result = reconcile(&existing, &proposed, &catalog, &ReconcilePolicy::default()).unwrap();
    let lines: Vec<_> = result
        .items
        .iter()
        .map(|i| (i.name.as_str(), i.quantity, i.unit_price.cents()))
        .collect();
    assert_eq!(
        lines,
        [
            ("Water Heater Installation", 1, 120_000),
            ("Pipe Replacement", 1, 30_000),
            ("Labor", 2, 7_500),
        ]
    );
    assert_eq!(result.subtotal, Money::from_cents(165_000));
    assert_eq!(result.diff.added, ["Labor"]);
    assert!(result.diff.removed.is_empty());
}
