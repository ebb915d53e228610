//! Catalog pricing and line-item reconciliation

pub mod catalog;
pub mod proposal;
pub mod reconciler;

pub use catalog::{
    Catalog, CatalogEntry, CatalogPriceResolver, CatalogSource, InMemoryCatalogs, PriceClaim,
    ResolvedPrice,
};
pub use proposal::{Proposal, ProposedItem, RawProposal, RawProposedItem};
pub use reconciler::{
    reconcile, subtotal_of, ItemDiff, ReconcilePolicy, RemovalPolicy, Reconciliation,
};

#[cfg(any(test, feature = "testing"))]
pub use catalog::MockCatalogSource;
