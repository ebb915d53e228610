//! Persistence for work items, their line items and audit trail
//!
//! A [`Commit`] is atomic: the work item, its replacement line items, an
//! optional invoice number and exactly one audit entry are written together
//! or not at all.

pub mod locks;
pub mod memory;

use async_trait::async_trait;

use crate::audit::{AuditDraft, AuditEntry};
use crate::error::CoreResult;
use crate::model::{LineItem, WorkItem, WorkItemId};

pub use locks::EntityLocks;
pub use memory::InMemoryStore;

/// A work item together with its current line items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub work_item: WorkItem,
    pub line_items: Vec<LineItem>,
}

/// One atomic write.
///
/// `work_item.version` must equal the stored version; on success the store
/// bumps it.
#[derive(Debug, Clone)]
pub struct Commit {
    pub work_item: WorkItem,
    /// `Some` replaces the full item set.
    pub line_items: Option<Vec<LineItem>>,
    /// Reserve the tenant's next invoice number and assign it in this write.
    pub assign_invoice: bool,
    pub audit: AuditDraft,
}

impl Commit {
    pub fn new(work_item: WorkItem, audit: AuditDraft) -> Self {
        Self {
            work_item,
            line_items: None,
            assign_invoice: false,
            audit,
        }
    }

    pub fn with_line_items(mut self, items: Vec<LineItem>) -> Self {
        self.line_items = Some(items);
        self
    }

    pub fn assigning_invoice(mut self) -> Self {
        self.assign_invoice = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub work_item: WorkItem,
    pub audit: AuditEntry,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Persist a new work item with its `created` audit entry.
    async fn insert(&self, work_item: WorkItem, audit: AuditDraft) -> CoreResult<Committed>;

    async fn load(&self, id: WorkItemId) -> CoreResult<Snapshot>;

    /// Work items whose `lead_id` is `lead_id`.
    async fn dependents_of(&self, lead_id: WorkItemId) -> CoreResult<Vec<WorkItem>>;

    async fn commit(&self, commit: Commit) -> CoreResult<Committed>;

    /// Audit entries for one entity ordered by sequence.
    async fn history(&self, id: WorkItemId) -> CoreResult<Vec<AuditEntry>>;
}

/// Item keys must be unique within a work item.
pub(crate) fn check_unique_keys(items: &[LineItem]) -> Result<(), crate::error::ValidationError> {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(&item.key) {
            return Err(crate::error::ValidationError::DuplicateItem(item.key.clone()));
        }
    }
    Ok(())
}
