// In-memory WorkItemStore

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use super::{check_unique_keys, Commit, Committed, Snapshot, WorkItemStore};
use crate::audit::{AuditDraft, AuditEntry, AuditLog};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::invoicing::{InvoiceNumber, InvoiceNumberAllocator};
use crate::model::{LineItem, TenantId, WorkItem, WorkItemId};

#[derive(Debug, Default)]
struct State {
    items: HashMap<WorkItemId, WorkItem>,
    line_items: HashMap<WorkItemId, Vec<LineItem>>,
    audit: AuditLog,
    invoices: InvoiceNumberAllocator,
    invoice_index: HashSet<(TenantId, InvoiceNumber)>,
}

/// Process-local store. Every write takes the single state lock, so a
/// commit and its audit entry become visible together.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last invoice number issued to a tenant.
    pub async fn last_invoice_number(&self, tenant_id: TenantId) -> Option<InvoiceNumber> {
        self.state.read().await.invoices.last_issued(tenant_id)
    }

    /// Every audit entry of a tenant ordered by tenant sequence.
    pub async fn tenant_history(&self, tenant_id: TenantId) -> Vec<AuditEntry> {
        self.state.read().await.audit.tenant_history(tenant_id)
    }
}

#[async_trait]
impl WorkItemStore for InMemoryStore {
    async fn insert(&self, work_item: WorkItem, audit: AuditDraft) -> CoreResult<Committed> {
        work_item.check_invariants()?;
        let mut state = self.state.write().await;
        if state.items.contains_key(&work_item.id) {
            return Err(CoreError::Conflict {
                id: work_item.id,
                expected: 0,
                found: state.items[&work_item.id].version(),
            });
        }

        let entry = state.audit.append(audit, work_item.created_at);
        state.line_items.insert(work_item.id, Vec::new());
        state.items.insert(work_item.id, work_item.clone());
        Ok(Committed {
            work_item,
            audit: entry,
        })
    }

    async fn load(&self, id: WorkItemId) -> CoreResult<Snapshot> {
        let state = self.state.read().await;
        let work_item = state
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("work item", id))?;
        let line_items = state.line_items.get(&id).cloned().unwrap_or_default();
        Ok(Snapshot {
            work_item,
            line_items,
        })
    }

    async fn dependents_of(&self, lead_id: WorkItemId) -> CoreResult<Vec<WorkItem>> {
        let state = self.state.read().await;
        let mut dependents: Vec<WorkItem> = state
            .items
            .values()
            .filter(|item| item.lead_id == Some(lead_id))
            .cloned()
            .collect();
        dependents.sort_by_key(|item| (item.created_at, item.id));
        Ok(dependents)
    }

    async fn commit(&self, commit: Commit) -> CoreResult<Committed> {
        let Commit {
            mut work_item,
            line_items,
            assign_invoice,
            audit,
        } = commit;

        let mut state = self.state.write().await;
        let stored = state
            .items
            .get(&work_item.id)
            .ok_or_else(|| CoreError::not_found("work item", work_item.id))?;

        let stored_version = stored.version();
        if stored_version != work_item.version() {
            return Err(CoreError::Conflict {
                id: work_item.id,
                expected: work_item.version(),
                found: stored_version,
            });
        }

        if let Some(items) = &line_items {
            check_unique_keys(items)?;
        }

        let reserved = if assign_invoice && work_item.invoice_number().is_none() {
            let number = state.invoices.peek_next(work_item.tenant_id);
            work_item.assign_invoice(number);
            Some(number)
        } else {
            None
        };

        work_item.check_invariants()?;
        work_item.check_update_from(stored)?;
        if let Some(number) = reserved {
            if state.invoice_index.contains(&(work_item.tenant_id, number)) {
                return Err(ValidationError::Invariant(format!(
                    "invoice number {number} already issued"
                ))
                .into());
            }
        }

        // Nothing below can fail.
        if let Some(number) = reserved {
            let issued = state.invoices.reserve(work_item.tenant_id);
            debug_assert_eq!(issued, number);
            state.invoice_index.insert((work_item.tenant_id, number));
        }

        let now = Utc::now();
        let next_version = stored_version + 1;
        work_item.touch(now, next_version);
        let entry = state.audit.append(audit, now);
        if let Some(items) = line_items {
            state.line_items.insert(work_item.id, items);
        }
        state.items.insert(work_item.id, work_item.clone());

        debug!(
            work_item.id = %work_item.id,
            version = next_version,
            sequence = entry.sequence,
            "Committed work item"
        );

        Ok(Committed {
            work_item,
            audit: entry,
        })
    }

    async fn history(&self, id: WorkItemId) -> CoreResult<Vec<AuditEntry>> {
        let state = self.state.read().await;
        if !state.items.contains_key(&id) {
            return Err(CoreError::not_found("work item", id));
        }
        Ok(state.audit.history(id))
    }
}
