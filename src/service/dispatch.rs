// Collaborators outside the core: delivery and AI proposals

use async_trait::async_trait;
use serde::Serialize;

use crate::audit::{AuditAction, AuditEntry};
use crate::error::ExternalServiceError;
use crate::model::{LineItem, TenantId, WorkItem, WorkItemId};
use crate::pricing::CatalogEntry;

/// Delivers quotes and invoices to customers. Runs after commit; failures
/// never undo a transition.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send_quote(
        &self,
        work_item: &WorkItem,
        line_items: &[LineItem],
    ) -> Result<(), ExternalServiceError>;

    async fn send_invoice(&self, work_item: &WorkItem, label: &str)
        -> Result<(), ExternalServiceError>;
}

/// Dispatcher that delivers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

#[async_trait]
impl Dispatcher for NoopDispatcher {
    async fn send_quote(
        &self,
        work_item: &WorkItem,
        _line_items: &[LineItem],
    ) -> Result<(), ExternalServiceError> {
        tracing::debug!(work_item.id = %work_item.id, "Quote delivery skipped");
        Ok(())
    }

    async fn send_invoice(
        &self,
        work_item: &WorkItem,
        label: &str,
    ) -> Result<(), ExternalServiceError> {
        tracing::debug!(work_item.id = %work_item.id, invoice = label, "Invoice delivery skipped");
        Ok(())
    }
}

/// What the AI collaborator is given.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalRequest {
    pub tenant_id: TenantId,
    pub work_item_id: WorkItemId,
    pub instruction: String,
    pub current_items: Vec<LineItem>,
    pub catalog: Vec<CatalogEntry>,
    /// Earlier instructions on this work item, oldest first.
    pub history: Vec<ProposalTurn>,
}

/// One earlier instruction and what it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalTurn {
    pub prompt: String,
    pub notes: Option<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl ProposalTurn {
    /// The last `limit` instruction-driven reconciliations in `history`.
    pub fn recent(history: &[AuditEntry], limit: usize) -> Vec<Self> {
        let mut turns: Vec<Self> = history
            .iter()
            .rev()
            .filter(|entry| entry.action == AuditAction::ItemsReconciled)
            .filter_map(|entry| {
                Some(Self {
                    prompt: entry.diff.prompt.clone()?,
                    notes: entry.diff.notes.clone(),
                    added: entry.diff.added.clone(),
                    removed: entry.diff.removed.clone(),
                    modified: entry.diff.modified.clone(),
                })
            })
            .take(limit)
            .collect();
        turns.reverse();
        turns
    }
}

/// Produces candidate line items from an instruction. The reply is model
/// text containing a JSON object and is treated as untrusted.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn propose(&self, request: &ProposalRequest) -> Result<String, ExternalServiceError>;
}

/// A post-commit side effect that failed. The operation itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftFailure {
    pub operation: &'static str,
    pub error: ExternalServiceError,
}
