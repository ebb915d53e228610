// Request handling: composes the state machine, reconciler and store

use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use super::dispatch::{
    Dispatcher, NoopDispatcher, ProposalRequest, ProposalSource, ProposalTurn, SoftFailure,
};
use crate::audit::{Actor, AuditAction, AuditDiff, AuditDraft, AuditEntry};
use crate::config::FieldQuoteConfig;
use crate::error::{CoreError, CoreResult, ExternalServiceError, ValidationError};
use crate::invoicing::{InvoiceFormat, InvoiceNumber};
use crate::lifecycle::{
    SignatureEvent, SignatureEventKind, StatusStateMachine, TransitionContext, TransitionOutcome,
    TransitionRequest,
};
use crate::model::{
    LineItem, NewWorkItem, RecordKind, Status, TaxRate, TenantId, WorkItem, WorkItemId,
};
use crate::pricing::{
    reconcile, CatalogPriceResolver, CatalogSource, ItemDiff, Proposal, RawProposal,
    ReconcilePolicy, RemovalPolicy,
};
use crate::store::{Commit, EntityLocks, Snapshot, WorkItemStore};
use crate::telemetry::{generate_correlation_id, operation_span};

// Earlier instructions sent back to the proposal source.
const PROMPT_HISTORY: usize = 10;

/// Tunables for [`QuoteService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub reconcile: ReconcilePolicy,
    pub default_tax_rate: TaxRate,
    pub invoice_format: InvoiceFormat,
    pub conflict_retries: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&FieldQuoteConfig::default())
    }
}

impl ServiceSettings {
    pub fn from_config(config: &FieldQuoteConfig) -> Self {
        Self {
            reconcile: ReconcilePolicy {
                removal: config.pricing.removal_policy,
                resolver: CatalogPriceResolver::new(
                    config.pricing.price_tolerance_bps,
                    config.pricing.allow_uncataloged,
                ),
            },
            default_tax_rate: TaxRate::from_bps(config.pricing.default_tax_rate_bps),
            invoice_format: InvoiceFormat {
                prefix: config.invoicing.prefix.clone(),
                width: config.invoicing.width,
            },
            conflict_retries: config.lifecycle.conflict_retries,
        }
    }
}

/// Where the next item set comes from.
#[derive(Debug, Clone)]
pub enum ProposalInput {
    /// Ask the configured [`ProposalSource`].
    Instruction(String),
    /// Model output already in hand.
    ModelText(String),
    Raw(RawProposal),
    Validated(Proposal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub work_item: WorkItem,
    pub line_items: Vec<LineItem>,
    pub diff: ItemDiff,
    /// `None` when the proposal changed nothing.
    pub audit: Option<AuditEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: Status,
    pub to: Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub work_item: WorkItem,
    pub line_items: Vec<LineItem>,
    /// `None` when the transition had already been applied.
    pub change: Option<StatusChange>,
    pub audit: Option<AuditEntry>,
    pub soft_failures: Vec<SoftFailure>,
}

impl TransitionReport {
    pub fn applied(&self) -> bool {
        self.change.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureOutcome {
    Transitioned(TransitionReport),
    Viewed { audit: AuditEntry, first_view: bool },
    Ignored,
}

/// Entry point for every mutation of a work item.
///
/// Each operation holds the entity's lock from load through commit and
/// retries optimistic-concurrency conflicts up to `conflict_retries` times.
pub struct QuoteService {
    pub(crate) store: Arc<dyn WorkItemStore>,
    catalogs: Arc<dyn CatalogSource>,
    proposals: Option<Arc<dyn ProposalSource>>,
    dispatcher: Arc<dyn Dispatcher>,
    locks: EntityLocks,
    machine: StatusStateMachine,
    settings: ServiceSettings,
}

impl std::fmt::Debug for QuoteService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteService")
            .field("proposals", &self.proposals.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl QuoteService {
    pub fn new(store: Arc<dyn WorkItemStore>, catalogs: Arc<dyn CatalogSource>) -> Self {
        Self {
            store,
            catalogs,
            proposals: None,
            dispatcher: Arc::new(NoopDispatcher),
            locks: EntityLocks::new(),
            machine: StatusStateMachine::new(),
            settings: ServiceSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_proposal_source(mut self, source: Arc<dyn ProposalSource>) -> Self {
        self.proposals = Some(source);
        self
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Customer-facing invoice label, once the item has a number.
    pub fn invoice_label(&self, work_item: &WorkItem) -> Option<String> {
        self.settings.invoice_format.label_for(work_item)
    }

    pub async fn get(&self, id: WorkItemId) -> CoreResult<Snapshot> {
        self.store.load(id).await
    }

    pub async fn history(&self, id: WorkItemId) -> CoreResult<Vec<AuditEntry>> {
        self.store.history(id).await
    }

    /// Create a lead or quote. A quote created from a lead moves the lead
    /// to `draft` ("quoted") first if it is still a fresh lead.
    pub async fn create_work_item(&self, input: NewWorkItem, actor: Actor) -> CoreResult<WorkItem> {
        let span = operation_span(
            "create_work_item",
            Some(input.tenant_id),
            None,
            &generate_correlation_id(),
        );
        async move {
            StatusStateMachine::validate_entry(input.kind, input.initial_status)?;

            let _lead_guard = match input.lead_id {
                Some(lead_id) => {
                    let guard = self.locks.acquire(lead_id).await;
                    self.prepare_lead(lead_id, input.tenant_id, actor).await?;
                    Some(guard)
                }
                None => None,
            };

            let work_item = WorkItem::new(input, self.settings.default_tax_rate, Utc::now())?;
            let description = match work_item.kind {
                RecordKind::Lead => "Lead created",
                RecordKind::Quote => "Quote created",
            };
            let audit = AuditDraft::new(
                work_item.id,
                work_item.tenant_id,
                AuditAction::Created,
                actor,
                description,
            )
            .with_diff(AuditDiff {
                new_status: Some(work_item.status()),
                ..Default::default()
            });

            let committed = self.store.insert(work_item, audit).await?;
            info!(
                work_item.id = %committed.work_item.id,
                kind = committed.work_item.kind.as_str(),
                status = %committed.work_item.status(),
                "Work item created"
            );
            Ok(committed.work_item)
        }
        .instrument(span)
        .await
    }

    async fn prepare_lead(&self, lead_id: WorkItemId, tenant_id: TenantId, actor: Actor) -> CoreResult<()> {
        let lead = self.store.load(lead_id).await?.work_item;
        if lead.tenant_id != tenant_id {
            // Other tenants' records do not exist from this tenant's view.
            return Err(CoreError::not_found("lead", lead_id));
        }
        if lead.kind != RecordKind::Lead {
            return Err(ValidationError::InvalidField {
                field: "lead_id",
                reason: format!("{lead_id} is not a lead"),
            }
            .into());
        }
        if lead.status().is_terminal() {
            return Err(CoreError::TerminalState {
                status: lead.status(),
            });
        }
        if lead.status() == Status::Lead {
            self.transition_locked(lead_id, &TransitionRequest::to(Status::Draft), actor)
                .await?;
        }
        Ok(())
    }

    /// Merge a proposal into the saved items and persist the result.
    ///
    /// `removal` overrides the configured [`RemovalPolicy`] for this call.
    pub async fn reconcile_and_save(
        &self,
        id: WorkItemId,
        input: ProposalInput,
        removal: Option<RemovalPolicy>,
        actor: Actor,
    ) -> CoreResult<ReconcileReport> {
        let span = operation_span("reconcile_and_save", None, Some(id), &generate_correlation_id());
        async move {
            // The proposal source is slow; it runs before the lock is taken
            // and the merge happens against freshly loaded state.
            let (proposal, prompt) = self.resolve_proposal(id, input).await?;
            let mut policy = self.settings.reconcile;
            if let Some(removal) = removal {
                policy.removal = removal;
            }

            let _guard = self.locks.acquire(id).await;
            self.retrying(id, || {
                self.reconcile_once(id, &proposal, prompt.as_deref(), &policy, actor)
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// The validated proposal, plus the instruction that produced it.
    async fn resolve_proposal(
        &self,
        id: WorkItemId,
        input: ProposalInput,
    ) -> CoreResult<(Proposal, Option<String>)> {
        match input {
            ProposalInput::Validated(proposal) => Ok((proposal, None)),
            ProposalInput::Raw(raw) => Ok((raw.validate()?, None)),
            ProposalInput::ModelText(text) => {
                Ok((RawProposal::from_model_text(&text)?.validate()?, None))
            }
            ProposalInput::Instruction(instruction) => {
                let source = self.proposals.as_ref().ok_or_else(|| {
                    ExternalServiceError::new("proposal source", "no proposal source configured")
                })?;
                let snapshot = self.store.load(id).await?;
                let catalog = self.catalogs.catalog_for(snapshot.work_item.tenant_id).await?;
                let history = self.store.history(id).await?;
                let request = ProposalRequest {
                    tenant_id: snapshot.work_item.tenant_id,
                    work_item_id: id,
                    instruction,
                    current_items: snapshot.line_items,
                    catalog: catalog.entries().cloned().collect(),
                    history: ProposalTurn::recent(&history, PROMPT_HISTORY),
                };
                let text = source.propose(&request).await?;
                let proposal = RawProposal::from_model_text(&text)?.validate()?;
                Ok((proposal, Some(request.instruction)))
            }
        }
    }

    async fn reconcile_once(
        &self,
        id: WorkItemId,
        proposal: &Proposal,
        prompt: Option<&str>,
        policy: &ReconcilePolicy,
        actor: Actor,
    ) -> CoreResult<ReconcileReport> {
        let Snapshot {
            work_item,
            line_items,
        } = self.store.load(id).await?;

        if !work_item.status().allows_item_edits() {
            return Err(ValidationError::QuoteLocked(work_item.status()).into());
        }

        let catalog = self.catalogs.catalog_for(work_item.tenant_id).await?;
        let result = reconcile(&line_items, proposal, &catalog, policy)?;

        let mut next = work_item.clone();
        next.set_subtotal(result.subtotal)?;
        if let Some(rate) = proposal.tax_rate() {
            next.set_tax_rate(rate)?;
        }

        let pre_tax = next.totals().pre_tax();
        if pre_tax.is_negative() {
            return Err(ValidationError::NegativeTotal(pre_tax).into());
        }

        if result.is_noop() && next == work_item {
            return Ok(ReconcileReport {
                work_item,
                line_items,
                diff: result.diff,
                audit: None,
            });
        }

        let description = format!(
            "Line items updated: {} added, {} removed, {} modified",
            result.diff.added.len(),
            result.diff.removed.len(),
            result.diff.modified.len()
        );
        let mut diff = AuditDiff::items(&result.diff, work_item.total(), next.total());
        diff.prompt = prompt.map(str::to_string);
        diff.notes = proposal.notes().map(str::to_string);
        let audit = AuditDraft::new(id, work_item.tenant_id, AuditAction::ItemsReconciled, actor, description)
            .with_diff(diff);

        let committed = self
            .store
            .commit(Commit::new(next, audit).with_line_items(result.items.clone()))
            .await?;

        info!(
            work_item.id = %id,
            added = result.diff.added.len(),
            removed = result.diff.removed.len(),
            modified = result.diff.modified.len(),
            total = %committed.work_item.total(),
            "Line items reconciled"
        );

        Ok(ReconcileReport {
            work_item: committed.work_item,
            line_items: result.items,
            diff: result.diff,
            audit: Some(committed.audit),
        })
    }

    /// Move a work item to `request.target`.
    ///
    /// Completing a job assigns its invoice number in the same commit.
    /// Delivery of quotes and invoices runs afterwards; its failures are
    /// returned as soft failures next to the committed result.
    pub async fn transition(
        &self,
        id: WorkItemId,
        request: TransitionRequest,
        actor: Actor,
    ) -> CoreResult<TransitionReport> {
        let span = operation_span("transition", None, Some(id), &generate_correlation_id());
        async move {
            let report = {
                let _guard = self.locks.acquire(id).await;
                self.transition_locked(id, &request, actor).await?
            };
            Ok(self.run_side_effects(report).await)
        }
        .instrument(span)
        .await
    }

    /// Transition while the caller holds the entity lock.
    pub(crate) async fn transition_locked(
        &self,
        id: WorkItemId,
        request: &TransitionRequest,
        actor: Actor,
    ) -> CoreResult<TransitionReport> {
        self.retrying(id, || self.transition_once(id, request, actor))
            .await
    }

    async fn transition_once(
        &self,
        id: WorkItemId,
        request: &TransitionRequest,
        actor: Actor,
    ) -> CoreResult<TransitionReport> {
        let Snapshot {
            work_item,
            line_items,
        } = self.store.load(id).await?;

        let context = TransitionContext {
            now: Utc::now(),
            line_item_count: line_items.len(),
        };

        let (next, from, to) = match self.machine.apply(&work_item, request, &context)? {
            TransitionOutcome::AlreadyApplied => {
                return Ok(TransitionReport {
                    work_item,
                    line_items,
                    change: None,
                    audit: None,
                    soft_failures: Vec::new(),
                })
            }
            TransitionOutcome::Applied {
                work_item: next,
                from,
                to,
            } => (next, from, to),
        };

        let description = match next.archived_reason() {
            Some(reason) if to == Status::Archived => format!("Archived: {reason}"),
            _ => format!("Status changed from {from} to {to}"),
        };
        let audit = AuditDraft::new(id, work_item.tenant_id, AuditAction::StatusChanged, actor, description)
            .with_diff(AuditDiff::status(from, to));

        let mut commit = Commit::new(next, audit);
        if to == Status::Completed {
            commit = commit.assigning_invoice();
        }
        let committed = self.store.commit(commit).await?;

        info!(
            work_item.id = %id,
            from = %from,
            to = %to,
            version = committed.work_item.version(),
            "Work item transitioned"
        );

        Ok(TransitionReport {
            work_item: committed.work_item,
            line_items,
            change: Some(StatusChange { from, to }),
            audit: Some(committed.audit),
            soft_failures: Vec::new(),
        })
    }

    async fn run_side_effects(&self, mut report: TransitionReport) -> TransitionReport {
        let Some(change) = report.change else {
            return report;
        };

        let result = match change.to {
            Status::Sent => Some((
                "send_quote",
                self.dispatcher
                    .send_quote(&report.work_item, &report.line_items)
                    .await,
            )),
            Status::Completed => match self.invoice_label(&report.work_item) {
                Some(label) => Some((
                    "send_invoice",
                    self.dispatcher.send_invoice(&report.work_item, &label).await,
                )),
                None => None,
            },
            _ => None,
        };

        if let Some((operation, Err(error))) = result {
            warn!(
                work_item.id = %report.work_item.id,
                operation = operation,
                error = %error,
                "Post-commit side effect failed"
            );
            report.soft_failures.push(SoftFailure { operation, error });
        }
        report
    }

    /// Return the work item's invoice number, assigning one to a completed
    /// item that lacks it.
    pub async fn allocate_invoice(
        &self,
        tenant_id: TenantId,
        id: WorkItemId,
        actor: Actor,
    ) -> CoreResult<InvoiceNumber> {
        let span = operation_span("allocate_invoice", Some(tenant_id), Some(id), &generate_correlation_id());
        async move {
            let _guard = self.locks.acquire(id).await;
            self.retrying(id, || self.allocate_once(tenant_id, id, actor))
                .await
        }
        .instrument(span)
        .await
    }

    async fn allocate_once(
        &self,
        tenant_id: TenantId,
        id: WorkItemId,
        actor: Actor,
    ) -> CoreResult<InvoiceNumber> {
        let work_item = self.store.load(id).await?.work_item;
        if work_item.tenant_id != tenant_id {
            return Err(CoreError::not_found("work item", id));
        }
        if let Some(number) = work_item.invoice_number() {
            return Ok(number);
        }
        if work_item.timestamps().completed_at.is_none() {
            return Err(ValidationError::InvoiceBeforeCompletion(work_item.status()).into());
        }

        let audit = AuditDraft::new(
            id,
            tenant_id,
            AuditAction::InvoiceAssigned,
            actor,
            "Invoice number assigned",
        );
        let committed = self
            .store
            .commit(Commit::new(work_item, audit).assigning_invoice())
            .await?;
        let number = committed.work_item.invoice_number().ok_or_else(|| {
            CoreError::Storage("store did not assign an invoice number".to_string())
        })?;
        info!(work_item.id = %id, invoice = %number, "Invoice number assigned");
        Ok(number)
    }

    /// Apply an e-signature provider event to a work item.
    pub async fn handle_signature_event(
        &self,
        id: WorkItemId,
        event: &SignatureEvent,
    ) -> CoreResult<SignatureOutcome> {
        match &event.kind {
            SignatureEventKind::Signed => Ok(SignatureOutcome::Transitioned(
                self.transition(id, TransitionRequest::to(Status::Accepted), Actor::System)
                    .await?,
            )),
            SignatureEventKind::Declined => Ok(SignatureOutcome::Transitioned(
                self.transition(
                    id,
                    TransitionRequest::archive(event.decline_reason()),
                    Actor::System,
                )
                .await?,
            )),
            SignatureEventKind::Viewed => {
                let span = operation_span("record_view", None, Some(id), &generate_correlation_id());
                async move {
                    let _guard = self.locks.acquire(id).await;
                    self.retrying(id, || self.record_view(id, event)).await
                }
                .instrument(span)
                .await
            }
            SignatureEventKind::Other(name) => {
                info!(work_item.id = %id, event = %name, "Ignoring unhandled signature event");
                Ok(SignatureOutcome::Ignored)
            }
        }
    }

    async fn record_view(&self, id: WorkItemId, event: &SignatureEvent) -> CoreResult<SignatureOutcome> {
        let work_item = self.store.load(id).await?.work_item;
        let mut next = work_item.clone();
        let first_view = !next.metadata.contains_key("viewed_at");
        if first_view {
            let viewed_at = event.occurred_at.unwrap_or_else(Utc::now);
            next.metadata
                .insert("viewed_at".to_string(), Value::String(viewed_at.to_rfc3339()));
        }

        let description = match &event.signer_email {
            Some(email) => format!("Quote viewed by {email}"),
            None => "Quote viewed".to_string(),
        };
        let audit = AuditDraft::new(id, work_item.tenant_id, AuditAction::Viewed, Actor::System, description);
        let committed = self.store.commit(Commit::new(next, audit)).await?;
        Ok(SignatureOutcome::Viewed {
            audit: committed.audit,
            first_view,
        })
    }

    async fn retrying<T, F, Fut>(&self, id: WorkItemId, mut attempt: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && retries < self.settings.conflict_retries => {
                    retries += 1;
                    warn!(work_item.id = %id, retry = retries, error = %err, "Retrying after concurrent update");
                }
                result => return result,
            }
        }
    }
}
