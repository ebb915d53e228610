// The WorkItem aggregate: one customer engagement from lead to payment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::money::{Money, TaxRate, Totals};
use super::status::{Queue, Status};
use crate::error::ValidationError;
use crate::invoicing::InvoiceNumber;

pub type TenantId = Uuid;
pub type WorkItemId = Uuid;

/// Leads and quotes share one aggregate; the kind limits how far a record
/// may travel along the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// An inquiry. Stops at `draft` ("quoted") and can only be archived after.
    Lead,
    /// A quote that can run the whole lifecycle.
    Quote,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Lead => "lead",
            RecordKind::Quote => "quote",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRef {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl CustomerRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Set-once lifecycle timestamps. Each transition fills exactly one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleTimestamps {
    pub quoted_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl LifecycleTimestamps {
    /// The timestamp written when entering `status`. `Lead` has none.
    pub fn stamp_for(&self, status: Status) -> Option<DateTime<Utc>> {
        match status {
            Status::Lead => None,
            Status::Draft => self.quoted_at,
            Status::Sent => self.sent_at,
            Status::Accepted => self.accepted_at,
            Status::Scheduled => self.scheduled_at,
            Status::InProgress => self.started_at,
            Status::Completed => self.completed_at,
            Status::Paid => self.paid_at,
            Status::Archived => self.archived_at,
        }
    }

    pub(crate) fn slot_mut(&mut self, status: Status) -> Option<&mut Option<DateTime<Utc>>> {
        match status {
            Status::Lead => None,
            Status::Draft => Some(&mut self.quoted_at),
            Status::Sent => Some(&mut self.sent_at),
            Status::Accepted => Some(&mut self.accepted_at),
            Status::Scheduled => Some(&mut self.scheduled_at),
            Status::InProgress => Some(&mut self.started_at),
            Status::Completed => Some(&mut self.completed_at),
            Status::Paid => Some(&mut self.paid_at),
            Status::Archived => Some(&mut self.archived_at),
        }
    }
}

/// Input for creating a work item.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub tenant_id: TenantId,
    pub kind: RecordKind,
    pub lead_id: Option<WorkItemId>,
    pub customer: CustomerRef,
    pub initial_status: Status,
    pub discount_amount: Money,
    /// Falls back to the configured default rate when `None`.
    pub tax_rate: Option<TaxRate>,
    pub metadata: Map<String, Value>,
}

impl NewWorkItem {
    pub fn lead(tenant_id: TenantId, customer: CustomerRef) -> Self {
        Self {
            tenant_id,
            kind: RecordKind::Lead,
            lead_id: None,
            customer,
            initial_status: Status::Lead,
            discount_amount: Money::ZERO,
            tax_rate: None,
            metadata: Map::new(),
        }
    }

    pub fn quote(tenant_id: TenantId, customer: CustomerRef) -> Self {
        Self {
            kind: RecordKind::Quote,
            initial_status: Status::Draft,
            ..Self::lead(tenant_id, customer)
        }
    }

    pub fn from_lead(mut self, lead_id: WorkItemId) -> Self {
        self.lead_id = Some(lead_id);
        self
    }

    pub fn in_status(mut self, status: Status) -> Self {
        self.initial_status = status;
        self
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount_amount = discount;
        self
    }

    pub fn with_tax_rate(mut self, rate: TaxRate) -> Self {
        self.tax_rate = Some(rate);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub tenant_id: TenantId,
    pub kind: RecordKind,
    pub lead_id: Option<WorkItemId>,
    pub customer: CustomerRef,
    pub(crate) status: Status,
    pub(crate) subtotal: Money,
    pub(crate) discount_amount: Money,
    pub(crate) tax_rate: TaxRate,
    pub(crate) tax_amount: Money,
    pub(crate) timestamps: LifecycleTimestamps,
    pub(crate) archived_reason: Option<String>,
    pub(crate) invoice_number: Option<InvoiceNumber>,
    pub metadata: Map<String, Value>,
    pub(crate) version: u64,
    pub created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Build a fresh record. Entry-state rules are enforced by the state
    /// machine before this is called; field-level validation happens here.
    pub fn new(
        input: NewWorkItem,
        default_tax_rate: TaxRate,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if input.customer.name.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                field: "customer.name",
                reason: "must not be blank".to_string(),
            });
        }
        if input.discount_amount.is_negative() {
            return Err(ValidationError::InvalidField {
                field: "discount_amount",
                reason: "must not be negative".to_string(),
            });
        }
        if input.kind == RecordKind::Lead && input.lead_id.is_some() {
            return Err(ValidationError::InvalidField {
                field: "lead_id",
                reason: "a lead cannot reference another lead".to_string(),
            });
        }

        let tax_rate = input.tax_rate.unwrap_or(default_tax_rate);
        let totals = Totals::compute(Money::ZERO, input.discount_amount, tax_rate)?;
        let mut timestamps = LifecycleTimestamps::default();
        if let Some(slot) = timestamps.slot_mut(input.initial_status) {
            *slot = Some(now);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            kind: input.kind,
            lead_id: input.lead_id,
            customer: input.customer,
            status: input.initial_status,
            subtotal: totals.subtotal,
            discount_amount: totals.discount_amount,
            tax_rate: totals.tax_rate,
            tax_amount: totals.tax_amount,
            timestamps,
            archived_reason: None,
            invoice_number: None,
            metadata: input.metadata,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn timestamps(&self) -> &LifecycleTimestamps {
        &self.timestamps
    }

    pub fn archived_reason(&self) -> Option<&str> {
        self.archived_reason.as_deref()
    }

    pub fn invoice_number(&self) -> Option<InvoiceNumber> {
        self.invoice_number
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn totals(&self) -> Totals {
        Totals {
            subtotal: self.subtotal,
            discount_amount: self.discount_amount,
            tax_rate: self.tax_rate,
            tax_amount: self.tax_amount,
            total: self.total(),
        }
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn discount_amount(&self) -> Money {
        self.discount_amount
    }

    pub fn tax_rate(&self) -> TaxRate {
        self.tax_rate
    }

    pub fn tax_amount(&self) -> Money {
        self.tax_amount
    }

    pub fn total(&self) -> Money {
        self.subtotal - self.discount_amount + self.tax_amount
    }

    pub fn queue(&self) -> Queue {
        Queue::of(self.status)
    }

    /// A lead has been quoted once it left the `lead` state.
    pub fn has_been_quoted(&self) -> bool {
        self.timestamps.quoted_at.is_some()
    }

    /// Replace the subtotal and recompute tax so `total` stays consistent.
    /// Leaves the record untouched when the new total would overflow.
    pub(crate) fn set_subtotal(&mut self, subtotal: Money) -> Result<(), ValidationError> {
        let totals = Totals::compute(subtotal, self.discount_amount, self.tax_rate)?;
        self.subtotal = totals.subtotal;
        self.tax_amount = totals.tax_amount;
        Ok(())
    }

    pub(crate) fn set_tax_rate(&mut self, rate: TaxRate) -> Result<(), ValidationError> {
        let totals = Totals::compute(self.subtotal, self.discount_amount, rate)?;
        self.tax_rate = totals.tax_rate;
        self.tax_amount = totals.tax_amount;
        Ok(())
    }

    /// Assign the invoice number if none is set. Returns whether it changed.
    pub(crate) fn assign_invoice(&mut self, number: InvoiceNumber) -> bool {
        if self.invoice_number.is_some() {
            return false;
        }
        self.invoice_number = Some(number);
        true
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>, version: u64) {
        self.updated_at = now;
        self.version = version;
    }

    /// Check the record-level invariants. Stores call this before every write.
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        let expected = Totals::compute(self.subtotal, self.discount_amount, self.tax_rate)?;
        if self.tax_amount != expected.tax_amount {
            return Err(ValidationError::Invariant(format!(
                "tax_amount {} does not match {} on {}",
                self.tax_amount,
                self.tax_rate,
                expected.pre_tax()
            )));
        }

        let archived = self.status == Status::Archived;
        if archived != self.timestamps.archived_at.is_some() {
            return Err(ValidationError::Invariant(
                "archived_at must be set exactly when status is archived".to_string(),
            ));
        }
        if self.timestamps.archived_at.is_some() != self.archived_reason.is_some() {
            return Err(ValidationError::Invariant(
                "archived_reason must accompany archived_at".to_string(),
            ));
        }

        if self.invoice_number.is_some() != self.timestamps.completed_at.is_some() {
            return Err(ValidationError::Invariant(
                "invoice_number must be set exactly when completed_at is set".to_string(),
            ));
        }

        if self.timestamps.scheduled_at.is_some() {
            let reached = match self.status {
                Status::Archived => true,
                other => other >= Status::Scheduled,
            };
            if !reached {
                return Err(ValidationError::Invariant(format!(
                    "scheduled_at set while status is {}",
                    self.status
                )));
            }
        }

        if self.kind == RecordKind::Lead && !matches!(self.status, Status::Lead | Status::Draft | Status::Archived) {
            return Err(ValidationError::Invariant(format!(
                "a lead cannot be {}",
                self.status
            )));
        }

        Ok(())
    }

    /// Check that `self` is a legal successor of the stored `previous`:
    /// identity fields are fixed, timestamps are set once, the invoice
    /// number never changes once assigned.
    pub fn check_update_from(&self, previous: &WorkItem) -> Result<(), ValidationError> {
        if self.id != previous.id
            || self.tenant_id != previous.tenant_id
            || self.kind != previous.kind
            || self.lead_id != previous.lead_id
            || self.created_at != previous.created_at
        {
            return Err(ValidationError::Invariant(
                "identity fields of a work item cannot change".to_string(),
            ));
        }

        for status in Status::ALL {
            if let Some(before) = previous.timestamps.stamp_for(status) {
                if self.timestamps.stamp_for(status) != Some(before) {
                    return Err(ValidationError::Invariant(format!(
                        "timestamp for {status} was already set"
                    )));
                }
            }
        }

        if previous.invoice_number.is_some() && self.invoice_number != previous.invoice_number {
            return Err(ValidationError::Invariant(
                "invoice number is immutable once assigned".to_string(),
            ));
        }

        if previous.archived_reason.is_some() && self.archived_reason != previous.archived_reason {
            return Err(ValidationError::Invariant(
                "archive reason is immutable".to_string(),
            ));
        }

        Ok(())
    }
}
