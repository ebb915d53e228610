//! Per-tenant invoice numbering
//!
//! Numbers are plain integers from a gapless per-tenant sequence. The
//! human-facing label (`INV-2025-0001`) is rendered from the number and the
//! completion year and is never stored.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::model::{TenantId, WorkItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceNumber(u64);

impl InvoiceNumber {
    pub const fn new(value: u64) -> Self {
        InvoiceNumber(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How invoice numbers are rendered for customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceFormat {
    pub prefix: String,
    pub width: usize,
}

impl Default for InvoiceFormat {
    fn default() -> Self {
        Self {
            prefix: "INV".to_string(),
            width: 4,
        }
    }
}

impl InvoiceFormat {
    pub fn label(&self, number: InvoiceNumber, year: i32) -> String {
        format!(
            "{}-{}-{:0width$}",
            self.prefix,
            year,
            number.get(),
            width = self.width
        )
    }

    /// Label for a completed work item, `None` until it has a number.
    pub fn label_for(&self, item: &WorkItem) -> Option<String> {
        let number = item.invoice_number()?;
        let completed = item.timestamps().completed_at?;
        Some(self.label(number, completed.year()))
    }
}

/// In-process sequence source used by the in-memory store.
///
/// `reserve` hands out the next number of a tenant's sequence. Callers must
/// only reserve once the surrounding commit is certain to succeed; a reserved
/// number is never handed out again.
#[derive(Debug, Default)]
pub struct InvoiceNumberAllocator {
    counters: Mutex<HashMap<TenantId, u64>>,
}

impl InvoiceNumberAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self, tenant_id: TenantId) -> InvoiceNumber {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let next = counters.entry(tenant_id).or_insert(0);
        *next += 1;
        InvoiceNumber(*next)
    }

    /// The number `reserve` would return next, without consuming it.
    pub fn peek_next(&self, tenant_id: TenantId) -> InvoiceNumber {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        InvoiceNumber(counters.get(&tenant_id).copied().unwrap_or(0) + 1)
    }

    pub fn last_issued(&self, tenant_id: TenantId) -> Option<InvoiceNumber> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.get(&tenant_id).copied().map(InvoiceNumber)
    }
}
