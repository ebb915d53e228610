//! Append-only audit trail
//!
//! Every successful mutation of a work item writes exactly one entry, in the
//! same commit as the mutation. Within an entity, `sequence` is gapless and
//! strictly increasing; `tenant_sequence` orders entries across a tenant's
//! entities when timestamps tie.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::model::{Money, Status, TenantId, WorkItemId};
use crate::pricing::ItemDiff;

/// Who caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Actor {
    User(Uuid),
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "{id}"),
            Actor::System => f.write_str("system"),
        }
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        actor.to_string()
    }
}

impl FromStr for Actor {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("system") {
            Ok(Actor::System)
        } else {
            Uuid::parse_str(s).map(Actor::User)
        }
    }
}

impl TryFrom<String> for Actor {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    ItemsReconciled,
    StatusChanged,
    Viewed,
    InvoiceAssigned,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::ItemsReconciled => "items_reconciled",
            AuditAction::StatusChanged => "status_changed",
            AuditAction::Viewed => "viewed",
            AuditAction::InvoiceAssigned => "invoice_assigned",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(AuditAction::Created),
            "items_reconciled" => Ok(AuditAction::ItemsReconciled),
            "status_changed" => Ok(AuditAction::StatusChanged),
            "viewed" => Ok(AuditAction::Viewed),
            "invoice_assigned" => Ok(AuditAction::InvoiceAssigned),
            other => Err(format!("unknown audit action '{other}'")),
        }
    }
}

/// Structured description of what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_total: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_total: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<Status>,
    /// Instruction that produced an AI proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// What the model said it changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl AuditDiff {
    pub fn status(from: Status, to: Status) -> Self {
        Self {
            previous_status: Some(from),
            new_status: Some(to),
            ..Default::default()
        }
    }

    pub fn items(diff: &ItemDiff, previous_total: Money, new_total: Money) -> Self {
        Self {
            added: diff.added.clone(),
            removed: diff.removed.clone(),
            modified: diff.modified.clone(),
            previous_total: Some(previous_total),
            new_total: Some(new_total),
            ..Default::default()
        }
    }
}

/// An entry before the log numbers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub entity_id: WorkItemId,
    pub tenant_id: TenantId,
    pub action: AuditAction,
    pub actor: Actor,
    pub description: String,
    pub diff: AuditDiff,
}

impl AuditDraft {
    pub fn new(
        entity_id: WorkItemId,
        tenant_id: TenantId,
        action: AuditAction,
        actor: Actor,
        description: impl Into<String>,
    ) -> Self {
        Self {
            entity_id,
            tenant_id,
            action,
            actor,
            description: description.into(),
            diff: AuditDiff::default(),
        }
    }

    pub fn with_diff(mut self, diff: AuditDiff) -> Self {
        self.diff = diff;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_id: WorkItemId,
    pub tenant_id: TenantId,
    pub action: AuditAction,
    pub actor: Actor,
    pub description: String,
    pub diff: AuditDiff,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
    pub tenant_sequence: u64,
}

/// In-memory audit log. Callers serialize appends per entity; the log
/// itself only hands out numbers.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: HashMap<WorkItemId, Vec<AuditEntry>>,
    tenant_sequences: HashMap<TenantId, u64>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&self, entity_id: WorkItemId) -> u64 {
        self.entries
            .get(&entity_id)
            .and_then(|entries| entries.last())
            .map_or(1, |last| last.sequence + 1)
    }

    pub fn append(&mut self, draft: AuditDraft, now: DateTime<Utc>) -> AuditEntry {
        let sequence = self.next_sequence(draft.entity_id);
        let tenant_sequence = {
            let counter = self.tenant_sequences.entry(draft.tenant_id).or_insert(0);
            *counter += 1;
            *counter
        };

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            entity_id: draft.entity_id,
            tenant_id: draft.tenant_id,
            action: draft.action,
            actor: draft.actor,
            description: draft.description,
            diff: draft.diff,
            created_at: now,
            sequence,
            tenant_sequence,
        };
        self.entries
            .entry(entry.entity_id)
            .or_default()
            .push(entry.clone());
        entry
    }

    /// Entries for one entity, ordered by `sequence`.
    pub fn history(&self, entity_id: WorkItemId) -> Vec<AuditEntry> {
        self.entries.get(&entity_id).cloned().unwrap_or_default()
    }

    /// Every entry for a tenant, ordered by `tenant_sequence`.
    pub fn tenant_history(&self, tenant_id: TenantId) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = self
            .entries
            .values()
            .flatten()
            .filter(|entry| entry.tenant_id == tenant_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.tenant_sequence);
        entries
    }
}
