// Status transitions for work items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::model::{RecordKind, Status, WorkItem};

/// Why a transition was refused. Each variant maps to a distinct
/// [`crate::error::CoreError`] kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{to} is not reachable from {from}")]
    Illegal { from: Status, to: Status },

    #[error("{status} is terminal")]
    Terminal { status: Status },

    #[error(transparent)]
    Guard(#[from] ValidationError),
}

/// A requested move to `target`, with the data some guards need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub target: Status,
    /// Appointment time, required when scheduling.
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Required when archiving.
    #[serde(default)]
    pub reason: Option<String>,
}

impl TransitionRequest {
    pub fn to(target: Status) -> Self {
        Self {
            target,
            scheduled_for: None,
            reason: None,
        }
    }

    pub fn schedule(at: DateTime<Utc>) -> Self {
        Self {
            scheduled_for: Some(at),
            ..Self::to(Status::Scheduled)
        }
    }

    pub fn archive(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::to(Status::Archived)
        }
    }
}

/// Facts about the world a transition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub now: DateTime<Utc>,
    pub line_item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The returned record carries the new status and its timestamp.
    Applied {
        work_item: WorkItem,
        from: Status,
        to: Status,
    },
    /// The transition had already happened; nothing to write.
    AlreadyApplied,
}

/// The only code that writes `WorkItem::status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusStateMachine;

impl StatusStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// The next status on the forward path for this kind of record.
    pub fn successor(kind: RecordKind, status: Status) -> Option<Status> {
        match (kind, status) {
            (RecordKind::Lead, Status::Lead) => Some(Status::Draft),
            (RecordKind::Lead, _) => None,
            (RecordKind::Quote, status) => status.successor(),
        }
    }

    /// Every status a record may move to from `status`.
    pub fn allowed_targets(kind: RecordKind, status: Status) -> Vec<Status> {
        if status.is_terminal() {
            return Vec::new();
        }
        let mut targets: Vec<Status> = Self::successor(kind, status).into_iter().collect();
        targets.push(Status::Archived);
        targets
    }

    /// Records are created in `lead` or `draft`; leads only in `lead`.
    pub fn validate_entry(kind: RecordKind, status: Status) -> Result<(), ValidationError> {
        let allowed = match kind {
            RecordKind::Lead => status == Status::Lead,
            RecordKind::Quote => status.is_entry(),
        };
        if allowed {
            Ok(())
        } else {
            Err(ValidationError::InvalidEntryStatus {
                kind: kind.as_str(),
                status,
            })
        }
    }

    /// Validate `request` against `item` and produce the updated record.
    ///
    /// The input is never modified. Retrying a transition that already
    /// happened yields [`TransitionOutcome::AlreadyApplied`].
    pub fn apply(
        &self,
        item: &WorkItem,
        request: &TransitionRequest,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, TransitionError> {
        let from = item.status();
        let to = request.target;

        if to == from {
            debug!(work_item.id = %item.id, status = %to, "Transition already applied");
            return Ok(TransitionOutcome::AlreadyApplied);
        }

        // A forward step the record already passed through, e.g. a retried
        // `completed` after the item was paid.
        if let (Some(target_pos), Some(current_pos)) = (to.position(), from.position()) {
            if target_pos < current_pos && item.timestamps().stamp_for(to).is_some() {
                return Ok(TransitionOutcome::AlreadyApplied);
            }
        }
        if from == Status::Archived && item.timestamps().stamp_for(to).is_some() {
            return Ok(TransitionOutcome::AlreadyApplied);
        }

        if from.is_terminal() {
            warn!(work_item.id = %item.id, from = %from, to = %to, "Transition from terminal state rejected");
            return Err(TransitionError::Terminal { status: from });
        }

        let reachable = to == Status::Archived || Self::successor(item.kind, from) == Some(to);
        if !reachable {
            warn!(work_item.id = %item.id, from = %from, to = %to, "Illegal transition rejected");
            return Err(TransitionError::Illegal { from, to });
        }

        if let Some(guard) = Self::failed_guard(item, request, context) {
            warn!(work_item.id = %item.id, from = %from, to = %to, guard = %guard, "Transition guard failed");
            return Err(ValidationError::GuardFailed {
                from,
                to,
                guard: guard.to_string(),
            }
            .into());
        }

        let stamp = match (to, request.scheduled_for) {
            (Status::Scheduled, Some(appointment)) => appointment,
            _ => context.now,
        };

        let mut next = item.clone();
        next.status = to;
        if let Some(slot) = next.timestamps.slot_mut(to) {
            slot.get_or_insert(stamp);
        }
        if to == Status::Archived {
            next.archived_reason = request.reason.as_ref().map(|r| r.trim().to_string());
        }

        Ok(TransitionOutcome::Applied {
            work_item: next,
            from,
            to,
        })
    }

    fn failed_guard(
        item: &WorkItem,
        request: &TransitionRequest,
        context: &TransitionContext,
    ) -> Option<Guard> {
        let stamps = item.timestamps();
        match (item.status(), request.target) {
            (_, Status::Archived) => {
                let blank = request.reason.as_deref().map_or(true, |r| r.trim().is_empty());
                blank.then_some(Guard::ArchiveReason)
            }
            (Status::Draft, Status::Sent) => {
                (context.line_item_count == 0).then_some(Guard::HasLineItems)
            }
            (Status::Sent, Status::Accepted) => stamps.sent_at.is_none().then_some(Guard::WasSent),
            (Status::Accepted, Status::Scheduled) => match request.scheduled_for {
                Some(at) if at > context.now => None,
                _ => Some(Guard::FutureAppointment),
            },
            (Status::Scheduled, Status::InProgress) => {
                stamps.scheduled_at.is_none().then_some(Guard::WasScheduled)
            }
            (Status::InProgress, Status::Completed) => {
                stamps.started_at.is_none().then_some(Guard::WasStarted)
            }
            (Status::Completed, Status::Paid) => {
                item.invoice_number().is_none().then_some(Guard::Invoiced)
            }
            _ => None,
        }
    }
}

/// Preconditions checked before a transition is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    HasLineItems,
    WasSent,
    FutureAppointment,
    WasScheduled,
    WasStarted,
    Invoiced,
    ArchiveReason,
}

impl std::fmt::Display for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Guard::HasLineItems => "the quote needs at least one line item",
            Guard::WasSent => "the quote was never sent",
            Guard::FutureAppointment => "an appointment time in the future is required",
            Guard::WasScheduled => "the job has no appointment",
            Guard::WasStarted => "the job was never started",
            Guard::Invoiced => "no invoice number has been assigned",
            Guard::ArchiveReason => "a non-blank archive reason is required",
        };
        f.write_str(text)
    }
}
