// Lifecycle status and the queues derived from it

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a work item.
///
/// The forward path is `Lead → Draft → Sent → Accepted → Scheduled →
/// InProgress → Completed → Paid`. `Archived` branches off any non-terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Lead,
    Draft,
    Sent,
    Accepted,
    Scheduled,
    InProgress,
    Completed,
    Paid,
    Archived,
}

pub const FORWARD_PATH: [Status; 8] = [
    Status::Lead,
    Status::Draft,
    Status::Sent,
    Status::Accepted,
    Status::Scheduled,
    Status::InProgress,
    Status::Completed,
    Status::Paid,
];

impl Status {
    pub const ALL: [Status; 9] = [
        Status::Lead,
        Status::Draft,
        Status::Sent,
        Status::Accepted,
        Status::Scheduled,
        Status::InProgress,
        Status::Completed,
        Status::Paid,
        Status::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Lead => "lead",
            Status::Draft => "draft",
            Status::Sent => "sent",
            Status::Accepted => "accepted",
            Status::Scheduled => "scheduled",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Paid => "paid",
            Status::Archived => "archived",
        }
    }

    /// Index on the forward path; `None` for `Archived`.
    pub fn position(self) -> Option<usize> {
        FORWARD_PATH.iter().position(|s| *s == self)
    }

    /// Next status on the forward path.
    pub fn successor(self) -> Option<Status> {
        self.position().and_then(|i| FORWARD_PATH.get(i + 1).copied())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Paid | Status::Archived)
    }

    /// States a record may be created in.
    pub fn is_entry(self) -> bool {
        matches!(self, Status::Lead | Status::Draft)
    }

    /// Line items may only be changed before the customer has accepted.
    pub fn allows_item_edits(self) -> bool {
        matches!(self, Status::Lead | Status::Draft | Status::Sent)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Work queues shown to contractors. Every status maps to exactly one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    /// Inquiries that have not been quoted
    Leads,
    /// Quotes being prepared or waiting on the customer
    Quotes,
    /// Accepted work without an appointment
    ToSchedule,
    /// Scheduled or running jobs
    Jobs,
    /// Finished work waiting on payment
    AwaitingPayment,
    Closed,
}

impl Queue {
    pub const ALL: [Queue; 6] = [
        Queue::Leads,
        Queue::Quotes,
        Queue::ToSchedule,
        Queue::Jobs,
        Queue::AwaitingPayment,
        Queue::Closed,
    ];

    pub fn of(status: Status) -> Queue {
        match status {
            Status::Lead => Queue::Leads,
            Status::Draft | Status::Sent => Queue::Quotes,
            Status::Accepted => Queue::ToSchedule,
            Status::Scheduled | Status::InProgress => Queue::Jobs,
            Status::Completed => Queue::AwaitingPayment,
            Status::Paid | Status::Archived => Queue::Closed,
        }
    }

    pub fn contains(self, status: Status) -> bool {
        Queue::of(status) == self
    }
}
