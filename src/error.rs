// Error types shared across the quoting core

use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::TransitionError;
use crate::model::{ItemKey, Money, Status};

/// Input or guard failures. Never retried; the caller must fix the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("quantity for '{item}' must be a positive integer, got {quantity}")]
    InvalidQuantity { item: String, quantity: String },

    #[error("unit price for '{item}' is not a valid amount: {price}")]
    InvalidPrice { item: String, price: String },

    #[error("line item name must contain letters or digits")]
    EmptyItemName,

    #[error("'{0}' appears more than once in the proposal")]
    DuplicateItem(ItemKey),

    #[error("price {proposed} for '{item}' is outside {tolerance_bps} bps of catalog price {catalog}")]
    PriceOutOfTolerance {
        item: String,
        proposed: Money,
        catalog: Money,
        tolerance_bps: u32,
    },

    #[error("'{0}' is not in the catalog")]
    NotInCatalog(String),

    #[error("discount line '{0}' must have a negative unit price")]
    DiscountNotNegative(String),

    #[error("cannot move from {from} to {to}: {guard}")]
    GuardFailed {
        from: Status,
        to: Status,
        guard: String,
    },

    #[error("line items cannot be changed once a quote is {0}")]
    QuoteLocked(Status),

    #[error("a {kind} cannot be created in {status}")]
    InvalidEntryStatus { kind: &'static str, status: Status },

    #[error("invoice numbers are assigned at completion; work item is {0}")]
    InvoiceBeforeCompletion(Status),

    #[error("malformed proposal: {0}")]
    MalformedProposal(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("amounts overflow the supported range")]
    AmountOverflow,

    #[error("pre-tax amount would be negative ({0})")]
    NegativeTotal(Money),

    #[error("{field} {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A collaborator outside this crate failed (dispatch, proposal source, catalog).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{service} failed: {message}")]
pub struct ExternalServiceError {
    pub service: String,
    pub message: String,
}

impl ExternalServiceError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// One dependent that could not be archived during a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeFailure {
    pub id: Uuid,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("concurrent update to {id}: expected version {expected}, found {found}")]
    Conflict { id: Uuid, expected: u64, found: u64 },

    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: Status, to: Status },

    #[error("work item is {status}, which is terminal")]
    TerminalState { status: Status },

    #[error("archive cascade archived {} record(s) but {} failed", archived.len(), failed.len())]
    PartialCascadeFailure {
        archived: Vec<Uuid>,
        failed: Vec<CascadeFailure>,
    },

    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),

    #[error("storage error: {0}")]
    Storage(String),

    /// The backing database stayed locked by another writer past its timeout.
    #[error("storage busy: {0}")]
    StorageBusy(String),
}

/// Coarse classification used for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    IllegalTransition,
    TerminalState,
    PartialCascadeFailure,
    ExternalService,
    Storage,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::Conflict { .. } => ErrorKind::Conflict,
            CoreError::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            CoreError::TerminalState { .. } => ErrorKind::TerminalState,
            CoreError::PartialCascadeFailure { .. } => ErrorKind::PartialCascadeFailure,
            CoreError::ExternalService(_) => ErrorKind::ExternalService,
            CoreError::Storage(_) => ErrorKind::Storage,
            CoreError::StorageBusy(_) => ErrorKind::Conflict,
        }
    }

    /// Only write contention is retried automatically: a lost
    /// optimistic-concurrency race or a database lock timeout.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Conflict { .. } | CoreError::StorageBusy(_))
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        CoreError::NotFound { entity, id }
    }
}

impl From<TransitionError> for CoreError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Illegal { from, to } => CoreError::IllegalTransition { from, to },
            TransitionError::Terminal { status } => CoreError::TerminalState { status },
            TransitionError::Guard(validation) => CoreError::Validation(validation),
        }
    }
}

// SQLITE_BUSY and SQLITE_LOCKED; extended codes keep the primary code in the low byte.
#[cfg(feature = "database")]
const SQLITE_CONTENTION_CODES: [i32; 2] = [5, 6];

#[cfg(feature = "database")]
impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        let contended = match &err {
            sqlx::Error::Database(db) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| SQLITE_CONTENTION_CODES.contains(&(code & 0xff))),
            sqlx::Error::PoolTimedOut => true,
            _ => false,
        };
        if contended {
            CoreError::StorageBusy(err.to_string())
        } else {
            CoreError::Storage(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Storage(format!("serialization: {err}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
