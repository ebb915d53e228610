// fieldquote - work-item lifecycle and quote-synthesis core
// This exposes the core components for services, the CLI and tests

pub mod archive;
pub mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod invoicing;
pub mod lifecycle;
pub mod model;
pub mod pricing;
pub mod service;
pub mod store;
pub mod telemetry;

// Re-export key types for easy access
pub use archive::ArchiveCascade;
pub use audit::{Actor, AuditAction, AuditDiff, AuditEntry, AuditLog};
pub use config::FieldQuoteConfig;
pub use error::{CoreError, CoreResult, ErrorKind, ExternalServiceError, ValidationError};
pub use invoicing::{InvoiceFormat, InvoiceNumber, InvoiceNumberAllocator};
pub use lifecycle::{StatusStateMachine, TransitionError, TransitionOutcome, TransitionRequest};
pub use model::{LineItem, Money, NewWorkItem, Queue, RecordKind, Status, TaxRate, WorkItem};
pub use pricing::{reconcile, Catalog, CatalogPriceResolver, Proposal, RemovalPolicy};
pub use service::{QuoteService, ServiceSettings};
pub use store::{InMemoryStore, WorkItemStore};
pub use telemetry::{generate_correlation_id, init_telemetry, operation_span};

#[cfg(feature = "database")]
pub use database::SqliteStore;
