//! The request-handling layer

pub mod dispatch;
pub mod engine;

pub use dispatch::{
    Dispatcher, NoopDispatcher, ProposalRequest, ProposalSource, ProposalTurn, SoftFailure,
};
pub use engine::{
    ProposalInput, QuoteService, ReconcileReport, ServiceSettings, SignatureOutcome, StatusChange,
    TransitionReport,
};

#[cfg(any(test, feature = "testing"))]
pub use dispatch::{MockDispatcher, MockProposalSource};
