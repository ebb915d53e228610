//! Work item lifecycle: status transitions and signature events

pub mod signature;
pub mod state_machine;

pub use signature::{SignatureEvent, SignatureEventKind};
pub use state_machine::{
    Guard, StatusStateMachine, TransitionContext, TransitionError, TransitionOutcome,
    TransitionRequest,
};
