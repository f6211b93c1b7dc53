//! The Windlass agent: round loop, session state, and approval gating.
//!
//! A *round* is one model call plus the tool executions it requests. The
//! loop in [`AgentLoop`] repeats rounds until the model answers with
//! plain text, emitting [`AgentEvent`]s for display layers along the way.

mod approval;
mod event;
mod loop_runner;
mod session;

pub use approval::{ApprovalGate, ApprovalRequest, Verdict};
pub use event::AgentEvent;
pub use loop_runner::AgentLoop;
pub use session::{
    CancelHandle, RoundPhase, Session, SessionId, SessionRegistry, SessionSnapshot,
};
