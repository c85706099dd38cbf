//! Orchestration layer for remediation sessions.
//!
//! The [`Orchestrator`] runs one [`Session`] at a time. A session drives a
//! [`TaskRouter`], which asks the [`Planner`] to nominate handlers for each
//! task and dispatches them. Handler output flows through the
//! [`WorkflowEmitter`] into the session's [`MessageQueue`]; events that need
//! a human answer park in the [`InteractionGateway`] until resolved.

mod claude;
mod controller;
mod emitter;
mod gateway;
mod handler;
mod planner;
mod queue;
mod router;
mod session;

pub use claude::HeadlessModel;
pub use controller::{Orchestrator, OrchestratorBuilder, SessionOutcome};
pub use emitter::{WorkflowEmitter, WorkflowListener};
pub use gateway::{BatchOffer, InteractionGateway, IssueBatcher, PendingInteraction, SettledBatch};
pub use handler::{
    extract_section, FixHandler, GeneralFixer, HandlerFactory, HandlerInfo, HandlerInputs,
    HandlerOutcome, HandlerRegistry, COMPLETION_SENTINEL, FOLLOW_UP_HEADING,
};
pub use planner::{parse_nominations, Planner};
pub use queue::{MessageQueue, QueueConsumer};
pub use router::{RouterOptions, RunInput, StepOutcome, TaskRouter, NEED_MORE_TASKS_MESSAGE};
pub use session::{Session, SessionFlags, TaskInbox, Transcript};
