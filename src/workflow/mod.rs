//! Data model for remediation sessions.
//!
//! This module provides the task and assignment types the router works on,
//! the events a running workflow emits, and the interaction request/response
//! types that let a human gate individual steps.

mod events;
mod interaction;
mod types;

pub use events::{new_event_id, ChatEntry, ChatKind, QueuedEvent, UiEvent};
pub use interaction::{
    HumanResponse, InteractionHandle, InteractionKind, InteractionRequest, InteractionResponse,
    Responder, ResponseData,
};
pub use types::{
    group_tasks, DetectedIssue, IssueBatch, NominatedAssignment, SessionId, SessionStatus, Task,
    TaskSuggestion,
};
