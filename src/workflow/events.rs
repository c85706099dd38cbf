//! Events produced by a running workflow and the UI events derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{InteractionKind, InteractionRequest, SessionId, SessionStatus};

/// Generate a fresh event id.
pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// An event emitted by the running workflow and consumed by the drain loop.
#[derive(Debug)]
pub enum QueuedEvent {
    /// A streamed fragment of a model reply.
    LlmChunk { id: String, content: String },
    /// A complete model reply.
    FullResponse { id: String, content: String },
    /// A file the handler rewrote.
    ModifiedFile {
        id: String,
        path: String,
        content: String,
    },
    /// A tool call requested by the model.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// A request that suspends the queue until a human answers.
    UserInteractionRequest(InteractionRequest),
    /// A non-fatal error reported by the workflow.
    Error { id: String, message: String },
}

impl QueuedEvent {
    pub fn id(&self) -> &str {
        match self {
            QueuedEvent::LlmChunk { id, .. }
            | QueuedEvent::FullResponse { id, .. }
            | QueuedEvent::ModifiedFile { id, .. }
            | QueuedEvent::ToolCall { id, .. }
            | QueuedEvent::Error { id, .. } => id,
            QueuedEvent::UserInteractionRequest(request) => &request.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueuedEvent::LlmChunk { .. } => "llm_chunk",
            QueuedEvent::FullResponse { .. } => "full_response",
            QueuedEvent::ModifiedFile { .. } => "modified_file",
            QueuedEvent::ToolCall { .. } => "tool_call",
            QueuedEvent::UserInteractionRequest(_) => "user_interaction_request",
            QueuedEvent::Error { .. } => "error",
        }
    }

    pub fn full_response(content: impl Into<String>) -> Self {
        QueuedEvent::FullResponse {
            id: new_event_id(),
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        QueuedEvent::Error {
            id: new_event_id(),
            message: message.into(),
        }
    }
}

/// Kind of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Agent,
    Tool,
    Interaction,
    Error,
    System,
}

/// One line of the visible chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: String,
    pub kind: ChatKind,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(id: impl Into<String>, kind: ChatKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

/// Outward-facing events for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    SessionStarted {
        session_id: SessionId,
        tasks: usize,
    },
    /// A transcript entry was added or grown.
    Transcript { entry: ChatEntry },
    FileModified {
        path: String,
        content: String,
    },
    InteractionRequested {
        id: String,
        kind: InteractionKind,
        message: String,
    },
    /// A batch of newly detected issues was answered.
    IssuesConfirmed { accepted: bool, count: usize },
    SessionEnded {
        session_id: SessionId,
        status: SessionStatus,
    },
}
