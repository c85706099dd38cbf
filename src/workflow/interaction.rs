//! Human interaction request and response types.
//!
//! A request travels through the message queue as a
//! [`QueuedEvent::UserInteractionRequest`](super::QueuedEvent) carrying a
//! one-shot responder. The side that asked keeps the matching
//! [`InteractionHandle`] and awaits it.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

use super::TaskSuggestion;

/// Sending half of a pending interaction.
pub type Responder = oneshot::Sender<Result<InteractionResponse>>;

/// What a human is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// The router has no work left; the human may supply more tasks.
    NeedMoreTasks,
    /// Newly detected issues await a yes/no before being fixed.
    ConfirmIssues,
    /// A handler offers a numbered set of options.
    Choice,
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InteractionKind::NeedMoreTasks => write!(f, "need_more_tasks"),
            InteractionKind::ConfirmIssues => write!(f, "confirm_issues"),
            InteractionKind::Choice => write!(f, "choice"),
        }
    }
}

/// The answer part of a human response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yes_no: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskSuggestion>,
}

impl InteractionResponse {
    pub fn yes() -> Self {
        Self {
            yes_no: Some(true),
            ..Default::default()
        }
    }

    pub fn no() -> Self {
        Self {
            yes_no: Some(false),
            ..Default::default()
        }
    }

    pub fn choice(choice: i64) -> Self {
        Self {
            choice: Some(choice),
            ..Default::default()
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskSuggestion>) -> Self {
        self.tasks = tasks;
        self
    }

    /// A response must carry a choice or a yes/no answer.
    pub fn is_valid(&self) -> bool {
        self.choice.is_some() || self.yes_no.is_some()
    }

    pub fn is_confirmed(&self) -> bool {
        self.yes_no == Some(true)
    }
}

/// Envelope of the `data` field in a human response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    pub response: InteractionResponse,
}

/// A human response as delivered by the UI:
/// `{ "id": ..., "data": { "response": { "choice"?, "yesNo"?, "tasks"? } } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanResponse {
    pub id: String,
    pub data: ResponseData,
}

impl HumanResponse {
    pub fn new(id: impl Into<String>, response: InteractionResponse) -> Self {
        Self {
            id: id.into(),
            data: ResponseData { response },
        }
    }
}

/// A request for human input, in flight through the queue.
#[derive(Debug)]
pub struct InteractionRequest {
    pub id: String,
    pub kind: InteractionKind,
    pub message: String,
    pub responder: Responder,
}

impl InteractionRequest {
    /// Create a request and the handle that will observe its answer.
    pub fn new(
        id: impl Into<String>,
        kind: InteractionKind,
        message: impl Into<String>,
    ) -> (Self, InteractionHandle) {
        let id = id.into();
        let (responder, rx) = oneshot::channel();
        (
            Self {
                id: id.clone(),
                kind,
                message: message.into(),
                responder,
            },
            InteractionHandle { id, rx },
        )
    }
}

/// Receiving half of an interaction request.
#[derive(Debug)]
pub struct InteractionHandle {
    id: String,
    rx: oneshot::Receiver<Result<InteractionResponse>>,
}

impl InteractionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait until the interaction is resolved or rejected.
    ///
    /// A request dropped before being answered (for example because its
    /// session was torn down) yields [`Error::InteractionCancelled`].
    pub async fn wait(self) -> Result<InteractionResponse> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::InteractionCancelled(self.id)),
        }
    }

    /// Take the outcome if it has already been delivered.
    pub fn try_take(&mut self) -> Option<Result<InteractionResponse>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(Error::InteractionCancelled(self.id.clone())))
            }
        }
    }
}
