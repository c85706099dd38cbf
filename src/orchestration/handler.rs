//! Fix handlers.
//!
//! A handler is a specialized remediation routine the router dispatches with
//! a nominated assignment. Handlers talk to the model, report what they did
//! through the workflow emitter, and may leave follow-up notes that become
//! extra context for the next planning round.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::error::{Error, Result};
use crate::model::{ChatMessage, InvokeOptions, ModelProvider};
use crate::workflow::{new_event_id, QueuedEvent};
use crate::{mlog_debug, mlog_warn};

use super::emitter::WorkflowEmitter;

/// Marker the model prints once a handler's work is done.
pub const COMPLETION_SENTINEL: &str = "TASK COMPLETE";

/// Heading of the reply section carried forward as follow-up notes.
pub const FOLLOW_UP_HEADING: &str = "Additional Information";

/// Inputs handed to a handler before it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerInputs {
    pub instructions: String,
    /// Task file relative to the workspace root, if the task has one.
    pub uri: Option<String>,
    pub files: Vec<String>,
}

/// What a handler run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// The model's reply, verbatim.
    pub reply: String,
    pub follow_up: Option<String>,
}

impl HandlerOutcome {
    pub fn is_complete(&self) -> bool {
        self.reply.contains(COMPLETION_SENTINEL)
    }
}

#[async_trait]
pub trait FixHandler: Send + Sync {
    /// Name the planner uses to nominate this handler.
    fn name(&self) -> &str;

    /// One-line description shown to the planner.
    fn description(&self) -> &str;

    fn set_inputs(&mut self, inputs: HandlerInputs);

    async fn execute(&mut self, emitter: &WorkflowEmitter) -> Result<HandlerOutcome>;

    /// Drop transient inputs and this turn's conversation.
    fn reset(&mut self);
}

/// Name and description of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    pub name: String,
    pub description: String,
}

/// The handlers available to one router.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn FixHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock roster: the general-purpose fixer.
    pub fn defaults(model: Arc<dyn ModelProvider>) -> Self {
        Self::new().with(Box::new(GeneralFixer::new(model)))
    }

    pub fn with(mut self, handler: Box<dyn FixHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Add a handler, replacing any handler registered under the same name.
    pub fn register(&mut self, handler: Box<dyn FixHandler>) {
        self.handlers
            .retain(|h| !h.name().eq_ignore_ascii_case(handler.name()));
        self.handlers.push(handler);
    }

    /// Look up a handler by name, ignoring case and surrounding whitespace.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn FixHandler>> {
        let name = name.trim();
        self.handlers
            .iter_mut()
            .find(|h| h.name().eq_ignore_ascii_case(name))
    }

    pub fn roster(&self) -> Vec<HandlerInfo> {
        self.handlers
            .iter()
            .map(|h| HandlerInfo {
                name: h.name().to_string(),
                description: h.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("HandlerRegistry").field("handlers", &names).finish()
    }
}

/// Builds a session's handler roster around its model.
pub type HandlerFactory = Arc<dyn Fn(Arc<dyn ModelProvider>) -> HandlerRegistry + Send + Sync>;

/// A markdown heading (`## Title`) or a bold line (`**Title:**`).
static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#+\s*|\*\*)([^*#:]+?)\s*:?\s*(?:\*\*)?\s*:?\s*$").unwrap()
});

/// Extract the body of the reply section headed `heading`.
///
/// The section runs until the next markdown heading. Returns `None` if the
/// section is missing or blank.
pub fn extract_section(text: &str, heading: &str) -> Option<String> {
    let mut body: Option<Vec<&str>> = None;
    for line in text.lines() {
        if let Some(caps) = SECTION_HEADING.captures(line) {
            let title = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            if body.is_some() {
                break;
            }
            if title.eq_ignore_ascii_case(heading) {
                body = Some(Vec::new());
            }
            continue;
        }
        if let Some(lines) = body.as_mut() {
            lines.push(line);
        }
    }

    let joined = body?.join("\n");
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

const GENERAL_SYSTEM_PROMPT: &str = "You are a software engineer fixing issues in a codebase \
that is being migrated.

- Address only what the notes ask for. Do not refactor unrelated code.
- Changes already made to the workspace are correct. Build on them, do not revert them.
- Work through the affected files one file at a time.
- Use the write_file or edit_file tools to change files.
- If you learn something the next planning round should know, put it under a heading named \
\"Additional Information\".
- When all requested changes are made, reply with TASK COMPLETE.";

/// General-purpose fixer driven directly by the model.
pub struct GeneralFixer {
    model: Arc<dyn ModelProvider>,
    inputs: Option<HandlerInputs>,
    conversation: Vec<ChatMessage>,
}

impl GeneralFixer {
    pub const NAME: &'static str = "general";

    pub fn new(model: Arc<dyn ModelProvider>) -> Self {
        Self {
            model,
            inputs: None,
            conversation: Vec::new(),
        }
    }

    pub fn conversation(&self) -> &[ChatMessage] {
        &self.conversation
    }

    fn seed(&mut self, inputs: &HandlerInputs) {
        let mut request = inputs.instructions.trim().to_string();

        let mut files: Vec<&str> = inputs.files.iter().map(String::as_str).collect();
        if let Some(uri) = inputs.uri.as_deref() {
            if !files.contains(&uri) {
                files.insert(0, uri);
            }
        }
        if !files.is_empty() {
            request.push_str("\n\nAffected files:");
            for file in files {
                request.push_str("\n- ");
                request.push_str(file);
            }
        }

        self.conversation.push(ChatMessage::system(GENERAL_SYSTEM_PROMPT));
        self.conversation.push(ChatMessage::human(request));
    }
}

/// Pull `(path, content)` out of a file-writing tool call.
fn written_file(name: &str, arguments: &serde_json::Value) -> Option<(String, String)> {
    if !matches!(name, "write_file" | "edit_file") {
        return None;
    }
    let path = arguments.get("path")?.as_str()?;
    let content = arguments.get("content")?.as_str()?;
    Some((path.to_string(), content.to_string()))
}

#[async_trait]
impl FixHandler for GeneralFixer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "General-purpose fixer for source and build files; edits files directly"
    }

    fn set_inputs(&mut self, inputs: HandlerInputs) {
        self.inputs = Some(inputs);
    }

    async fn execute(&mut self, emitter: &WorkflowEmitter) -> Result<HandlerOutcome> {
        let inputs = self.inputs.clone().ok_or_else(|| Error::Handler {
            name: Self::NAME.to_string(),
            message: "executed without inputs".to_string(),
        })?;
        if self.conversation.is_empty() {
            self.seed(&inputs);
        }

        let reply = self
            .model
            .invoke(&self.conversation, InvokeOptions::with_tools())
            .await?;
        self.conversation.push(ChatMessage::assistant(reply.content.clone()));

        emitter.emit(QueuedEvent::FullResponse {
            id: new_event_id(),
            content: reply.content.clone(),
        });
        for call in &reply.tool_calls {
            let id = if call.id.is_empty() {
                new_event_id()
            } else {
                call.id.clone()
            };
            emitter.emit(QueuedEvent::ToolCall {
                id,
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            match written_file(&call.name, &call.arguments) {
                Some((path, content)) => {
                    emitter.emit(QueuedEvent::ModifiedFile {
                        id: new_event_id(),
                        path,
                        content,
                    });
                }
                None if matches!(call.name.as_str(), "write_file" | "edit_file") => {
                    mlog_warn!("[general] {} call without path/content arguments", call.name);
                }
                None => {}
            }
        }

        let outcome = HandlerOutcome {
            follow_up: extract_section(&reply.content, FOLLOW_UP_HEADING),
            reply: reply.content,
        };
        mlog_debug!(
            "[general] turn done: {} tool calls, complete={}, follow_up={}",
            reply.tool_calls.len(),
            outcome.is_complete(),
            outcome.follow_up.is_some()
        );
        Ok(outcome)
    }

    fn reset(&mut self) {
        self.inputs = None;
        self.conversation.clear();
    }
}
