//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted model that replays canned planner replies
//! - Recording handlers with scripted effects
//! - A harness wrapping an orchestrator and its UI event stream

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use mender::config::Config;
use mender::model::{ChatMessage, InvokeOptions, ModelProvider, ModelReply, Role};
use mender::orchestration::{
    FixHandler, HandlerFactory, HandlerInputs, HandlerOutcome, HandlerRegistry, Orchestrator,
    WorkflowEmitter,
};
use mender::workflow::{new_event_id, DetectedIssue, IssueBatch, QueuedEvent, UiEvent};
use mender::{Error, Result};

/// Workspace root every harness runs against.
pub const WORKSPACE: &str = "/ws";

/// How long any single wait in a test may take.
pub const WAIT: Duration = Duration::from_secs(5);

/// Model that returns queued replies in order, then empty replies.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(Vec<ChatMessage>, InvokeOptions)>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn options(&self) -> Vec<InvokeOptions> {
        self.calls.lock().unwrap().iter().map(|(_, o)| *o).collect()
    }

    /// The human message of every call, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(messages, _)| {
                messages
                    .iter()
                    .filter(|m| m.role == Role::Human)
                    .map(|m| m.content.clone())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, messages: &[ChatMessage], options: InvokeOptions) -> Result<ModelReply> {
        self.calls
            .lock()
            .unwrap()
            .push((messages.to_vec(), options));
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();
        Ok(ModelReply::text(reply))
    }
}

/// One scripted step of a recording handler's run.
#[derive(Clone)]
pub enum Effect {
    Respond(String),
    Modify { path: String, content: String },
    ErrorSignal(String),
    /// Park until the notify is signalled.
    Gate(Arc<Notify>),
    FollowUp(String),
    Fail(String),
}

/// Handler that records its inputs and plays back scripted effects.
#[derive(Clone)]
pub struct RecordingHandler {
    name: String,
    effects: Arc<Vec<Effect>>,
    inputs: Option<HandlerInputs>,
    pub calls: Arc<Mutex<Vec<HandlerInputs>>>,
    pub resets: Arc<Mutex<usize>>,
    /// Signalled each time `execute` starts.
    pub started: Arc<Notify>,
}

impl RecordingHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            effects: Arc::new(Vec::new()),
            inputs: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            resets: Arc::new(Mutex::new(0)),
            started: Arc::new(Notify::new()),
        }
    }

    fn effect(mut self, effect: Effect) -> Self {
        Arc::make_mut(&mut self.effects).push(effect);
        self
    }

    pub fn respond(self, text: &str) -> Self {
        self.effect(Effect::Respond(text.to_string()))
    }

    pub fn modify(self, path: &str, content: &str) -> Self {
        self.effect(Effect::Modify {
            path: path.to_string(),
            content: content.to_string(),
        })
    }

    pub fn signal_error(self, message: &str) -> Self {
        self.effect(Effect::ErrorSignal(message.to_string()))
    }

    pub fn gate(self, gate: &Arc<Notify>) -> Self {
        self.effect(Effect::Gate(gate.clone()))
    }

    pub fn follow_up(self, notes: &str) -> Self {
        self.effect(Effect::FollowUp(notes.to_string()))
    }

    pub fn fail(self, message: &str) -> Self {
        self.effect(Effect::Fail(message.to_string()))
    }

    pub fn recorded(&self) -> Vec<HandlerInputs> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_count(&self) -> usize {
        *self.resets.lock().unwrap()
    }
}

#[async_trait]
impl FixHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "records what it was asked to do"
    }

    fn set_inputs(&mut self, inputs: HandlerInputs) {
        self.inputs = Some(inputs);
    }

    async fn execute(&mut self, emitter: &WorkflowEmitter) -> Result<HandlerOutcome> {
        let inputs = self.inputs.clone().unwrap_or_default();
        self.calls.lock().unwrap().push(inputs);
        self.started.notify_one();

        let mut follow_up = None;
        let effects = self.effects.clone();
        for effect in effects.iter() {
            match effect {
                Effect::Respond(text) => {
                    emitter.emit(QueuedEvent::full_response(text.clone()));
                }
                Effect::Modify { path, content } => {
                    emitter.emit(QueuedEvent::ModifiedFile {
                        id: new_event_id(),
                        path: path.clone(),
                        content: content.clone(),
                    });
                }
                Effect::ErrorSignal(message) => {
                    emitter.emit_error(&Error::Model(message.clone()));
                }
                Effect::Gate(gate) => gate.notified().await,
                Effect::FollowUp(notes) => follow_up = Some(notes.clone()),
                Effect::Fail(message) => {
                    return Err(Error::Handler {
                        name: self.name.clone(),
                        message: message.clone(),
                    })
                }
            }
        }

        Ok(HandlerOutcome {
            reply: "done".to_string(),
            follow_up,
        })
    }

    fn reset(&mut self) {
        self.inputs = None;
        *self.resets.lock().unwrap() += 1;
    }
}

/// Config with a fast drain loop.
pub fn fast_config(interactive: bool) -> Config {
    Config {
        interactive,
        drain_interval_ms: 5,
        ..Config::default()
    }
}

/// A batch with one issue per `(path, message)` pair, paths under the workspace.
pub fn batch(issues: &[(&str, &str)]) -> IssueBatch {
    IssueBatch::new(
        "jakarta",
        issues
            .iter()
            .map(|(path, message)| DetectedIssue::new(format!("file://{}/{}", WORKSPACE, path), *message))
            .collect(),
    )
}

/// Planner reply nominating `(handler, instructions)` pairs in order.
pub fn nominate(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(name, instructions)| format!("* Name\n{}\n* Instructions\n{}", name, instructions))
        .collect::<Vec<_>>()
        .join("\n")
}

/// An orchestrator wired to a scripted model and recording handlers.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub model: Arc<ScriptedModel>,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    /// Every UI event received so far.
    pub seen: Vec<UiEvent>,
}

impl Harness {
    pub fn new(config: Config, model: Arc<ScriptedModel>, handlers: Vec<RecordingHandler>) -> Self {
        let factory: HandlerFactory = Arc::new(move |_model: Arc<dyn ModelProvider>| {
            let mut registry = HandlerRegistry::new();
            for handler in &handlers {
                registry.register(Box::new(handler.clone()));
            }
            registry
        });
        let (orchestrator, ui_rx) = Orchestrator::builder(config, WORKSPACE)
            .model(model.clone())
            .handlers(factory)
            .build();
        Self {
            orchestrator,
            model,
            ui_rx,
            seen: Vec::new(),
        }
    }

    /// Receive the next UI event.
    pub async fn next_event(&mut self) -> UiEvent {
        let event = tokio::time::timeout(WAIT, self.ui_rx.recv())
            .await
            .expect("timed out waiting for a UI event")
            .expect("UI channel closed");
        self.seen.push(event.clone());
        event
    }

    /// Receive events until one matches.
    pub async fn wait_for<F>(&mut self, predicate: F) -> UiEvent
    where
        F: Fn(&UiEvent) -> bool,
    {
        loop {
            let event = self.next_event().await;
            if predicate(&event) {
                return event;
            }
        }
    }

    /// Wait for the next interaction prompt and return its id.
    pub async fn next_prompt(&mut self) -> String {
        match self
            .wait_for(|e| matches!(e, UiEvent::InteractionRequested { .. }))
            .await
        {
            UiEvent::InteractionRequested { id, .. } => id,
            _ => unreachable!(),
        }
    }

    /// Collect whatever has already arrived without waiting.
    pub fn drain_ready(&mut self) {
        while let Ok(event) = self.ui_rx.try_recv() {
            self.seen.push(event);
        }
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&UiEvent) -> bool,
    {
        self.seen.iter().filter(|e| predicate(e)).count()
    }

    pub fn ended(&self) -> bool {
        self.count(|e| matches!(e, UiEvent::SessionEnded { .. })) > 0
    }
}

/// Wait for a handler to start executing.
pub async fn started(handler: &RecordingHandler) {
    tokio::time::timeout(WAIT, handler.started.notified())
        .await
        .expect("handler never started");
}
