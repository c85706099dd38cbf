//! Remediation session state and teardown gate.
//!
//! A `Session` owns everything one remediation run needs while it is in
//! flight: the message queue, the interaction gateway, the shared flags and
//! the subscription to the workflow's events. It is also the queue's
//! consumer, turning each drained event into exactly one UI event.
//!
//! Teardown is gated on a conjunction that two independent paths re-check:
//! the resolve path after an interaction is answered, and the queue's
//! drain-empty callback. Cleanup only happens when no interaction is
//! pending, the session is not waiting for one, no drain pass is holding a
//! popped event, the queue is empty and the router run has returned.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::util::lock;
use crate::workflow::{
    group_tasks, ChatEntry, ChatKind, DetectedIssue, HumanResponse, QueuedEvent, SessionId,
    SessionStatus, Task, UiEvent,
};
use crate::{mlog, mlog_debug, mlog_error, mlog_warn};

use super::emitter::{WorkflowEmitter, WorkflowListener};
use super::gateway::{BatchOffer, InteractionGateway, IssueBatcher};
use super::queue::{MessageQueue, QueueConsumer};

/// Mutable flags shared by a session, its queue and its controller.
#[derive(Debug, Default)]
pub struct SessionFlags {
    /// A drained event is waiting on a human answer; draining is suspended.
    pub waiting_for_interaction: AtomicBool,
    /// A drain pass is in progress.
    pub processing_queue: AtomicBool,
    /// The router run call has returned (successfully or not).
    pub run_phase_complete: AtomicBool,
    pub failed: AtomicBool,
    /// Files changed since the last teardown; cached analysis is stale.
    pub cache_invalidated: AtomicBool,
}

impl SessionFlags {
    /// Clear the transient flags. Run completion and failure are kept.
    pub fn reset(&self) {
        self.waiting_for_interaction.store(false, Ordering::SeqCst);
        self.processing_queue.store(false, Ordering::SeqCst);
        self.cache_invalidated.store(false, Ordering::SeqCst);
    }
}

/// Visible chat transcript, shared between the controller and its sessions.
pub type Transcript = Arc<Mutex<Vec<ChatEntry>>>;

/// Tasks handed to the router from outside its run loop.
pub type TaskInbox = Arc<Mutex<Vec<Task>>>;

pub struct Session {
    id: SessionId,
    workspace_root: PathBuf,
    model_name: String,
    flags: Arc<SessionFlags>,
    queue: MessageQueue,
    gateway: InteractionGateway,
    emitter: WorkflowEmitter,
    batcher: Mutex<IssueBatcher>,
    inbox: TaskInbox,
    transcript: Transcript,
    modified_files: Mutex<Vec<String>>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    status: Mutex<SessionStatus>,
    torn_down: AtomicBool,
    ended_tx: watch::Sender<bool>,
}

impl Session {
    pub fn new(
        workspace_root: &Path,
        model_name: &str,
        transcript: Transcript,
        ui_tx: mpsc::UnboundedSender<UiEvent>,
    ) -> Arc<Self> {
        let flags = Arc::new(SessionFlags::default());
        let (ended_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: SessionId::new(),
            workspace_root: workspace_root.to_path_buf(),
            model_name: model_name.to_string(),
            queue: MessageQueue::new(flags.clone()),
            flags,
            gateway: InteractionGateway::new(),
            emitter: WorkflowEmitter::new(),
            batcher: Mutex::new(IssueBatcher::new()),
            inbox: Arc::new(Mutex::new(Vec::new())),
            transcript,
            modified_files: Mutex::new(Vec::new()),
            ui_tx,
            status: Mutex::new(SessionStatus::Pending),
            torn_down: AtomicBool::new(false),
            ended_tx,
        })
    }

    /// Start the drain loop and subscribe to the workflow's emitter.
    pub fn attach(self: &Arc<Self>, drain_interval: Duration) {
        let consumer: Arc<dyn QueueConsumer> = self.clone();
        self.queue.spawn_drain_loop(consumer, drain_interval);

        let listener: Arc<dyn WorkflowListener> = self.clone();
        self.emitter.subscribe(Arc::downgrade(&listener));

        *lock(&self.status) = SessionStatus::Running;
        mlog!(
            "[session {}] attached (model={}, root={})",
            self.id.short(),
            self.model_name,
            self.workspace_root.display()
        );
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn gateway(&self) -> &InteractionGateway {
        &self.gateway
    }

    pub fn emitter(&self) -> &WorkflowEmitter {
        &self.emitter
    }

    pub fn inbox(&self) -> &TaskInbox {
        &self.inbox
    }

    pub fn status(&self) -> SessionStatus {
        *lock(&self.status)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn modified_files(&self) -> Vec<String> {
        lock(&self.modified_files).clone()
    }

    /// Wait until the session has been torn down.
    pub async fn wait_ended(&self) {
        let mut rx = self.ended_tx.subscribe();
        // The sender lives in `self`, so this only errors if it is gone.
        let _ = rx.wait_for(|ended| *ended).await;
    }

    fn send_ui(&self, event: UiEvent) {
        if self.ui_tx.send(event).is_err() {
            mlog_debug!("[session {}] UI receiver closed", self.id.short());
        }
    }

    fn push_entry(&self, entry: ChatEntry) -> ChatEntry {
        lock(&self.transcript).push(entry.clone());
        entry
    }

    // Streamed chunks grow the entry that shares their id.
    fn grow_entry(&self, id: &str, chunk: &str) -> ChatEntry {
        let mut transcript = lock(&self.transcript);
        if let Some(entry) = transcript.iter_mut().rev().find(|e| e.id == id) {
            entry.content.push_str(chunk);
            return entry.clone();
        }
        let entry = ChatEntry::new(id, ChatKind::Agent, chunk);
        transcript.push(entry.clone());
        entry
    }

    /// Record a failure visible to the user.
    pub fn fail(&self, message: &str) {
        self.flags.failed.store(true, Ordering::SeqCst);
        mlog_error!("[session {}] failed: {}", self.id.short(), message);
        let entry = self.push_entry(ChatEntry::new(
            crate::workflow::new_event_id(),
            ChatKind::Error,
            message,
        ));
        self.send_ui(UiEvent::Transcript { entry });
    }

    /// Record that the router run call returned.
    ///
    /// A successful run goes through the teardown gate. A failed run is
    /// marked failed and torn down unconditionally.
    pub fn complete_run(&self, outcome: &Result<()>) {
        self.flags.run_phase_complete.store(true, Ordering::SeqCst);
        match outcome {
            Ok(()) => {
                mlog_debug!("[session {}] run phase complete", self.id.short());
                self.check_teardown();
            }
            Err(e) => {
                self.fail(&format!("Remediation run failed: {}", e));
                self.cleanup();
            }
        }
    }

    /// Whether every completion signal agrees that the session is done.
    pub fn teardown_due(&self) -> bool {
        !self.gateway.has_pending()
            && !self.flags.waiting_for_interaction.load(Ordering::SeqCst)
            && !self.flags.processing_queue.load(Ordering::SeqCst)
            && self.queue.is_empty()
            && self.flags.run_phase_complete.load(Ordering::SeqCst)
    }

    /// Tear down if the gate is open. Safe to call at any time.
    pub fn check_teardown(&self) -> bool {
        if self.is_torn_down() || !self.teardown_due() {
            return false;
        }
        self.cleanup()
    }

    /// Release the session's queue, gateway and subscriptions.
    ///
    /// Returns `true` for the call that performed the teardown; later calls
    /// are no-ops.
    pub fn cleanup(&self) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.flags.reset();
        self.queue.dispose();
        self.gateway.dispose();
        lock(&self.batcher).clear();
        self.emitter.detach();

        let status = if self.flags.failed.load(Ordering::SeqCst) {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };
        *lock(&self.status) = status;

        mlog!("[session {}] torn down ({})", self.id.short(), status);
        self.send_ui(UiEvent::SessionEnded {
            session_id: self.id,
            status,
        });
        let _ = self.ended_tx.send(true);
        true
    }

    /// Deliver a human response to its pending interaction.
    ///
    /// Returns `false` if no interaction with that id is pending.
    pub fn resolve_interaction(&self, response: HumanResponse) -> bool {
        let HumanResponse { id, data } = response;
        if !self.gateway.resolve(&id, data.response) {
            return false;
        }

        if !self.gateway.has_pending() {
            self.flags
                .waiting_for_interaction
                .store(false, Ordering::SeqCst);
        }
        self.settle_issue_batch(&id);
        self.check_teardown();
        true
    }

    /// Offer newly detected issues for confirmation.
    ///
    /// Opens a yes/no prompt unless one is already outstanding, in which case
    /// the issues join it. Returns `false` once the session is torn down.
    pub fn report_issues(&self, issues: Vec<DetectedIssue>) -> bool {
        if self.is_torn_down() {
            return false;
        }
        let offer = lock(&self.batcher).offer(issues);
        match offer {
            Some(BatchOffer::Opened(request)) => {
                mlog_debug!("[session {}] opening issue prompt {}", self.id.short(), request.id);
                self.queue
                    .enqueue(QueuedEvent::UserInteractionRequest(request))
            }
            Some(BatchOffer::Joined { id, count }) => {
                mlog_debug!(
                    "[session {}] issue prompt {} now covers {} issues",
                    self.id.short(),
                    id,
                    count
                );
                true
            }
            None => true,
        }
    }

    fn settle_issue_batch(&self, id: &str) {
        let Some(settled) = lock(&self.batcher).settle(id) else {
            return;
        };

        let accepted = settled.accepted();
        let count = settled.count();
        if accepted {
            let tasks = group_tasks(
                settled
                    .issues
                    .iter()
                    .map(|issue| (issue.uri.as_str(), issue.message.as_str())),
            );
            if self.flags.run_phase_complete.load(Ordering::SeqCst) {
                mlog_warn!(
                    "[session {}] {} accepted issues arrived after the run finished",
                    self.id.short(),
                    count
                );
            }
            lock(&self.inbox).extend(tasks);
        }
        self.push_entry(ChatEntry::new(
            settled.id,
            ChatKind::System,
            format!(
                "{} {} issue{}",
                if accepted { "Accepted" } else { "Declined" },
                count,
                if count == 1 { "" } else { "s" }
            ),
        ));
        self.send_ui(UiEvent::IssuesConfirmed { accepted, count });
    }
}

#[async_trait]
impl QueueConsumer for Session {
    async fn dispatch(&self, event: QueuedEvent) -> Result<()> {
        match event {
            QueuedEvent::LlmChunk { id, content } => {
                let entry = self.grow_entry(&id, &content);
                self.send_ui(UiEvent::Transcript { entry });
            }
            QueuedEvent::FullResponse { id, content } => {
                let entry = self.push_entry(ChatEntry::new(id, ChatKind::Agent, content));
                self.send_ui(UiEvent::Transcript { entry });
            }
            QueuedEvent::ModifiedFile { path, content, .. } => {
                self.flags.cache_invalidated.store(true, Ordering::SeqCst);
                {
                    let mut files = lock(&self.modified_files);
                    if !files.contains(&path) {
                        files.push(path.clone());
                    }
                }
                self.send_ui(UiEvent::FileModified { path, content });
            }
            QueuedEvent::ToolCall { id, name, arguments } => {
                let entry = self.push_entry(ChatEntry::new(
                    id,
                    ChatKind::Tool,
                    format!("{} {}", name, arguments),
                ));
                self.send_ui(UiEvent::Transcript { entry });
            }
            QueuedEvent::UserInteractionRequest(request) => {
                let id = request.id;
                self.gateway.register(&id, request.kind, request.responder)?;
                self.flags
                    .waiting_for_interaction
                    .store(true, Ordering::SeqCst);
                self.push_entry(ChatEntry::new(
                    id.clone(),
                    ChatKind::Interaction,
                    request.message.clone(),
                ));
                self.send_ui(UiEvent::InteractionRequested {
                    id,
                    kind: request.kind,
                    message: request.message,
                });
            }
            QueuedEvent::Error { id, message } => {
                let entry = self.push_entry(ChatEntry::new(id, ChatKind::Error, message));
                self.send_ui(UiEvent::Transcript { entry });
            }
        }
        Ok(())
    }

    fn on_drained(&self) {
        self.check_teardown();
    }
}

impl WorkflowListener for Session {
    fn on_event(&self, event: QueuedEvent) {
        self.queue.enqueue(event);
    }

    fn on_error(&self, error: &Error) {
        self.fail(&error.to_string());
        self.check_teardown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("queue", &self.queue)
            .field("pending", &self.gateway.pending_count())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
