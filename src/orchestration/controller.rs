//! Orchestration controller.
//!
//! The `Orchestrator` is the entry point for remediation sessions. It checks
//! preconditions, resets whatever the previous session left behind, wires a
//! fresh [`Session`] to a [`TaskRouter`] and runs it. The session tears
//! itself down once the run has returned and every queued event and pending
//! interaction has been dealt with.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::ModelProvider;
use crate::util::lock;
use crate::workflow::{
    ChatEntry, DetectedIssue, HumanResponse, IssueBatch, SessionId, SessionStatus, UiEvent,
};
use crate::{mlog, mlog_debug, mlog_warn};

use super::handler::{HandlerFactory, HandlerRegistry};
use super::planner::Planner;
use super::router::{RouterOptions, RunInput, TaskRouter};
use super::session::{Session, Transcript};

/// How a session's run phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    /// Status when the run returned. Still `Running` if events or
    /// interactions were outstanding at that point.
    pub status: SessionStatus,
    pub error: Option<String>,
}

struct Inner {
    config: Config,
    workspace_root: PathBuf,
    model: Option<Arc<dyn ModelProvider>>,
    handlers: HandlerFactory,
    transcript: Transcript,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    current: Mutex<Option<Arc<Session>>>,
}

/// Runs remediation sessions, one at a time.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

pub struct OrchestratorBuilder {
    config: Config,
    workspace_root: PathBuf,
    model: Option<Arc<dyn ModelProvider>>,
    handlers: Option<HandlerFactory>,
}

impl OrchestratorBuilder {
    pub fn model(mut self, model: Arc<dyn ModelProvider>) -> Self {
        self.model = Some(model);
        self
    }

    /// Replace the stock handler roster.
    pub fn handlers(mut self, factory: HandlerFactory) -> Self {
        self.handlers = Some(factory);
        self
    }

    /// Build the orchestrator and the receiver for its UI events.
    pub fn build(self) -> (Orchestrator, mpsc::UnboundedReceiver<UiEvent>) {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let handlers = self.handlers.unwrap_or_else(|| {
            let stock: HandlerFactory = Arc::new(HandlerRegistry::defaults);
            stock
        });
        let orchestrator = Orchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                workspace_root: self.workspace_root,
                model: self.model,
                handlers,
                transcript: Arc::new(Mutex::new(Vec::new())),
                ui_tx,
                current: Mutex::new(None),
            }),
        };
        (orchestrator, ui_rx)
    }
}

impl Orchestrator {
    pub fn builder(config: Config, workspace_root: impl AsRef<Path>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            workspace_root: workspace_root.as_ref().to_path_buf(),
            model: None,
            handlers: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.inner.workspace_root
    }

    /// The session currently in flight, if any.
    pub fn current_session(&self) -> Option<Arc<Session>> {
        lock(&self.inner.current)
            .as_ref()
            .filter(|s| !s.is_torn_down())
            .cloned()
    }

    pub fn is_busy(&self) -> bool {
        self.current_session().is_some()
    }

    /// Number of events waiting in the active session's queue.
    pub fn queue_len(&self) -> usize {
        self.current_session().map(|s| s.queue().len()).unwrap_or(0)
    }

    pub fn transcript(&self) -> Vec<ChatEntry> {
        lock(&self.inner.transcript).clone()
    }

    /// Run one remediation session over `batch`.
    ///
    /// Returns once the router run has returned. Teardown may still be
    /// waiting on queued events or pending interactions; use
    /// [`Orchestrator::wait_until_idle`] to wait for it.
    ///
    /// # Errors
    ///
    /// Fails without touching any state if a session is already in flight,
    /// remediation is disabled, no model is bound, or the batch has no
    /// migration profile. A failed run is reported in the outcome instead.
    pub async fn run_session(&self, batch: IssueBatch) -> Result<SessionOutcome> {
        let (session, model) = self.start_session(&batch)?;
        let session_id = session.id();

        let tasks = batch.tasks();
        let _ = self.inner.ui_tx.send(UiEvent::SessionStarted {
            session_id,
            tasks: tasks.len(),
        });

        let mut background = String::new();
        if let Some(profile) = batch.profile.as_deref() {
            background.push_str(&format!("Migration profile: {}\n", profile.trim()));
        }
        background.push_str(self.inner.config.migration_hint());

        let mut router = TaskRouter::new(
            Planner::new(model.clone(), background),
            (self.inner.handlers)(model),
            session.emitter().clone(),
            session.inbox().clone(),
            RouterOptions {
                interactive: self.inner.config.interactive,
                workspace_root: self.inner.workspace_root.clone(),
            },
        );

        let result = router
            .run(RunInput {
                tasks,
                extra_context: None,
            })
            .await;
        session.complete_run(&result);

        let outcome = SessionOutcome {
            session_id,
            status: session.status(),
            error: result.err().map(|e| e.to_string()),
        };
        mlog!(
            "[orchestrator] session {} run returned ({})",
            session_id.short(),
            outcome.status
        );
        Ok(outcome)
    }

    fn start_session(&self, batch: &IssueBatch) -> Result<(Arc<Session>, Arc<dyn ModelProvider>)> {
        let mut current = lock(&self.inner.current);

        if current.as_ref().is_some_and(|s| !s.is_torn_down()) {
            return Err(Error::SessionInFlight);
        }
        if !self.inner.config.remediation_enabled {
            return Err(Error::RemediationDisabled);
        }
        let model = self.inner.model.clone().ok_or(Error::NoModel)?;
        if !batch.has_profile() {
            return Err(Error::MissingProfile);
        }

        if let Some(stale) = current.take() {
            mlog_debug!("[orchestrator] releasing stale session {}", stale.id().short());
            stale.queue().dispose();
            stale.gateway().dispose();
        }
        lock(&self.inner.transcript).clear();

        let session = Session::new(
            &self.inner.workspace_root,
            model.name(),
            self.inner.transcript.clone(),
            self.inner.ui_tx.clone(),
        );
        session.attach(self.inner.config.drain_interval());
        *current = Some(session.clone());

        mlog!(
            "[orchestrator] session {} started with {} issues",
            session.id().short(),
            batch.issues.len()
        );
        Ok((session, model))
    }

    /// Deliver a human response to the active session.
    ///
    /// Returns `false` if no session is active or the id is not pending.
    pub fn resolve_interaction(&self, response: HumanResponse) -> bool {
        match self.current_session() {
            Some(session) => session.resolve_interaction(response),
            None => {
                mlog_warn!("[orchestrator] response {} arrived with no active session", response.id);
                false
            }
        }
    }

    /// Offer newly detected issues to the active session for confirmation.
    pub fn report_issues(&self, issues: Vec<DetectedIssue>) -> bool {
        match self.current_session() {
            Some(session) => session.report_issues(issues),
            None => false,
        }
    }

    /// Wait for the active session, if any, to tear down.
    pub async fn wait_until_idle(&self) {
        if let Some(session) = self.current_session() {
            session.wait_ended().await;
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workspace_root", &self.inner.workspace_root)
            .field("model", &self.inner.model.as_ref().map(|m| m.name().to_string()))
            .field("busy", &self.is_busy())
            .finish()
    }
}
