//! Task router.
//!
//! The router owns the work of one remediation run: a FIFO of tasks, a LIFO
//! stack of nominated assignments and an optional piece of extra context
//! left behind by the last handler. Each `step` does one unit of work,
//! chosen in fixed priority order:
//!
//! 1. Nothing left: ask the human for more tasks (or stop when
//!    non-interactive).
//! 2. An assignment just finished: reset its handler.
//! 3. Nominations remain: dispatch the most recent one.
//! 4. Otherwise plan the next task (extra context first).

use std::collections::VecDeque;
use std::path::PathBuf;

use crate::error::Result;
use crate::util::{lock, relative_to_workspace};
use crate::workflow::{
    group_tasks, new_event_id, InteractionKind, InteractionRequest, NominatedAssignment,
    QueuedEvent, Task,
};
use crate::{mlog, mlog_debug, mlog_warn};

use super::emitter::WorkflowEmitter;
use super::handler::{HandlerInputs, HandlerRegistry};
use super::planner::Planner;
use super::session::TaskInbox;

/// Prompt shown when the router runs out of work.
pub const NEED_MORE_TASKS_MESSAGE: &str =
    "All tasks are done. Do you want to add more tasks?";

#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Ask the human for more work instead of stopping when idle.
    pub interactive: bool,
    pub workspace_root: PathBuf,
}

/// Seed for one router run.
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub tasks: Vec<Task>,
    pub extra_context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Finished,
}

pub struct TaskRouter {
    tasks: VecDeque<Task>,
    nominations: Vec<NominatedAssignment>,
    extra_context: Option<String>,
    active_handler: Option<String>,
    active_task: Option<Task>,
    should_end: bool,
    planner: Planner,
    handlers: HandlerRegistry,
    emitter: WorkflowEmitter,
    inbox: TaskInbox,
    options: RouterOptions,
}

impl TaskRouter {
    pub fn new(
        planner: Planner,
        handlers: HandlerRegistry,
        emitter: WorkflowEmitter,
        inbox: TaskInbox,
        options: RouterOptions,
    ) -> Self {
        Self {
            tasks: VecDeque::new(),
            nominations: Vec::new(),
            extra_context: None,
            active_handler: None,
            active_task: None,
            should_end: false,
            planner,
            handlers,
            emitter,
            inbox,
            options,
        }
    }

    pub fn pending_tasks(&self) -> Vec<Task> {
        self.tasks.iter().cloned().collect()
    }

    pub fn nominations(&self) -> &[NominatedAssignment] {
        &self.nominations
    }

    pub fn extra_context(&self) -> Option<&str> {
        self.extra_context.as_deref()
    }

    pub fn active_task(&self) -> Option<&Task> {
        self.active_task.as_ref()
    }

    pub fn active_handler(&self) -> Option<&str> {
        self.active_handler.as_deref()
    }

    pub fn should_end(&self) -> bool {
        self.should_end
    }

    /// Queue tasks behind the ones already pending.
    pub fn enqueue_tasks(&mut self, tasks: impl IntoIterator<Item = Task>) {
        self.tasks.extend(tasks.into_iter().filter(|t| !t.issues.is_empty()));
    }

    /// Set extra context for the next planning round. Blank text clears it.
    pub fn set_extra_context(&mut self, context: Option<String>) {
        self.extra_context = context.filter(|c| !c.trim().is_empty());
    }

    fn absorb_inbox(&mut self) {
        let arrived: Vec<Task> = lock(&self.inbox).drain(..).collect();
        if !arrived.is_empty() {
            mlog_debug!("[router] {} tasks arrived from the inbox", arrived.len());
            self.enqueue_tasks(arrived);
        }
    }

    fn has_work(&self) -> bool {
        !self.tasks.is_empty() || self.extra_context.is_some() || !self.nominations.is_empty()
    }

    /// Seed the router and step until it finishes.
    ///
    /// # Errors
    ///
    /// Planner and handler failures abort the run.
    pub async fn run(&mut self, input: RunInput) -> Result<()> {
        self.enqueue_tasks(input.tasks);
        self.set_extra_context(input.extra_context);
        mlog!(
            "[router] run started: {} tasks, extra context: {}",
            self.tasks.len(),
            self.extra_context.is_some()
        );

        let result = loop {
            match self.step().await {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Finished) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.finish_active();
        result
    }

    /// Perform one unit of work.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        self.absorb_inbox();

        if !self.has_work() {
            return Ok(self.idle().await);
        }

        if self.active_handler.is_some() {
            self.finish_active();
            return Ok(StepOutcome::Continue);
        }

        if let Some(nomination) = self.nominations.pop() {
            self.dispatch(nomination).await?;
            return Ok(StepOutcome::Continue);
        }

        self.plan_next().await?;
        Ok(StepOutcome::Continue)
    }

    async fn idle(&mut self) -> StepOutcome {
        self.should_end = true;
        self.finish_active();
        if !self.options.interactive {
            mlog!("[router] out of work, not interactive: finishing");
            return StepOutcome::Finished;
        }

        let (request, handle) = InteractionRequest::new(
            new_event_id(),
            InteractionKind::NeedMoreTasks,
            NEED_MORE_TASKS_MESSAGE,
        );
        self.emitter.emit(QueuedEvent::UserInteractionRequest(request));

        let suggested = match handle.wait().await {
            Ok(response) if response.is_confirmed() => group_tasks(
                response
                    .tasks
                    .iter()
                    .map(|s| (s.uri.as_str(), s.task.as_str())),
            ),
            Ok(_) => Vec::new(),
            Err(e) => {
                mlog_warn!("[router] request for more tasks failed: {}", e);
                Vec::new()
            }
        };
        self.enqueue_tasks(suggested);
        self.absorb_inbox();

        if self.tasks.is_empty() {
            mlog!("[router] no more tasks: finishing");
            StepOutcome::Finished
        } else {
            self.should_end = false;
            mlog!("[router] {} new tasks queued", self.tasks.len());
            StepOutcome::Continue
        }
    }

    fn finish_active(&mut self) {
        if let Some(name) = self.active_handler.take() {
            if let Some(handler) = self.handlers.get_mut(&name) {
                handler.reset();
            }
            mlog_debug!("[router] handler {} finished", name);
        }
        self.active_task = None;
    }

    async fn dispatch(&mut self, nomination: NominatedAssignment) -> Result<()> {
        let uri = self
            .active_task
            .as_ref()
            .filter(|task| task.has_uri())
            .map(|task| relative_to_workspace(&task.uri, &self.options.workspace_root));

        let Some(handler) = self.handlers.get_mut(&nomination.handler_name) else {
            mlog_warn!(
                "[router] no handler named '{}', skipping assignment",
                nomination.handler_name
            );
            return Ok(());
        };

        let name = handler.name().to_string();
        mlog!("[router] dispatching {} for {}", name, uri.as_deref().unwrap_or("<context>"));
        handler.set_inputs(HandlerInputs {
            instructions: nomination.instructions,
            files: uri.iter().cloned().collect(),
            uri,
        });
        self.active_handler = Some(name.clone());

        let outcome = match handler.execute(&self.emitter).await {
            Ok(outcome) => outcome,
            Err(e) => {
                mlog_warn!("[router] handler {} failed: {}", name, e);
                return Err(e);
            }
        };
        if let Some(notes) = outcome.follow_up {
            mlog_debug!("[router] {} left follow-up notes", name);
            self.set_extra_context(Some(notes));
        }
        Ok(())
    }

    async fn plan_next(&mut self) -> Result<()> {
        let task = match self.extra_context.take() {
            Some(context) => Task::synthetic(context),
            None => match self.tasks.pop_front() {
                Some(task) => task,
                None => return Ok(()),
            },
        };

        let roster = self.handlers.roster();
        let nominations = self.planner.plan(&task, &roster).await?;
        if nominations.is_empty() {
            mlog_warn!("[router] planner nominated nothing for '{}'", task.uri);
        }
        self.active_task = Some(task);
        self.nominations.extend(nominations);
        Ok(())
    }
}

impl std::fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRouter")
            .field("tasks", &self.tasks.len())
            .field("nominations", &self.nominations)
            .field("extra_context", &self.extra_context.is_some())
            .field("active_handler", &self.active_handler)
            .field("should_end", &self.should_end)
            .finish()
    }
}
