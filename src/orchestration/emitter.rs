//! Event emitter connecting a running workflow to its session.
//!
//! The router and its handlers emit [`QueuedEvent`]s and error signals
//! through a `WorkflowEmitter`. The controller subscribes the active session
//! before the run starts and detaches it at teardown; anything emitted while
//! detached is dropped.

use std::sync::{Arc, Mutex, Weak};

use crate::error::Error;
use crate::util::lock;
use crate::workflow::QueuedEvent;
use crate::mlog_debug;

/// Receiver side of a workflow's output.
pub trait WorkflowListener: Send + Sync {
    fn on_event(&self, event: QueuedEvent);
    fn on_error(&self, error: &Error);
}

#[derive(Clone, Default)]
pub struct WorkflowEmitter {
    listener: Arc<Mutex<Option<Weak<dyn WorkflowListener>>>>,
}

impl WorkflowEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Weak<dyn WorkflowListener>) {
        *lock(&self.listener) = Some(listener);
    }

    pub fn detach(&self) {
        lock(&self.listener).take();
    }

    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }

    // Upgrade outside the lock so listeners may detach from inside a callback.
    fn current(&self) -> Option<Arc<dyn WorkflowListener>> {
        let weak = lock(&self.listener).clone();
        weak.and_then(|w| w.upgrade())
    }

    /// Forward an event. Returns `false` if nobody is listening.
    pub fn emit(&self, event: QueuedEvent) -> bool {
        match self.current() {
            Some(listener) => {
                listener.on_event(event);
                true
            }
            None => {
                mlog_debug!("[emitter] dropping {} event {}: no listener", event.kind(), event.id());
                false
            }
        }
    }

    /// Raise the error signal.
    pub fn emit_error(&self, error: &Error) -> bool {
        match self.current() {
            Some(listener) => {
                listener.on_error(error);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for WorkflowEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEmitter")
            .field("attached", &self.is_attached())
            .finish()
    }
}
