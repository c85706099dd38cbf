//! Message queue and drain loop.
//!
//! The `MessageQueue` buffers events emitted by a running workflow and hands
//! them to a [`QueueConsumer`] strictly one at a time, in arrival order. A
//! background task ticks on a short interval and starts a drain pass when the
//! queue is non-empty, not already draining, and not suspended for a human
//! answer. A pass stops the moment a dispatched event suspends the session,
//! even with more events queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::util::lock;
use crate::workflow::QueuedEvent;
use crate::{mlog_debug, mlog_trace, mlog_warn};

use super::session::SessionFlags;

/// Destination of drained events.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Handle one event. Errors are logged by the queue and do not stop the pass.
    async fn dispatch(&self, event: QueuedEvent) -> Result<()>;

    /// Called once after a pass that left the queue empty.
    fn on_drained(&self);
}

struct QueueInner {
    events: Mutex<VecDeque<QueuedEvent>>,
    flags: Arc<SessionFlags>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

/// FIFO buffer of workflow events for one session.
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<QueueInner>,
}

impl MessageQueue {
    /// Create a queue bound to a session's flags.
    ///
    /// `waiting_for_interaction` suspends draining and `processing_queue`
    /// marks a pass in progress.
    pub fn new(flags: Arc<SessionFlags>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                events: Mutex::new(VecDeque::new()),
                flags,
                cancel: CancellationToken::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Append an event. Never blocks; returns `false` once disposed.
    pub fn enqueue(&self, event: QueuedEvent) -> bool {
        if self.is_disposed() {
            mlog_debug!("[queue] disposed, dropping {} event {}", event.kind(), event.id());
            return false;
        }
        mlog_trace!("[queue] enqueue {} {}", event.kind(), event.id());
        lock(&self.inner.events).push_back(event);
        true
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn pop(&self) -> Option<QueuedEvent> {
        lock(&self.inner.events).pop_front()
    }

    /// Whether a background tick should start a pass now.
    pub fn should_drain(&self) -> bool {
        let flags = &self.inner.flags;
        !self.is_disposed()
            && !flags.processing_queue.load(Ordering::SeqCst)
            && !flags.waiting_for_interaction.load(Ordering::SeqCst)
            && !self.is_empty()
    }

    /// Run one drain pass and return the number of events dispatched.
    ///
    /// Returns immediately if another pass is running.
    pub async fn drain_pass(&self, consumer: &dyn QueueConsumer) -> usize {
        let flags = &self.inner.flags;
        if flags
            .processing_queue
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return 0;
        }

        let mut dispatched = 0;
        while !self.is_disposed() && !flags.waiting_for_interaction.load(Ordering::SeqCst) {
            let Some(event) = self.pop() else {
                break;
            };
            let kind = event.kind();
            let id = event.id().to_string();
            if let Err(e) = consumer.dispatch(event).await {
                mlog_warn!("[queue] dispatch of {} {} failed: {}", kind, id, e);
            }
            dispatched += 1;
        }

        flags.processing_queue.store(false, Ordering::SeqCst);

        if dispatched > 0 {
            mlog_debug!("[queue] pass dispatched {} events, {} remain", dispatched, self.len());
        }
        // A teardown check skipped while this pass held the queue is retried here.
        if self.is_empty() && !self.is_disposed() {
            consumer.on_drained();
        }
        dispatched
    }

    /// Start the background drain loop.
    ///
    /// The loop ends when the queue is disposed.
    pub fn spawn_drain_loop(
        &self,
        consumer: Arc<dyn QueueConsumer>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let queue = self.clone();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        mlog_debug!("[queue] drain loop cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if queue.should_drain() {
                            queue.drain_pass(consumer.as_ref()).await;
                        }
                    }
                }
            }
        })
    }

    /// Clear pending events and stop the drain loop. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = {
            let mut events = lock(&self.inner.events);
            let n = events.len();
            events.clear();
            n
        };
        self.inner.cancel.cancel();
        mlog_debug!("[queue] disposed, dropped {} pending events", dropped);
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
