//! Interaction gateway.
//!
//! The `InteractionGateway` bridges a suspended step to an eventual human
//! answer. Pending interactions are keyed by correlation id and settled
//! exactly once: the entry is removed before its responder fires, so a
//! second resolve for the same id finds nothing.
//!
//! The `IssueBatcher` keeps at most one yes/no prompt open for newly
//! detected issues. Issues reported while that prompt is outstanding join
//! its batch instead of opening another prompt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::util::lock;
use crate::workflow::{
    new_event_id, DetectedIssue, InteractionHandle, InteractionKind, InteractionRequest,
    InteractionResponse, Responder,
};
use crate::{mlog_debug, mlog_warn};

/// A suspended request awaiting a human decision.
#[derive(Debug)]
pub struct PendingInteraction {
    id: String,
    kind: InteractionKind,
    responder: Responder,
}

impl PendingInteraction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    fn settle(self, outcome: Result<InteractionResponse>) {
        // The waiting side may have gone away; nothing to do then.
        let _ = self.responder.send(outcome);
    }
}

/// Registry of pending interactions for one session.
#[derive(Debug, Default)]
pub struct InteractionGateway {
    pending: Mutex<HashMap<String, PendingInteraction>>,
    disposed: AtomicBool,
}

impl InteractionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending interaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InteractionExists`] if `id` is already pending, and
    /// [`Error::InteractionCancelled`] once the gateway is disposed. In both
    /// cases the responder is settled with the same error so the waiting side
    /// does not hang.
    pub fn register(&self, id: &str, kind: InteractionKind, responder: Responder) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            let _ = responder.send(Err(Error::InteractionCancelled(id.to_string())));
            return Err(Error::InteractionCancelled(id.to_string()));
        }

        let mut pending = lock(&self.pending);
        if pending.contains_key(id) {
            let _ = responder.send(Err(Error::InteractionExists(id.to_string())));
            return Err(Error::InteractionExists(id.to_string()));
        }

        pending.insert(
            id.to_string(),
            PendingInteraction {
                id: id.to_string(),
                kind,
                responder,
            },
        );
        mlog_debug!("[gateway] registered interaction {} ({})", id, kind);
        Ok(())
    }

    /// Resolve a pending interaction with a human response.
    ///
    /// Returns `false` if `id` is unknown. A response carrying neither a
    /// choice nor a yes/no answer is delivered as [`Error::InvalidResponse`];
    /// the entry is still consumed and `true` is returned.
    pub fn resolve(&self, id: &str, response: InteractionResponse) -> bool {
        let Some(entry) = self.take(id) else {
            mlog_warn!("[gateway] resolve for unknown interaction {}", id);
            return false;
        };

        if response.is_valid() {
            mlog_debug!("[gateway] resolved interaction {}", id);
            entry.settle(Ok(response));
        } else {
            mlog_warn!("[gateway] rejecting malformed response for interaction {}", id);
            entry.settle(Err(Error::InvalidResponse(id.to_string())));
        }
        true
    }

    /// Reject a pending interaction. Returns `false` if `id` is unknown.
    pub fn reject(&self, id: &str, error: Error) -> bool {
        match self.take(id) {
            Some(entry) => {
                mlog_debug!("[gateway] rejected interaction {}: {}", id, error);
                entry.settle(Err(error));
                true
            }
            None => {
                mlog_warn!("[gateway] reject for unknown interaction {}", id);
                false
            }
        }
    }

    fn take(&self, id: &str) -> Option<PendingInteraction> {
        lock(&self.pending).remove(id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.pending).contains_key(id)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Clear the registry, rejecting anything still pending.
    ///
    /// Later registrations are refused. Calling this again is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<PendingInteraction> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            mlog_debug!("[gateway] disposing with {} pending interactions", drained.len());
        }
        for entry in drained {
            let id = entry.id.clone();
            entry.settle(Err(Error::InteractionCancelled(id)));
        }
    }
}

/// Result of offering issues to the batcher.
#[derive(Debug)]
pub enum BatchOffer {
    /// No prompt was open; this request opens one and must be enqueued.
    Opened(InteractionRequest),
    /// The issues joined the outstanding prompt.
    Joined { id: String, count: usize },
}

/// A flushed batch and the answer it received.
#[derive(Debug)]
pub struct SettledBatch {
    pub id: String,
    pub issues: Vec<DetectedIssue>,
    pub outcome: Result<InteractionResponse>,
}

impl SettledBatch {
    pub fn accepted(&self) -> bool {
        matches!(&self.outcome, Ok(response) if response.is_confirmed())
    }

    pub fn count(&self) -> usize {
        self.issues.len()
    }
}

#[derive(Debug)]
struct OutstandingBatch {
    issues: Vec<DetectedIssue>,
    handle: InteractionHandle,
}

/// Reentrancy guard for "fix these new issues?" prompts.
#[derive(Debug, Default)]
pub struct IssueBatcher {
    outstanding: Option<OutstandingBatch>,
}

impl IssueBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer newly detected issues.
    ///
    /// Returns `None` for an empty offer.
    pub fn offer(&mut self, issues: Vec<DetectedIssue>) -> Option<BatchOffer> {
        if issues.is_empty() {
            return None;
        }

        if let Some(batch) = self.outstanding.as_mut() {
            batch.issues.extend(issues);
            return Some(BatchOffer::Joined {
                id: batch.handle.id().to_string(),
                count: batch.issues.len(),
            });
        }

        let count = issues.len();
        let (request, handle) = InteractionRequest::new(
            new_event_id(),
            InteractionKind::ConfirmIssues,
            format!(
                "Found {} new issue{}. Fix {}?",
                count,
                if count == 1 { "" } else { "s" },
                if count == 1 { "it" } else { "them" }
            ),
        );
        self.outstanding = Some(OutstandingBatch { issues, handle });
        Some(BatchOffer::Opened(request))
    }

    pub fn outstanding_id(&self) -> Option<&str> {
        self.outstanding.as_ref().map(|b| b.handle.id())
    }

    /// Flush the outstanding batch if `id` names it and its answer has arrived.
    pub fn settle(&mut self, id: &str) -> Option<SettledBatch> {
        let batch = self.outstanding.as_mut()?;
        if batch.handle.id() != id {
            return None;
        }
        let outcome = batch.handle.try_take()?;
        let batch = self.outstanding.take()?;
        Some(SettledBatch {
            id: id.to_string(),
            issues: batch.issues,
            outcome,
        })
    }

    pub fn clear(&mut self) {
        self.outstanding = None;
    }
}
