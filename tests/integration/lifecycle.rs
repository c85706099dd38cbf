//! Session lifecycle tests.
//!
//! These cover starting a session, the teardown gate and how failures end a
//! session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use mender::config::Config;
use mender::workflow::{ChatKind, SessionStatus, UiEvent};
use mender::Error;

use crate::fixtures::{batch, fast_config, nominate, started, Harness, RecordingHandler, ScriptedModel};

/// Test: Happy path
/// Given one task nominated to a handler that answers and edits a file
/// When the session runs without interaction
/// Then every event reaches the UI and the session completes
#[tokio::test]
async fn test_session_runs_to_completion() {
    let handler = RecordingHandler::new("recorder")
        .respond("Replaced the imports.")
        .modify("src/A.java", "import jakarta.inject.Inject;");
    let model = ScriptedModel::new(&[&nominate(&[("recorder", "Replace javax imports")])]);
    let mut harness = Harness::new(fast_config(false), model, vec![handler.clone()]);

    let outcome = harness
        .orchestrator
        .run_session(batch(&[("src/A.java", "javax.inject is gone")]))
        .await
        .unwrap();
    assert!(outcome.error.is_none());

    let ended = harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { .. }))
        .await;
    assert_eq!(
        ended,
        UiEvent::SessionEnded {
            session_id: outcome.session_id,
            status: SessionStatus::Completed,
        }
    );

    assert!(matches!(
        harness.seen.first(),
        Some(UiEvent::SessionStarted { tasks: 1, .. })
    ));
    assert_eq!(
        harness.count(|e| matches!(e, UiEvent::FileModified { path, .. } if path == "src/A.java")),
        1
    );

    let transcript = harness.orchestrator.transcript();
    assert!(transcript
        .iter()
        .any(|e| e.kind == ChatKind::Agent && e.content == "Replaced the imports."));
    assert!(!harness.orchestrator.is_busy());
    assert_eq!(harness.orchestrator.queue_len(), 0);
    assert_eq!(handler.recorded().len(), 1);
    assert_eq!(handler.reset_count(), 1);
}

/// Test: Teardown gate waits for the run
/// Given a handler that emits an event and then blocks
/// When the queue drains to empty while the run is still in progress
/// Then no cleanup happens until the run returns
#[tokio::test]
async fn test_no_teardown_before_run_returns() {
    let gate = Arc::new(Notify::new());
    let handler = RecordingHandler::new("recorder")
        .respond("working on it")
        .gate(&gate);
    let model = ScriptedModel::new(&[&nominate(&[("recorder", "fix")])]);
    let mut harness = Harness::new(fast_config(false), model, vec![handler.clone()]);

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move {
        orchestrator
            .run_session(batch(&[("src/A.java", "x")]))
            .await
    });

    started(&handler).await;
    harness
        .wait_for(|e| matches!(e, UiEvent::Transcript { entry } if entry.content == "working on it"))
        .await;

    // Queue empty, nothing pending, run still in flight.
    assert_eq!(harness.orchestrator.queue_len(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.drain_ready();
    assert!(harness.orchestrator.is_busy());
    assert!(!harness.ended());

    gate.notify_one();
    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome.status, SessionStatus::Completed);
    harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { .. }))
        .await;
    assert_eq!(
        harness.count(|e| matches!(e, UiEvent::SessionEnded { .. })),
        1
    );
}

/// Test: One session at a time
/// Given a session blocked inside a handler
/// When a second session is requested
/// Then it is rejected and the first session is unaffected
#[tokio::test]
async fn test_second_session_rejected_while_in_flight() {
    let gate = Arc::new(Notify::new());
    let handler = RecordingHandler::new("recorder").gate(&gate);
    let model = ScriptedModel::new(&[&nominate(&[("recorder", "fix")])]);
    let mut harness = Harness::new(fast_config(false), model, vec![handler.clone()]);

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_session(batch(&[("A.java", "x")])).await });
    started(&handler).await;

    let second = harness
        .orchestrator
        .run_session(batch(&[("B.java", "y")]))
        .await;
    assert!(matches!(second, Err(Error::SessionInFlight)));
    assert!(harness.orchestrator.is_busy());

    gate.notify_one();
    run.await.unwrap().unwrap();
    harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { .. }))
        .await;

    // The next session is accepted and starts from a clean transcript.
    let model_calls_before = harness.model.call_count();
    let outcome = harness
        .orchestrator
        .run_session(batch(&[("C.java", "z")]))
        .await
        .unwrap();
    assert!(outcome.error.is_none());
    assert_eq!(harness.model.call_count(), model_calls_before + 1);
}

/// Test: Failed run
/// Given a handler that fails
/// When the session runs
/// Then the session is marked failed, the transcript shows the error and
/// the session is torn down
#[tokio::test]
async fn test_failed_run_forces_teardown() {
    let handler = RecordingHandler::new("recorder").fail("compiler exploded");
    let model = ScriptedModel::new(&[&nominate(&[("recorder", "fix")])]);
    let mut harness = Harness::new(fast_config(true), model, vec![handler]);

    let outcome = harness
        .orchestrator
        .run_session(batch(&[("A.java", "x")]))
        .await
        .unwrap();
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|e| e.contains("compiler exploded")));

    harness
        .wait_for(|e| {
            matches!(
                e,
                UiEvent::SessionEnded {
                    status: SessionStatus::Failed,
                    ..
                }
            )
        })
        .await;
    assert!(harness
        .orchestrator
        .transcript()
        .iter()
        .any(|e| e.kind == ChatKind::Error && e.content.contains("compiler exploded")));
    assert!(!harness.orchestrator.is_busy());
}

/// Test: Error signal
/// Given a handler that raises the workflow error signal but returns normally
/// When the session runs to the end
/// Then the session finishes as failed
#[tokio::test]
async fn test_error_signal_marks_session_failed() {
    let handler = RecordingHandler::new("recorder").signal_error("lost the build");
    let model = ScriptedModel::new(&[&nominate(&[("recorder", "fix")])]);
    let mut harness = Harness::new(fast_config(false), model, vec![handler]);

    harness
        .orchestrator
        .run_session(batch(&[("A.java", "x")]))
        .await
        .unwrap();
    let ended = harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { .. }))
        .await;
    assert!(matches!(
        ended,
        UiEvent::SessionEnded {
            status: SessionStatus::Failed,
            ..
        }
    ));
}

/// Test: Preconditions from a config file
/// Given a config file that disables remediation
/// When a session is requested
/// Then it is rejected before anything starts
#[tokio::test]
async fn test_disabled_config_file_rejects_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mender.toml");
    std::fs::write(&path, "remediation_enabled = false\n").unwrap();
    let config = Config::load_from(&path).unwrap();

    let mut harness = Harness::new(config, ScriptedModel::new(&[]), Vec::new());
    let result = harness
        .orchestrator
        .run_session(batch(&[("A.java", "x")]))
        .await;
    assert!(matches!(result, Err(Error::RemediationDisabled)));
    harness.drain_ready();
    assert!(harness.seen.is_empty());
    assert_eq!(harness.model.call_count(), 0);
}

/// Test: Missing profile
#[tokio::test]
async fn test_batch_without_profile_rejected() {
    let harness = Harness::new(fast_config(false), ScriptedModel::new(&[]), Vec::new());
    let mut unprofiled = batch(&[("A.java", "x")]);
    unprofiled.profile = None;
    let result = harness.orchestrator.run_session(unprofiled).await;
    assert!(matches!(result, Err(Error::MissingProfile)));
    assert!(!harness.orchestrator.is_busy());
}
