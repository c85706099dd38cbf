//! Human interaction tests.
//!
//! These exercise the prompts a session raises, how answers are delivered
//! and the guard that keeps at most one issue prompt open.

use std::sync::Arc;

use tokio::sync::Notify;

use mender::workflow::{
    DetectedIssue, HumanResponse, InteractionKind, InteractionResponse, IssueBatch, SessionStatus,
    TaskSuggestion, UiEvent,
};

use crate::fixtures::{batch, fast_config, nominate, started, Harness, RecordingHandler, ScriptedModel};

fn empty_batch() -> IssueBatch {
    IssueBatch::new("jakarta", Vec::new())
}

fn is_prompt(event: &UiEvent) -> bool {
    matches!(event, UiEvent::InteractionRequested { .. })
}

/// Test: Need more tasks
/// Given no tasks, no context and no nominations with interaction enabled
/// When the session runs
/// Then exactly one prompt asks for more tasks, and suggested tasks for the
/// same file are grouped into one task
#[tokio::test]
async fn test_need_more_tasks_groups_suggestions() {
    let mut harness = Harness::new(fast_config(true), ScriptedModel::new(&[]), Vec::new());
    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_session(empty_batch()).await });

    let prompt = harness.wait_for(is_prompt).await;
    let id = match prompt {
        UiEvent::InteractionRequested { id, kind, .. } => {
            assert_eq!(kind, InteractionKind::NeedMoreTasks);
            id
        }
        _ => unreachable!(),
    };
    harness.drain_ready();
    assert_eq!(harness.count(is_prompt), 1);
    assert_eq!(harness.model.call_count(), 0);

    let response = InteractionResponse::yes().with_tasks(vec![
        TaskSuggestion::new("f1", "t1"),
        TaskSuggestion::new("f1", "t2"),
    ]);
    assert!(harness
        .orchestrator
        .resolve_interaction(HumanResponse::new(id, response)));

    // The grouped task is planned, then the router asks again.
    let second = harness.next_prompt().await;
    assert_eq!(harness.model.call_count(), 1);
    let prompt = &harness.model.prompts()[0];
    assert!(prompt.contains("Issues:\n- t1\n- t2\n"));
    assert!(prompt.contains("in f1."));

    assert!(harness
        .orchestrator
        .resolve_interaction(HumanResponse::new(second, InteractionResponse::no())));
    let outcome = run.await.unwrap().unwrap();
    assert!(outcome.error.is_none());
    harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { status: SessionStatus::Completed, .. }))
        .await;
}

/// Test: Unknown and repeated resolution
/// Given one pending prompt
/// When an unknown id is resolved, then the real id twice
/// Then the unknown id and the repeat both fail cleanly and the prompt is
/// answered exactly once
#[tokio::test]
async fn test_unknown_and_double_resolve() {
    let mut harness = Harness::new(fast_config(true), ScriptedModel::new(&[]), Vec::new());
    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_session(empty_batch()).await });

    let id = harness.next_prompt().await;
    let session = harness.orchestrator.current_session().unwrap();
    assert!(!harness
        .orchestrator
        .resolve_interaction(HumanResponse::new("bogus", InteractionResponse::yes())));
    assert!(session.gateway().is_pending(&id));
    assert!(harness.orchestrator.is_busy());

    assert!(harness
        .orchestrator
        .resolve_interaction(HumanResponse::new(id.clone(), InteractionResponse::no())));
    assert!(!harness
        .orchestrator
        .resolve_interaction(HumanResponse::new(id, InteractionResponse::no())));

    run.await.unwrap().unwrap();
    harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { .. }))
        .await;
}

/// Test: Malformed answer
/// Given a pending need-more-tasks prompt
/// When it is answered with neither a choice nor a yes/no
/// Then the prompt is consumed, the router treats it as no new work and the
/// session completes
#[tokio::test]
async fn test_malformed_answer_ends_run() {
    let mut harness = Harness::new(fast_config(true), ScriptedModel::new(&[]), Vec::new());
    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_session(empty_batch()).await });

    let id = harness.next_prompt().await;
    assert!(harness
        .orchestrator
        .resolve_interaction(HumanResponse::new(id, InteractionResponse::default())));

    let outcome = run.await.unwrap().unwrap();
    assert!(outcome.error.is_none());
    harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { .. }))
        .await;
    assert_eq!(harness.model.call_count(), 0);
}

/// Test: Issue prompt guard
/// Given a session in progress
/// When two issues are reported while one issue prompt is outstanding
/// Then only one prompt is raised, and its answer covers both issues
#[tokio::test]
async fn test_issue_prompt_accumulates_reports() {
    let gate = Arc::new(Notify::new());
    let handler = RecordingHandler::new("recorder").gate(&gate);
    let model = ScriptedModel::new(&[&nominate(&[("recorder", "fix")])]);
    let mut harness = Harness::new(fast_config(false), model, vec![handler.clone()]);

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_session(batch(&[("A.java", "x")])).await });
    started(&handler).await;

    assert!(harness
        .orchestrator
        .report_issues(vec![DetectedIssue::new("file:///ws/B.java", "b broke")]));
    let (id, message) = match harness.wait_for(is_prompt).await {
        UiEvent::InteractionRequested { id, kind, message } => {
            assert_eq!(kind, InteractionKind::ConfirmIssues);
            (id, message)
        }
        _ => unreachable!(),
    };
    assert_eq!(message, "Found 1 new issue. Fix it?");

    assert!(harness
        .orchestrator
        .report_issues(vec![DetectedIssue::new("file:///ws/C.java", "c broke")]));
    harness.drain_ready();
    assert_eq!(harness.count(is_prompt), 1);
    assert_eq!(harness.orchestrator.queue_len(), 0);

    assert!(harness
        .orchestrator
        .resolve_interaction(HumanResponse::new(id, InteractionResponse::yes())));
    let confirmed = harness
        .wait_for(|e| matches!(e, UiEvent::IssuesConfirmed { .. }))
        .await;
    assert_eq!(
        confirmed,
        UiEvent::IssuesConfirmed {
            accepted: true,
            count: 2
        }
    );

    // Accepted issues become tasks once the handler finishes.
    gate.notify_one();
    run.await.unwrap().unwrap();
    harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { .. }))
        .await;
    let prompts = harness.model.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("b broke"));
    assert!(prompts[2].contains("c broke"));
}

/// Test: Declined issue prompt
#[tokio::test]
async fn test_declined_issues_are_not_routed() {
    let gate = Arc::new(Notify::new());
    let handler = RecordingHandler::new("recorder").gate(&gate);
    let model = ScriptedModel::new(&[&nominate(&[("recorder", "fix")])]);
    let mut harness = Harness::new(fast_config(false), model, vec![handler.clone()]);

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_session(batch(&[("A.java", "x")])).await });
    started(&handler).await;

    harness
        .orchestrator
        .report_issues(vec![DetectedIssue::new("file:///ws/B.java", "b broke")]);
    let id = harness.next_prompt().await;
    harness
        .orchestrator
        .resolve_interaction(HumanResponse::new(id, InteractionResponse::no()));
    let confirmed = harness
        .wait_for(|e| matches!(e, UiEvent::IssuesConfirmed { .. }))
        .await;
    assert_eq!(
        confirmed,
        UiEvent::IssuesConfirmed {
            accepted: false,
            count: 1
        }
    );

    gate.notify_one();
    run.await.unwrap().unwrap();
    harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { .. }))
        .await;
    assert_eq!(harness.model.call_count(), 1);
}

/// Test: Teardown waits for an open prompt
/// Given an issue prompt still unanswered when the run returns
/// When the prompt is finally answered
/// Then the session only tears down after the answer
#[tokio::test]
async fn test_open_prompt_holds_teardown() {
    let gate = Arc::new(Notify::new());
    let handler = RecordingHandler::new("recorder").gate(&gate);
    let model = ScriptedModel::new(&[&nominate(&[("recorder", "fix")])]);
    let mut harness = Harness::new(fast_config(false), model, vec![handler.clone()]);

    let orchestrator = harness.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_session(batch(&[("A.java", "x")])).await });
    started(&handler).await;

    harness
        .orchestrator
        .report_issues(vec![DetectedIssue::new("file:///ws/B.java", "b broke")]);
    let id = harness.next_prompt().await;

    gate.notify_one();
    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome.status, SessionStatus::Running);
    harness.drain_ready();
    assert!(!harness.ended());
    assert!(harness.orchestrator.is_busy());

    assert!(harness
        .orchestrator
        .resolve_interaction(HumanResponse::new(id, InteractionResponse::yes())));
    harness
        .wait_for(|e| matches!(e, UiEvent::SessionEnded { status: SessionStatus::Completed, .. }))
        .await;
    assert!(!harness.orchestrator.is_busy());
}
