//! Relevancy gate tests.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use navigator::capability::CapabilityError;
use navigator::orchestration::{AbortReason, ExecutionEvent, ExecutionOutcome};
use navigator::research::{RELEVANCY_GATE, SYNTHESIS};

use crate::fixtures::{drain, happy_model, verdict, ResearchHarness, ScriptedModel};

const REJECTED_QUERIES: &[&str] = &[
    "asdkj qweoiu",
    "What is photosynthesis?",
    "Why?",
    "Compare every programming language ever written",
];

/// Test: For any query the gate rejects, no other node is invoked and no
/// search runs.
#[tokio::test]
async fn test_rejection_prevents_all_other_nodes() {
    for query in REJECTED_QUERIES {
        let model = ScriptedModel::new().reply(RELEVANCY_GATE, &verdict(query, false, &["too vague"]));
        let harness = ResearchHarness::new(query, model);

        let outcome = harness.execute().await;

        match &outcome {
            ExecutionOutcome::Aborted {
                reason: AbortReason::Rejected(verdict),
                partial,
                ..
            } => {
                assert!(!verdict.relevant);
                assert_eq!(verdict.reasons, Some(vec!["too vague".to_string()]));
                assert_eq!(partial.len(), 1, "only the gate result is kept");
                assert!(partial.get(&RELEVANCY_GATE.into()).is_some());
            }
            other => panic!("expected rejection for {:?}, got {:?}", query, other),
        }
        assert_eq!(harness.model.called_ids(), vec![RELEVANCY_GATE], "{}", query);
        assert!(harness.vector.queries().is_empty());
        assert!(harness.web.queries().is_empty());
    }
}

/// Test: A rejection emits the verdict and a non-completed finish event,
/// and cancels the run's token.
#[tokio::test]
async fn test_rejection_events_and_cancellation() {
    let query = "asdkj qweoiu";
    let model = ScriptedModel::new().reply(RELEVANCY_GATE, &verdict(query, false, &["too vague"]));
    let harness = ResearchHarness::new(query, model);
    let (tx, mut rx) = mpsc::channel(256);
    let cancel = CancellationToken::new();

    harness.execute_with(Some(tx), cancel.clone()).await;

    assert!(cancel.is_cancelled());
    let events = drain(&mut rx);
    assert_eq!(
        events[0],
        ExecutionEvent::NodeStarted {
            task_id: RELEVANCY_GATE.into()
        }
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::GateRejected { verdict } if !verdict.relevant)));
    assert_eq!(
        events.last(),
        Some(&ExecutionEvent::RunFinished { completed: false })
    );
}

/// Test: A passing gate lets the whole graph run.
#[tokio::test]
async fn test_pass_runs_everything() {
    let query = "What is photosynthesis?";
    let harness = ResearchHarness::new(query, happy_model(query));
    let (tx, mut rx) = mpsc::channel(256);

    let outcome = harness.execute_with(Some(tx), CancellationToken::new()).await;

    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    assert_eq!(harness.model.called_ids()[0], RELEVANCY_GATE);
    let events = drain(&mut rx);
    let succeeded = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeSucceeded { .. }))
        .count();
    assert_eq!(succeeded, 7);
    assert_eq!(
        events.last(),
        Some(&ExecutionEvent::RunFinished { completed: true })
    );
}

/// Test: A gate that fails to answer is not a rejection. The run
/// continues and synthesis fails on the missing verdict.
#[tokio::test]
async fn test_gate_failure_is_not_a_rejection() {
    let query = "What is photosynthesis?";
    let model = happy_model(query).fail(
        RELEVANCY_GATE,
        CapabilityError::Transport("connection refused".to_string()),
    );
    let harness = ResearchHarness::new(query, model);

    let outcome = harness.execute().await;

    let ExecutionOutcome::Completed { sink, results, .. } = outcome else {
        panic!("expected completion");
    };
    let gate = results.get(&RELEVANCY_GATE.into()).expect("gate result");
    assert_eq!(
        gate.failure_reason(),
        Some("capability error: transport error: connection refused")
    );
    assert_eq!(
        sink.failure_reason(),
        Some("upstream dependency failed: relevancy-gate")
    );
    assert!(!harness.model.was_called(SYNTHESIS));
}

/// Test: A malformed verdict fails schema validation instead of being
/// read as a pass or a reject.
#[tokio::test]
async fn test_malformed_verdict_fails_validation() {
    let query = "What is photosynthesis?";
    let model = happy_model(query).reply(RELEVANCY_GATE, r#"{"relevant": "maybe"}"#);
    let harness = ResearchHarness::new(query, model);

    let outcome = harness.execute().await;

    let gate = outcome.results().get(&RELEVANCY_GATE.into()).expect("gate result");
    assert_eq!(gate.failure_reason(), Some("schema validation failed"));
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
}

/// Test: The gate runs before anything else even when it is slow.
#[tokio::test(start_paused = true)]
async fn test_slow_gate_runs_alone() {
    let query = "What is photosynthesis?";
    let model = happy_model(query).delay(RELEVANCY_GATE, Duration::from_secs(2));
    let harness = ResearchHarness::new(query, model);

    harness.execute().await;

    let ids = harness.model.called_ids();
    assert_eq!(ids[0], RELEVANCY_GATE);
    assert_eq!(ids.iter().filter(|id| *id == RELEVANCY_GATE).count(), 1);
}
