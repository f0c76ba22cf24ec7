//! Failure propagation tests.
//!
//! A failed node never stops the run; its dependents are recorded as
//! failed without being invoked.

use navigator::capability::CapabilityError;
use navigator::orchestration::{ExecutionOutcome, ResearchReply};
use navigator::research::{
    APPROACH_PLAN, QUERY_GENERATION, RAG_RETRIEVAL, RELEVANCE_FILTER, SYNTHESIS, WEB_RETRIEVAL,
};

use crate::fixtures::{happy_model, ResearchHarness, StaticSearchTool};

const QUERY: &str = "What is photosynthesis?";

fn reason_of<'a>(outcome: &'a ExecutionOutcome, id: &str) -> Option<&'a str> {
    outcome
        .results()
        .get(&id.into())
        .expect("node has a result")
        .failure_reason()
}

/// Test: A failing knowledge-base search fails rag retrieval; filter and
/// synthesis fail naming it and are never invoked.
#[tokio::test]
async fn test_rag_failure_propagates() {
    let harness = ResearchHarness::new(QUERY, happy_model(QUERY)).with_vector(
        StaticSearchTool::empty("kb").failing(CapabilityError::Transport("kb offline".to_string())),
    );

    let outcome = harness.execute().await;

    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    assert_eq!(
        reason_of(&outcome, RAG_RETRIEVAL),
        Some("capability error: transport error: kb offline")
    );
    assert_eq!(reason_of(&outcome, WEB_RETRIEVAL), None, "sibling unaffected");
    assert_eq!(
        reason_of(&outcome, RELEVANCE_FILTER),
        Some("upstream dependency failed: rag-retrieval")
    );
    assert_eq!(
        reason_of(&outcome, SYNTHESIS),
        Some("upstream dependency failed: rag-retrieval")
    );
    assert!(!harness.model.was_called(RAG_RETRIEVAL));
    assert!(!harness.model.was_called(RELEVANCE_FILTER));
    assert!(!harness.model.was_called(SYNTHESIS));
}

/// Test: A model failure on web retrieval propagates the same way.
#[tokio::test]
async fn test_web_failure_propagates() {
    let model = happy_model(QUERY).fail(
        WEB_RETRIEVAL,
        CapabilityError::RateLimited("429 Too Many Requests".to_string()),
    );
    let harness = ResearchHarness::new(QUERY, model);

    let outcome = harness.execute().await;

    assert_eq!(
        reason_of(&outcome, WEB_RETRIEVAL),
        Some("capability error: rate limited: 429 Too Many Requests")
    );
    assert_eq!(reason_of(&outcome, RAG_RETRIEVAL), None);
    assert_eq!(
        reason_of(&outcome, RELEVANCE_FILTER),
        Some("upstream dependency failed: web-retrieval")
    );
    assert_eq!(
        reason_of(&outcome, SYNTHESIS),
        Some("upstream dependency failed: web-retrieval")
    );
    assert!(!harness.model.was_called(RELEVANCE_FILTER));
}

/// Test: Too few generated queries fail schema validation, and both
/// retrieval branches fail without searching.
#[tokio::test]
async fn test_schema_failure_propagates() {
    let model = happy_model(QUERY).reply(
        QUERY_GENERATION,
        r#"{"queries": ["photosynthesis", "chlorophyll", "photosynthesis"]}"#,
    );
    let harness = ResearchHarness::new(QUERY, model);

    let outcome = harness.execute().await;

    let generation = outcome
        .results()
        .get(&QUERY_GENERATION.into())
        .expect("result");
    assert_eq!(generation.failure_reason(), Some("schema validation failed"));
    match &generation.status {
        navigator::core::TaskStatus::Failure { detail, .. } => {
            let detail = detail.as_deref().expect("detail kept");
            assert!(detail.contains("at least 5"), "{}", detail);
        }
        other => panic!("expected failure, got {}", other),
    }
    for id in [RAG_RETRIEVAL, WEB_RETRIEVAL] {
        assert_eq!(
            reason_of(&outcome, id),
            Some("upstream dependency failed: query-generation")
        );
    }
    assert_eq!(harness.vector.queries().len(), 0);
    // Only the approach plan searched the web.
    assert_eq!(harness.web.queries(), vec![QUERY]);
}

/// Test: Prose where a report is expected fails validation rather than
/// being passed through.
#[tokio::test]
async fn test_unstructured_report_is_not_an_answer() {
    let model = happy_model(QUERY).reply(SYNTHESIS, "Photosynthesis is how plants eat light.");
    let harness = ResearchHarness::new(QUERY, model);

    let outcome = harness.execute().await;
    assert_eq!(reason_of(&outcome, SYNTHESIS), Some("schema validation failed"));

    let reply = navigator::orchestration::aggregate(&harness.query, &outcome);
    assert!(matches!(reply, ResearchReply::Inconclusive(_)));
}

/// Test: A failure that nothing downstream needs beyond synthesis only
/// fails synthesis.
#[tokio::test]
async fn test_approach_plan_failure_only_fails_synthesis() {
    let model = happy_model(QUERY).fail(
        APPROACH_PLAN,
        CapabilityError::InvalidResponse("empty body".to_string()),
    );
    let harness = ResearchHarness::new(QUERY, model);

    let outcome = harness.execute().await;

    for id in [QUERY_GENERATION, RAG_RETRIEVAL, WEB_RETRIEVAL, RELEVANCE_FILTER] {
        assert_eq!(reason_of(&outcome, id), None, "{} should succeed", id);
    }
    assert_eq!(
        reason_of(&outcome, SYNTHESIS),
        Some("upstream dependency failed: approach-plan")
    );
}
