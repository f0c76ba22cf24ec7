//! Parallel retrieval correctness tests.
//!
//! The two retrieval branches share a level and run concurrently; the
//! filter must see the same input no matter which finishes first.

use std::time::Duration;

use navigator::orchestration::{ExecutionOutcome, ExecutorConfig};
use navigator::research::{
    APPROACH_PLAN, QUERY_GENERATION, RAG_RETRIEVAL, RELEVANCE_FILTER, RELEVANCY_GATE, SYNTHESIS,
    WEB_RETRIEVAL,
};

use crate::fixtures::{happy_model, kb_hits, web_hits, ResearchHarness, StaticSearchTool};

const QUERY: &str = "What is photosynthesis?";

fn harness_with_delays(vector_delay: Duration, web_delay: Duration) -> ResearchHarness {
    ResearchHarness::new(QUERY, happy_model(QUERY))
        .with_vector(StaticSearchTool::new("kb", kb_hits()).delayed(vector_delay))
        .with_web(StaticSearchTool::new("web", web_hits()).delayed(web_delay))
}

/// Test: Filter input is identical whichever retrieval branch is delayed.
#[tokio::test(start_paused = true)]
async fn test_filter_input_independent_of_completion_order() {
    let rag_slow = harness_with_delays(Duration::from_millis(500), Duration::ZERO);
    let web_slow = harness_with_delays(Duration::ZERO, Duration::from_millis(500));

    rag_slow.execute().await;
    web_slow.execute().await;

    let a = rag_slow.model.call_for(RELEVANCE_FILTER).expect("filter ran");
    let b = web_slow.model.call_for(RELEVANCE_FILTER).expect("filter ran");
    assert_eq!(a.context, b.context);
    assert_eq!(a.instructions, b.instructions);

    // Both branches' payloads are present.
    assert!(a.context.contains("## Output of rag-retrieval\noutput of rag-retrieval"));
    assert!(a.context.contains("## Output of web-retrieval\noutput of web-retrieval"));
}

/// Test: The retrieval branches overlap in time.
/// When the knowledge base is slow, web retrieval reaches the model first
/// even though rag retrieval is declared first.
#[tokio::test(start_paused = true)]
async fn test_retrieval_branches_run_concurrently() {
    let harness = harness_with_delays(Duration::from_millis(500), Duration::ZERO);

    harness.execute().await;

    let ids = harness.model.called_ids();
    let rag = ids.iter().position(|id| id == RAG_RETRIEVAL).expect("rag ran");
    let web = ids.iter().position(|id| id == WEB_RETRIEVAL).expect("web ran");
    assert!(web < rag, "web should reach the model first: {:?}", ids);

    // And the reverse.
    let harness = harness_with_delays(Duration::ZERO, Duration::from_millis(500));
    harness.execute().await;
    let ids = harness.model.called_ids();
    let rag = ids.iter().position(|id| id == RAG_RETRIEVAL).expect("rag ran");
    let web = ids.iter().position(|id| id == WEB_RETRIEVAL).expect("web ran");
    assert!(rag < web, "rag should reach the model first: {:?}", ids);
}

/// Test: Independent non-concurrent nodes keep their declared order, and
/// every node sees all of its dependencies before it starts.
#[tokio::test]
async fn test_dependency_order_respected() {
    let harness = ResearchHarness::new(QUERY, happy_model(QUERY));

    harness.execute().await;

    let ids = harness.model.called_ids();
    let pos = |id: &str| ids.iter().position(|c| c == id).expect("node ran");
    assert_eq!(pos(RELEVANCY_GATE), 0);
    assert!(pos(APPROACH_PLAN) < pos(QUERY_GENERATION));
    assert!(pos(QUERY_GENERATION) < pos(RAG_RETRIEVAL));
    assert!(pos(QUERY_GENERATION) < pos(WEB_RETRIEVAL));
    assert!(pos(RAG_RETRIEVAL) < pos(RELEVANCE_FILTER));
    assert!(pos(WEB_RETRIEVAL) < pos(RELEVANCE_FILTER));
    assert_eq!(pos(SYNTHESIS), ids.len() - 1);

    let synthesis = harness.model.call_for(SYNTHESIS).expect("synthesis ran");
    for dep in [
        RELEVANCY_GATE,
        APPROACH_PLAN,
        QUERY_GENERATION,
        RAG_RETRIEVAL,
        WEB_RETRIEVAL,
        RELEVANCE_FILTER,
    ] {
        assert!(
            synthesis.context.contains(&format!("## Output of {}", dep)),
            "synthesis is missing {}",
            dep
        );
    }
}

/// Test: Retrieval searches with the generated queries, capped per tool.
#[tokio::test]
async fn test_generated_queries_drive_retrieval() {
    let config = ExecutorConfig {
        max_queries_per_tool: 3,
        ..ExecutorConfig::default()
    };
    let harness = ResearchHarness::new(QUERY, happy_model(QUERY)).with_config(config);

    harness.execute().await;

    assert_eq!(
        harness.vector.queries(),
        vec![
            "photosynthesis definition",
            "light dependent reactions",
            "calvin cycle steps",
        ]
    );
    // The web tool also serves the approach plan, which searches the
    // question itself.
    let web = harness.web.queries();
    assert_eq!(web[0], QUERY);
    assert_eq!(web.len(), 4);
}

/// Test: Evidence is kept on the retrieval payloads and shown to the model.
#[tokio::test]
async fn test_evidence_recorded_and_deduplicated() {
    let harness = ResearchHarness::new(QUERY, happy_model(QUERY));

    let outcome = harness.execute().await;

    let ExecutionOutcome::Completed { results, .. } = outcome else {
        panic!("expected completion");
    };
    let rag = results
        .get(&RAG_RETRIEVAL.into())
        .and_then(|r| r.payload())
        .expect("rag payload");
    // Five queries returned the same hit; it is kept once.
    assert_eq!(rag.evidence, kb_hits());

    let call = harness.model.call_for(RAG_RETRIEVAL).expect("rag ran");
    assert!(call.context.contains("## Retrieved evidence"));
    assert!(call.context.contains("kb://botany/photosynthesis"));
}
