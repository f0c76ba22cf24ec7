//! The research navigator's task graph.
//!
//! Seven nodes, five worker roles. The edge set never varies with the
//! query; only the rendered instructions do.
//!
//! ```text
//! relevancy-gate ─────────────────────────────────────────────┐
//! approach-plan ──────────────────────────────────────────────┤
//! query-generation ─┬─ rag-retrieval ─┬─ relevance-filter ─┬─ synthesis
//!                   └─ web-retrieval ─┘                    │
//! ```

use crate::core::dag::{TaskGraph, TaskGraphBuilder};
use crate::core::query::Query;
use crate::core::schema::OutputSchema;
use crate::core::task::{Role, TaskSpec, ToolRef};
use crate::error::Result;
use tracing::debug;

pub const RELEVANCY_GATE: &str = "relevancy-gate";
pub const APPROACH_PLAN: &str = "approach-plan";
pub const QUERY_GENERATION: &str = "query-generation";
pub const RAG_RETRIEVAL: &str = "rag-retrieval";
pub const WEB_RETRIEVAL: &str = "web-retrieval";
pub const RELEVANCE_FILTER: &str = "relevance-filter";
pub const SYNTHESIS: &str = "synthesis";

/// Node ids in declaration order.
pub const NODE_IDS: [&str; 7] = [
    RELEVANCY_GATE,
    APPROACH_PLAN,
    QUERY_GENERATION,
    RAG_RETRIEVAL,
    WEB_RETRIEVAL,
    RELEVANCE_FILTER,
    SYNTHESIS,
];

pub fn relevancy_assessor(query: &Query) -> Role {
    Role::new(
        "Critical Relevancy Assessor",
        &format!(
            "Decide whether information directly answers or supports the research query '{}', \
             applying a strict relevancy threshold and discarding tangential content.",
            query.text()
        ),
        &format!(
            "You verify and filter information. You judge whether content strictly pertains \
             to '{}'{} and never let marginal material through.",
            query.text(),
            query.context_fragment()
        ),
    )
}

pub fn research_specialist(query: &Query) -> Role {
    Role::new(
        "Diligent Research Specialist",
        &format!(
            "Plan comprehensive, accurate research for '{}', favouring credible and verifiable sources.",
            query.text()
        ),
        &format!(
            "You design research strategies across diverse, credible sources for '{}'{} \
             and document where every piece of information comes from.",
            query.text(),
            query.context_fragment()
        ),
    )
}

pub fn query_architect(query: &Query) -> Role {
    Role::new(
        "Strategic Query Architect",
        &format!(
            "Produce diverse, precise search queries that surface information relevant to '{}'.",
            query.text()
        ),
        &format!(
            "You translate research questions into effective search terms and understand how \
             search engines and vector stores retrieve information. The question is '{}'{}.",
            query.text(),
            query.context_fragment()
        ),
    )
}

pub fn information_retriever(query: &Query) -> Role {
    Role::new(
        "Precision Information Retriever",
        &format!(
            "Report retrieved information relevant to '{}' with its source. When nothing \
             relevant was found, say so plainly.",
            query.text()
        ),
        &format!(
            "You work from search results for '{}'{}. You never invent content or sources: \
             every statement you pass on carries the source it came from.",
            query.text(),
            query.context_fragment()
        ),
    )
}

pub fn research_synthesizer(query: &Query) -> Role {
    Role::new(
        "Insightful Research Synthesizer",
        &format!(
            "Turn the curated findings about '{}' into a coherent report where every claim is cited.",
            query.text()
        ),
        &format!(
            "You weave verified information into clear summaries for '{}'{}. You include \
             nothing that lacks a source.",
            query.text(),
            query.context_fragment()
        ),
    )
}

/// Build the seven-node research graph for a query.
///
/// # Errors
///
/// Only fails if the fixed declaration below is malformed, which the
/// unit tests rule out.
pub fn research_graph(query: &Query) -> Result<TaskGraph> {
    let mut builder = TaskGraphBuilder::new();

    builder.add(
        TaskSpec::new(
            RELEVANCY_GATE,
            relevancy_assessor(query),
            "Evaluate whether the question '{query}' is suitable for research. Consider clarity, \
             specificity, research potential and whether it can be answered through research. \
             Flag questions that are too vague, nonsensical or impossible to research.{context}",
            "A verdict for '{query}' with a boolean `relevant` flag. When not relevant, give \
             specific reasons and suggestions for improving the question.",
        )
        .gate()
        .with_schema(OutputSchema::RelevancyVerdict)
        .with_output_sink("question_relevancy.txt"),
    )?;

    builder.add(
        TaskSpec::new(
            APPROACH_PLAN,
            research_specialist(query),
            "Create a research approach for '{query}'. Outline the key areas to investigate, \
             likely sources of information and methods to use, covering different angles and \
             perspectives.{context}",
            "A structured plan for '{query}' with research areas, methods and a step-by-step \
             information-gathering strategy, including likely challenges and how to address them.",
        )
        .with_tools(&[ToolRef::WebSearch])
        .with_output_sink("research_approach.txt"),
    )?;

    builder.add(
        TaskSpec::new(
            QUERY_GENERATION,
            query_architect(query),
            "Generate at least 5 distinct search queries for the research question '{query}'. \
             Target different aspects of the question and vary the keywords.{context}",
            "At least 5 search queries for '{query}', each addressing a different aspect or \
             using different terminology.",
        )
        .with_schema(OutputSchema::SearchQueries)
        .with_output_sink("search_queries.txt"),
    )?;

    builder.add(
        TaskSpec::new(
            RAG_RETRIEVAL,
            information_retriever(query),
            "Using the knowledge-base results provided, collect information that answers \
             '{query}'. Keep only accurate, high-quality material that addresses the question.{context}",
            "Retrieved information about '{query}' ordered by relevance, with quotes, key facts \
             and the source of each item.",
        )
        .depends_on(&[QUERY_GENERATION])
        .with_tools(&[ToolRef::VectorSearch])
        .concurrent()
        .requires_evidence()
        .with_output_sink("rag_retrieval_results.txt"),
    )?;

    builder.add(
        TaskSpec::new(
            WEB_RETRIEVAL,
            information_retriever(query),
            "Using the web search results provided, collect the most relevant and up-to-date \
             information on '{query}', favouring authoritative sources and diverse perspectives.{context}",
            "Search results for '{query}' grouped by query, with URLs, key snippets and a note on \
             source credibility. Point out contradictory information.",
        )
        .depends_on(&[QUERY_GENERATION])
        .with_tools(&[ToolRef::WebSearch])
        .concurrent()
        .requires_evidence()
        .with_output_sink("web_search_results.txt"),
    )?;

    builder.add(
        TaskSpec::new(
            RELEVANCE_FILTER,
            relevancy_assessor(query),
            "Critically evaluate all gathered information from the knowledge base and the web \
             against '{query}'. Discard anything tangential, low-quality or without a credible \
             source.{context}",
            "Only the strictly relevant information for '{query}', each item with its original \
             source. State clearly when no relevant data was found.",
        )
        .depends_on(&[RAG_RETRIEVAL, WEB_RETRIEVAL])
        .with_output_sink("relevant_data.txt"),
    )?;

    builder.add(
        TaskSpec::new(
            SYNTHESIS,
            research_synthesizer(query),
            "Synthesize the curated information into a final report answering '{query}'. Every \
             statement must be attributed to a source from the curated data.{context}",
            "A report that answers '{query}' using only the provided, sourced information and \
             cites the source of every item. If no relevant data was provided, state that a \
             conclusive answer cannot be generated and list no sources.",
        )
        .depends_on(&[
            RELEVANCY_GATE,
            APPROACH_PLAN,
            QUERY_GENERATION,
            RAG_RETRIEVAL,
            WEB_RETRIEVAL,
            RELEVANCE_FILTER,
        ])
        .with_schema(OutputSchema::ResearchReport)
        .with_output_sink("research_synthesis.txt"),
    )?;

    let graph = builder.build()?;
    debug!(query = %query, tasks = graph.len(), "research graph ready");
    Ok(graph)
}
