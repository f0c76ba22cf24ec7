//! Orchestration layer for the research navigator.
//!
//! The executor walks a task graph over a shared capability pool; the
//! aggregator turns its outcome into the caller's reply. `command` holds
//! the subprocess-backed capabilities used by the binary.

pub mod aggregator;
pub mod command;
pub mod executor;

pub use aggregator::{aggregate, ResearchReply, ResearchResponse, INCONCLUSIVE_FINDINGS};
pub use command::{CommandModel, CommandSearchTool};
pub use executor::{
    AbortReason, ExecutionEvent, ExecutionOutcome, Executor, ExecutorConfig, RunId, TaskResults,
};

use crate::capability::Capabilities;
use crate::core::query::Query;
use crate::error::Result;
use crate::research::research_graph;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Answer one query: build the research graph, execute it and aggregate.
///
/// # Errors
///
/// Fails only for an invalid query or a malformed graph; everything that
/// goes wrong during execution is reported in the reply.
pub async fn run_research(
    query: &Query,
    capabilities: &Capabilities,
    config: &ExecutorConfig,
    events: Option<mpsc::Sender<ExecutionEvent>>,
    cancel: CancellationToken,
) -> Result<ResearchReply> {
    let query = query.clone().validated()?;
    let graph = research_graph(&query)?;
    let mut executor = Executor::new(&graph, &query, capabilities, config).with_cancellation(cancel);
    if let Some(tx) = events {
        executor = executor.with_events(tx);
    }
    let outcome = executor.run().await?;
    Ok(aggregate(&query, &outcome))
}
