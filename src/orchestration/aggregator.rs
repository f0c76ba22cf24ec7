//! Result aggregation: turns an execution outcome into the caller's reply.

use crate::core::query::Query;
use crate::core::schema::{RelevancyVerdict, ResearchReport};
use crate::core::task::{TaskResult, TaskStatus};
use crate::orchestration::executor::{AbortReason, ExecutionOutcome, RunId, TaskResults};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{info, warn};

/// Findings reported when no attributable answer could be produced.
pub const INCONCLUSIVE_FINDINGS: &str = "Cannot produce a conclusive answer: the research \
did not find enough relevant, attributable information to answer this query.";

/// Successful response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResponse {
    pub query: String,
    pub findings: String,
    pub sources: Vec<Map<String, Value>>,
    pub confidence_score: f64,
    pub related_topics: Vec<String>,
    /// Seconds from graph build to sink completion.
    pub processing_time: f64,
    pub metadata: Option<Map<String, Value>>,
}

/// What the caller receives for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchReply {
    /// Synthesis produced a cited report.
    Answer(ResearchResponse),
    /// The run completed but nothing conclusive could be said.
    Inconclusive(ResearchResponse),
    /// The gate vetoed the query.
    Rejected(RelevancyVerdict),
    /// The run was cancelled before synthesis finished.
    Cancelled { query: String, processing_time: f64 },
}

impl ResearchReply {
    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ResearchReply::Answer(_) | ResearchReply::Inconclusive(_) => 200,
            ResearchReply::Rejected(_) => 400,
            ResearchReply::Cancelled { .. } => 503,
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResearchReply::Answer(_) => 0,
            ResearchReply::Rejected(_) => 2,
            ResearchReply::Inconclusive(_) | ResearchReply::Cancelled { .. } => 3,
        }
    }

    /// JSON body a transport should answer with.
    pub fn body(&self) -> Value {
        match self {
            ResearchReply::Answer(response) | ResearchReply::Inconclusive(response) => {
                serde_json::to_value(response).unwrap_or(Value::Null)
            }
            ResearchReply::Rejected(verdict) => serde_json::to_value(verdict).unwrap_or(Value::Null),
            ResearchReply::Cancelled {
                query,
                processing_time,
            } => json!({
                "query": query,
                "error": "research run cancelled",
                "processing_time": processing_time,
            }),
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, ResearchReply::Answer(_))
    }
}

/// Build the reply for a finished run.
pub fn aggregate(query: &Query, outcome: &ExecutionOutcome) -> ResearchReply {
    let reply = match outcome {
        ExecutionOutcome::Aborted {
            reason: AbortReason::Rejected(verdict),
            ..
        } => ResearchReply::Rejected(verdict.clone()),
        ExecutionOutcome::Aborted {
            reason: AbortReason::Cancelled,
            elapsed,
            ..
        } => ResearchReply::Cancelled {
            query: query.text().to_string(),
            processing_time: seconds(*elapsed),
        },
        ExecutionOutcome::Completed {
            run_id,
            sink,
            results,
            elapsed,
        } => completed(query, *run_id, sink, results, *elapsed),
    };
    info!(
        run_id = %outcome.run_id().short(),
        status = reply.status_code(),
        answer = reply.is_answer(),
        "reply ready"
    );
    reply
}

fn completed(
    query: &Query,
    run_id: RunId,
    sink: &TaskResult,
    results: &TaskResults,
    elapsed: Duration,
) -> ResearchReply {
    let report = match &sink.status {
        TaskStatus::Success { payload } => match payload.decode::<ResearchReport>() {
            Some(report) => Ok(report),
            None => Err("synthesis output is not a research report".to_string()),
        },
        TaskStatus::Failure { reason, .. } => Err(format!("synthesis failed: {}", reason)),
    };

    match report {
        Ok(report) if !report.is_inconclusive() => {
            let metadata = run_metadata(run_id, results, "answer", None, report.metadata);
            ResearchReply::Answer(ResearchResponse {
                query: query.text().to_string(),
                findings: report.findings,
                sources: report.sources,
                confidence_score: report.confidence_score,
                related_topics: report.related_topics,
                processing_time: seconds(elapsed),
                metadata: Some(metadata),
            })
        }
        Ok(report) => {
            let metadata = run_metadata(
                run_id,
                results,
                "inconclusive",
                Some("report cites no sources"),
                report.metadata,
            );
            ResearchReply::Inconclusive(inconclusive(query, report.related_topics, elapsed, metadata))
        }
        Err(reason) => {
            warn!(run_id = %run_id.short(), %reason, "no conclusive answer");
            let metadata = run_metadata(run_id, results, "inconclusive", Some(&reason), None);
            ResearchReply::Inconclusive(inconclusive(query, Vec::new(), elapsed, metadata))
        }
    }
}

fn inconclusive(
    query: &Query,
    related_topics: Vec<String>,
    elapsed: Duration,
    metadata: Map<String, Value>,
) -> ResearchResponse {
    ResearchResponse {
        query: query.text().to_string(),
        findings: INCONCLUSIVE_FINDINGS.to_string(),
        sources: Vec::new(),
        confidence_score: 0.0,
        related_topics,
        processing_time: seconds(elapsed),
        metadata: Some(metadata),
    }
}

/// Run metadata merged over whatever metadata the report carried.
fn run_metadata(
    run_id: RunId,
    results: &TaskResults,
    outcome: &str,
    reason: Option<&str>,
    report_metadata: Option<Map<String, Value>>,
) -> Map<String, Value> {
    let mut nodes = Map::new();
    for result in results.iter() {
        let mut node = Map::new();
        node.insert(
            "status".to_string(),
            json!(if result.is_success() { "success" } else { "failure" }),
        );
        if let Some(reason) = result.failure_reason() {
            node.insert("reason".to_string(), json!(reason));
        }
        node.insert("elapsed_ms".to_string(), json!(result.elapsed_ms()));
        nodes.insert(result.task_id.to_string(), Value::Object(node));
    }

    let mut metadata = report_metadata.unwrap_or_default();
    metadata.insert("run_id".to_string(), json!(run_id.to_string()));
    metadata.insert("outcome".to_string(), json!(outcome));
    if let Some(reason) = reason {
        metadata.insert("reason".to_string(), json!(reason));
    }
    metadata.insert("nodes".to_string(), Value::Object(nodes));
    metadata
}

fn seconds(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64()
}
