//! Executor for dependency-ordered task graphs.
//!
//! The executor runs the gate alone, then walks the remaining tasks level
//! by level. Within a level, concurrency-eligible tasks are dispatched
//! together; once they finish, the others run one at a time in declaration
//! order. Each
//! task sees the complete payload of every dependency; a task whose
//! dependency failed is recorded as failed without being invoked.
//!
//! Node-level problems (capability errors, timeouts, schema mismatches)
//! become `TaskStatus::Failure` records. Only a gate rejection or an
//! external cancellation ends a run early.

use crate::artifacts::ArtifactSink;
use crate::capability::{Capabilities, CapabilityError, Invocation, SearchHit};
use crate::core::dag::TaskGraph;
use crate::core::query::Query;
use crate::core::schema::{
    check_citations, normalize_source, OutputSchema, RelevancyVerdict, ResearchReport,
    SearchQueries,
};
use crate::core::task::{Payload, TaskId, TaskResult, TaskSpec};
use crate::error::{Error, Result};
use chrono::Utc;
use futures::future::{join_all, try_join_all};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `{query}` and `{context}` placeholders in instruction templates.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(query|context)\}").unwrap());

/// Reason recorded for a task skipped because of a failed dependency.
pub fn upstream_failure_reason(dependency: &TaskId) -> String {
    format!("upstream dependency failed: {}", dependency)
}

pub const SCHEMA_FAILURE_REASON: &str = "schema validation failed";
pub const TIMEOUT_REASON: &str = "timeout";

/// Unique identifier for one execution of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Limit for each capability call; `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    /// Retries for transient capability errors. Zero disables retrying.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Search queries sent to each tool per node.
    pub max_queries_per_tool: usize,
    /// Require every cited source to match retrieved evidence.
    pub strict_citations: bool,
    pub artifact_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout: None,
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
            max_queries_per_tool: 5,
            strict_citations: true,
            artifact_dir: None,
        }
    }
}

/// Events emitted as a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// A task began executing.
    NodeStarted { task_id: TaskId },
    /// A task finished with a payload.
    NodeSucceeded { task_id: TaskId },
    /// A task finished without a payload.
    NodeFailed { task_id: TaskId, reason: String },
    /// The gate vetoed the query.
    GateRejected { verdict: RelevancyVerdict },
    /// The run reached its outcome.
    RunFinished { completed: bool },
}

/// Write-once record of every finished task in a run.
#[derive(Debug, Clone, Default)]
pub struct TaskResults {
    results: HashMap<TaskId, TaskResult>,
    /// Completion order.
    order: Vec<TaskId>,
}

impl TaskResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateResult` if the task already has one.
    pub fn record(&mut self, result: TaskResult) -> Result<()> {
        if self.results.contains_key(&result.task_id) {
            return Err(Error::DuplicateResult(result.task_id.to_string()));
        }
        self.order.push(result.task_id.clone());
        self.results.insert(result.task_id.clone(), result);
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.results.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Results in completion order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskResult> {
        self.order.iter().filter_map(|id| self.results.get(id))
    }

    /// Normalized identifiers of all retrieved evidence.
    pub fn evidence_sources(&self) -> HashSet<String> {
        self.iter()
            .filter_map(TaskResult::payload)
            .flat_map(|p| p.evidence.iter())
            .map(|hit| normalize_source(&hit.source))
            .collect()
    }
}

/// Why a run stopped before its sink finished.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// The relevancy gate judged the query not researchable.
    Rejected(RelevancyVerdict),
    /// The run was cancelled from outside.
    Cancelled,
}

/// Terminal value of a run. Produced exactly once per execution.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// The sink reached a terminal status, successful or not.
    Completed {
        run_id: RunId,
        sink: TaskResult,
        results: TaskResults,
        /// From graph build to sink completion.
        elapsed: Duration,
    },
    /// The run stopped early; `partial` holds what finished.
    Aborted {
        run_id: RunId,
        reason: AbortReason,
        partial: TaskResults,
        elapsed: Duration,
    },
}

impl ExecutionOutcome {
    pub fn run_id(&self) -> RunId {
        match self {
            ExecutionOutcome::Completed { run_id, .. }
            | ExecutionOutcome::Aborted { run_id, .. } => *run_id,
        }
    }

    pub fn results(&self) -> &TaskResults {
        match self {
            ExecutionOutcome::Completed { results, .. } => results,
            ExecutionOutcome::Aborted { partial, .. } => partial,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            ExecutionOutcome::Completed { elapsed, .. }
            | ExecutionOutcome::Aborted { elapsed, .. } => *elapsed,
        }
    }
}

/// Runs one task graph against a capability pool.
///
/// # Example
///
/// ```ignore
/// let graph = research_graph(&query)?;
/// let outcome = Executor::new(&graph, &query, &capabilities, &config)
///     .with_events(event_tx)
///     .run()
///     .await?;
/// ```
pub struct Executor<'a> {
    graph: &'a TaskGraph,
    query: &'a Query,
    capabilities: &'a Capabilities,
    config: &'a ExecutorConfig,
    event_tx: Option<mpsc::Sender<ExecutionEvent>>,
    cancel: CancellationToken,
    artifacts: Option<ArtifactSink>,
    run_id: RunId,
}

impl<'a> Executor<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        query: &'a Query,
        capabilities: &'a Capabilities,
        config: &'a ExecutorConfig,
    ) -> Self {
        Self {
            graph,
            query,
            capabilities,
            config,
            event_tx: None,
            cancel: CancellationToken::new(),
            artifacts: config.artifact_dir.clone().map(ArtifactSink::new),
            run_id: RunId::new(),
        }
    }

    /// Emit progress events on `event_tx`.
    pub fn with_events(mut self, event_tx: mpsc::Sender<ExecutionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Use a caller-owned token so the run can be cancelled externally.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Token cancelled when the run is aborted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the graph to its outcome.
    ///
    /// # Errors
    ///
    /// Only malformed graphs produce an error; node failures are recorded
    /// in the outcome.
    pub async fn run(self) -> Result<ExecutionOutcome> {
        let mut results = TaskResults::new();
        info!(run_id = %self.run_id.short(), query = %self.query, tasks = self.graph.len(), "run started");

        let gate_id = self.graph.gate().clone();
        let gate = self
            .graph
            .get(&gate_id)
            .ok_or_else(|| Error::InvalidGraph(format!("gate {} missing", gate_id)))?;

        if self.cancel.is_cancelled() {
            return Ok(self.abort(AbortReason::Cancelled, results).await);
        }
        let gate_result = self.run_task(gate, &results).await;
        if self.cancel.is_cancelled() {
            // A gate answer arriving after cancellation is discarded.
            return Ok(self.abort(AbortReason::Cancelled, results).await);
        }
        self.finish_task(&gate_result).await;
        if !gate_result.is_success() {
            info!(
                run_id = %self.run_id.short(),
                dependents = self.graph.dependents(&gate_id).len(),
                "gate failed; nodes independent of it still run but its dependents cannot succeed"
            );
        }
        let verdict = gate_result.payload().and_then(|p| p.decode::<RelevancyVerdict>());
        results.record(gate_result)?;

        if let Some(verdict) = verdict.filter(|v| !v.relevant) {
            info!(run_id = %self.run_id.short(), reasons = ?verdict.reasons, "query rejected by gate");
            self.cancel.cancel();
            self.emit(ExecutionEvent::GateRejected {
                verdict: verdict.clone(),
            })
            .await;
            return Ok(self.abort(AbortReason::Rejected(verdict), results).await);
        }

        for level in self.graph.levels()? {
            if self.cancel.is_cancelled() {
                return Ok(self.abort(AbortReason::Cancelled, results).await);
            }

            let mut concurrent = Vec::new();
            let mut sequential = Vec::new();
            for id in &level {
                let spec = self
                    .graph
                    .get(id)
                    .ok_or_else(|| Error::InvalidGraph(format!("task {} missing", id)))?;
                if let Some(failed) = self.failed_dependency(spec, &results) {
                    let reason = upstream_failure_reason(failed);
                    debug!(run_id = %self.run_id.short(), task_id = %spec.id, %reason, "skipping task");
                    let skipped = TaskResult::failure(spec.id.clone(), &reason, Utc::now());
                    self.finish_task(&skipped).await;
                    results.record(skipped)?;
                } else if spec.concurrent {
                    concurrent.push(spec);
                } else {
                    sequential.push(spec);
                }
            }

            debug!(
                run_id = %self.run_id.short(),
                concurrent = concurrent.len(),
                sequential = sequential.len(),
                "dispatching level"
            );

            // Concurrent nodes run as one wave; the rest run alone afterwards.
            // In-flight calls see cancellation through their child tokens and
            // are allowed to return.
            let parallel = join_all(concurrent.iter().map(|spec| self.run_task(spec, &results))).await;
            let mut serial = Vec::with_capacity(sequential.len());
            for spec in &sequential {
                if self.cancel.is_cancelled() {
                    break;
                }
                serial.push(self.run_task(spec, &results).await);
            }

            if self.cancel.is_cancelled() {
                debug!(
                    run_id = %self.run_id.short(),
                    discarded = parallel.len() + serial.len(),
                    "discarding results finished after cancellation"
                );
                return Ok(self.abort(AbortReason::Cancelled, results).await);
            }

            for result in parallel.into_iter().chain(serial) {
                self.finish_task(&result).await;
                results.record(result)?;
            }
        }

        let sink = results
            .get(self.graph.sink())
            .cloned()
            .ok_or_else(|| Error::InvalidGraph(format!("sink {} never ran", self.graph.sink())))?;
        let elapsed = self.graph.built_at().elapsed();
        info!(
            run_id = %self.run_id.short(),
            sink = %sink.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "run completed"
        );
        self.emit(ExecutionEvent::RunFinished { completed: true }).await;

        Ok(ExecutionOutcome::Completed {
            run_id: self.run_id,
            sink,
            results,
            elapsed,
        })
    }

    async fn abort(&self, reason: AbortReason, partial: TaskResults) -> ExecutionOutcome {
        self.cancel.cancel();
        if reason == AbortReason::Cancelled {
            warn!(run_id = %self.run_id.short(), finished = partial.len(), "run cancelled");
        }
        self.emit(ExecutionEvent::RunFinished { completed: false }).await;
        ExecutionOutcome::Aborted {
            run_id: self.run_id,
            reason,
            partial,
            elapsed: self.graph.built_at().elapsed(),
        }
    }

    /// First declared dependency without a successful result.
    fn failed_dependency<'s>(&self, spec: &'s TaskSpec, results: &TaskResults) -> Option<&'s TaskId> {
        spec.dependencies
            .iter()
            .find(|dep| !results.get(dep).is_some_and(TaskResult::is_success))
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Log, emit and persist a finished task.
    async fn finish_task(&self, result: &TaskResult) {
        match result.failure_reason() {
            None => {
                debug!(run_id = %self.run_id.short(), task_id = %result.task_id, elapsed_ms = result.elapsed_ms(), "task succeeded");
                self.emit(ExecutionEvent::NodeSucceeded {
                    task_id: result.task_id.clone(),
                })
                .await;
            }
            Some(reason) => {
                warn!(run_id = %self.run_id.short(), task_id = %result.task_id, %reason, "task failed");
                self.emit(ExecutionEvent::NodeFailed {
                    task_id: result.task_id.clone(),
                    reason: reason.to_string(),
                })
                .await;
            }
        }

        if let Some(sink) = &self.artifacts {
            if let Some(file_name) = self
                .graph
                .get(&result.task_id)
                .and_then(|spec| spec.output_sink.as_deref())
            {
                sink.write(file_name, result).await;
            }
        }
    }

    /// Execute one task whose dependencies have all succeeded.
    async fn run_task(&self, spec: &TaskSpec, results: &TaskResults) -> TaskResult {
        let started_at = Utc::now();
        self.emit(ExecutionEvent::NodeStarted {
            task_id: spec.id.clone(),
        })
        .await;

        let mut context = String::new();
        for dep in &spec.dependencies {
            let Some(payload) = results.get(dep).and_then(TaskResult::payload) else {
                return TaskResult::failure(spec.id.clone(), &upstream_failure_reason(dep), started_at);
            };
            context.push_str(&format!("## Output of {}\n{}\n\n", dep, payload.text));
        }

        let evidence = match self.gather_evidence(spec, results).await {
            Ok(evidence) => evidence,
            Err(e) => return TaskResult::failure(spec.id.clone(), &failure_reason(&e), started_at),
        };
        if !spec.tools.is_empty() {
            context.push_str(&render_evidence(&evidence));
        }

        if spec.requires_evidence && evidence.is_empty() {
            let tools: Vec<&str> = spec.tools.iter().map(|t| t.as_str()).collect();
            let text = format!(
                "No results were found by {} for '{}'. No information is reported.",
                tools.join(", "),
                self.query.text()
            );
            debug!(run_id = %self.run_id.short(), task_id = %spec.id, "no evidence, model not invoked");
            return TaskResult::success(spec.id.clone(), Payload::text(&text), started_at);
        }

        let mut instructions = self.render(&spec.instructions);
        instructions.push_str("\n\nExpected output: ");
        instructions.push_str(&self.render(&spec.expected_output));
        if let Some(schema) = spec.schema {
            instructions.push_str("\n\n");
            instructions.push_str(&schema.describe());
        }

        let invocation = Invocation {
            task_id: spec.id.to_string(),
            role: spec.role.clone(),
            instructions,
            context: context.trim_end().to_string(),
            schema: spec.schema,
            tools: spec.tools.clone(),
            cancel: self.cancel.child_token(),
        };

        let raw = match self
            .call_with_policy(&spec.id, || self.capabilities.model.invoke(invocation.clone()))
            .await
        {
            Ok(raw) => raw,
            Err(e) => return TaskResult::failure(spec.id.clone(), &failure_reason(&e), started_at),
        };

        let structured = match spec.schema {
            Some(schema) => match schema.validate(&raw) {
                Ok(value) => Some(value),
                Err(violation) => {
                    debug!(run_id = %self.run_id.short(), task_id = %spec.id, %violation, "output rejected");
                    return TaskResult::failure_with_detail(
                        spec.id.clone(),
                        SCHEMA_FAILURE_REASON,
                        Some(violation.to_string()),
                        started_at,
                    );
                }
            },
            None => None,
        };

        if spec.schema == Some(OutputSchema::ResearchReport) && self.config.strict_citations {
            let report = structured
                .as_ref()
                .and_then(|v| serde_json::from_value::<ResearchReport>(v.clone()).ok());
            if let Some(report) = report {
                if let Err(detail) = check_citations(&report, &results.evidence_sources()) {
                    return TaskResult::failure(
                        spec.id.clone(),
                        &format!("citation check failed: {}", detail),
                        started_at,
                    );
                }
            }
        }

        let text = match &structured {
            Some(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| raw.trim().to_string()),
            None => raw.trim().to_string(),
        };

        TaskResult::success(
            spec.id.clone(),
            Payload {
                text,
                structured,
                evidence,
            },
            started_at,
        )
    }

    /// Substitute `{query}` and `{context}` in a single pass.
    fn render(&self, template: &str) -> String {
        let fragment = self.query.context_fragment();
        PLACEHOLDER_RE
            .replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
                "query" => self.query.text().to_string(),
                _ => fragment.clone(),
            })
            .into_owned()
    }

    /// Queries sent to the task's tools: those produced by a
    /// search-query dependency, or the user's query.
    fn search_queries(&self, spec: &TaskSpec, results: &TaskResults) -> Vec<String> {
        let mut queries: Vec<String> = Vec::new();
        for dep in &spec.dependencies {
            let decoded = results
                .get(dep)
                .and_then(TaskResult::payload)
                .and_then(|p| p.decode::<SearchQueries>());
            if let Some(decoded) = decoded {
                for q in decoded.queries {
                    let q = q.trim().to_string();
                    if !q.is_empty() && !queries.contains(&q) {
                        queries.push(q);
                    }
                }
            }
        }
        if queries.is_empty() {
            queries.push(self.query.text().to_string());
        }
        queries.truncate(self.config.max_queries_per_tool.max(1));
        queries
    }

    /// Run every tool of the task for every search query.
    async fn gather_evidence(
        &self,
        spec: &TaskSpec,
        results: &TaskResults,
    ) -> std::result::Result<Vec<SearchHit>, CapabilityError> {
        if spec.tools.is_empty() {
            return Ok(Vec::new());
        }
        let queries = self.search_queries(spec, results);

        let mut calls = Vec::new();
        for tool_ref in &spec.tools {
            let bindings = self.capabilities.resolve(*tool_ref);
            if bindings.is_empty() {
                warn!(run_id = %self.run_id.short(), task_id = %spec.id, tool = %tool_ref, "no tool configured");
            }
            for binding in bindings {
                let (tool, filters) = (&binding.tool, &binding.filters);
                for query in &queries {
                    calls.push(async move {
                        let hits = self
                            .call_with_policy(&spec.id, || tool.search(query, Some(filters)))
                            .await?;
                        debug!(task_id = %spec.id, tool = tool.name(), %query, hits = hits.len(), "search finished");
                        Ok::<_, CapabilityError>(filters.apply(hits))
                    });
                }
            }
        }

        let batches = try_join_all(calls).await?;
        let mut seen = HashSet::new();
        Ok(batches
            .into_iter()
            .flatten()
            .filter(|hit| seen.insert((normalize_source(&hit.source), hit.content.clone())))
            .collect())
    }

    /// Apply the timeout and retry policy to one capability call.
    async fn call_with_policy<T, F, Fut>(
        &self,
        task_id: &TaskId,
        mut call: F,
    ) -> std::result::Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, CapabilityError>>,
    {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(CapabilityError::Cancelled);
            }
            let outcome = match self.config.call_timeout {
                Some(limit) => tokio::time::timeout(limit, call())
                    .await
                    .unwrap_or(Err(CapabilityError::Timeout)),
                None => call().await,
            };
            match outcome {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        run_id = %self.run_id.short(),
                        task_id = %task_id,
                        error = %e,
                        attempt,
                        max_retries = self.config.max_retries,
                        "retrying capability call"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                other => return other,
            }
        }
    }
}

fn failure_reason(error: &CapabilityError) -> String {
    match error {
        CapabilityError::Timeout => TIMEOUT_REASON.to_string(),
        CapabilityError::Cancelled => "cancelled".to_string(),
        other => format!("capability error: {}", other),
    }
}

fn render_evidence(evidence: &[SearchHit]) -> String {
    if evidence.is_empty() {
        return "## Retrieved evidence\nNo results were found for any search query.".to_string();
    }
    let mut section = String::from("## Retrieved evidence\n");
    for (n, hit) in evidence.iter().enumerate() {
        section.push_str(&format!(
            "[{}] source: {} (score {:.2})\n{}\n\n",
            n + 1,
            hit.source,
            hit.score,
            hit.content.trim()
        ));
    }
    section
}
