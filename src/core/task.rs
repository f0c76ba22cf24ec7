//! Task data model for the execution graph.
//!
//! A `TaskSpec` declares one unit of work: the worker role that performs
//! it, its instruction template, its output contract, the tools it may
//! use and the upstream tasks whose output it consumes. A `TaskResult` is
//! the immutable record of how that work ended.

use crate::capability::SearchHit;
use crate::core::schema::OutputSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a task within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Reference to a retrieval capability, resolved by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRef {
    VectorSearch,
    WebSearch,
}

impl ToolRef {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolRef::VectorSearch => "vector_search",
            ToolRef::WebSearch => "web_search",
        }
    }
}

impl std::fmt::Display for ToolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persona a worker adopts when invoking the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub goal: String,
    pub backstory: String,
}

impl Role {
    pub fn new(name: &str, goal: &str, backstory: &str) -> Self {
        Self {
            name: name.to_string(),
            goal: goal.to_string(),
            backstory: backstory.to_string(),
        }
    }
}

/// Declarative description of one node in the task graph.
///
/// Instruction and expected-output templates may reference `{query}` and
/// `{context}`; they are rendered by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub role: Role,
    pub instructions: String,
    pub expected_output: String,
    pub schema: Option<OutputSchema>,
    pub tools: Vec<ToolRef>,
    /// Upstream tasks, in declared order, without duplicates.
    pub dependencies: Vec<TaskId>,
    /// May run in parallel with other eligible nodes of the same level.
    pub concurrent: bool,
    /// Relevancy gate: runs first and may abort the whole graph.
    pub gate: bool,
    /// Skip the model and report "no results" when tools find nothing.
    pub requires_evidence: bool,
    /// File name for the per-node artifact, if any.
    pub output_sink: Option<String>,
}

impl TaskSpec {
    pub fn new(id: &str, role: Role, instructions: &str, expected_output: &str) -> Self {
        Self {
            id: TaskId::new(id),
            role,
            instructions: instructions.to_string(),
            expected_output: expected_output.to_string(),
            schema: None,
            tools: Vec::new(),
            dependencies: Vec::new(),
            concurrent: false,
            gate: false,
            requires_evidence: false,
            output_sink: None,
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        for id in ids {
            let id = TaskId::new(id);
            if !self.dependencies.contains(&id) {
                self.dependencies.push(id);
            }
        }
        self
    }

    pub fn with_tools(mut self, tools: &[ToolRef]) -> Self {
        for tool in tools {
            if !self.tools.contains(tool) {
                self.tools.push(*tool);
            }
        }
        self
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_output_sink(mut self, file_name: &str) -> Self {
        self.output_sink = Some(file_name.to_string());
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    pub fn gate(mut self) -> Self {
        self.gate = true;
        self
    }

    pub fn requires_evidence(mut self) -> Self {
        self.requires_evidence = true;
        self
    }
}

/// Completed output of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Full textual output, passed verbatim to dependents.
    pub text: String,
    /// Validated JSON when the node declares an output schema.
    pub structured: Option<Value>,
    /// Retrieval hits gathered while running the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<SearchHit>,
}

impl Payload {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    /// Deserialize the structured output into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.structured
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Terminal status of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// The node produced output that satisfied its contract.
    Success { payload: Payload },
    /// The node did not produce usable output.
    Failure {
        /// Stable, caller-facing reason.
        reason: String,
        /// Diagnostic detail, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Success { .. } => write!(f, "success"),
            TaskStatus::Failure { reason, .. } => write!(f, "failure: {}", reason),
        }
    }
}

/// Immutable record of a finished node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub produced_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(task_id: TaskId, payload: Payload, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Success { payload },
            started_at,
            produced_at: Utc::now(),
        }
    }

    pub fn failure(task_id: TaskId, reason: &str, started_at: DateTime<Utc>) -> Self {
        Self::failure_with_detail(task_id, reason, None, started_at)
    }

    pub fn failure_with_detail(
        task_id: TaskId,
        reason: &str,
        detail: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failure {
                reason: reason.to_string(),
                detail,
            },
            started_at,
            produced_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Success { .. })
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.status {
            TaskStatus::Success { payload } => Some(payload),
            TaskStatus::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Success { .. } => None,
            TaskStatus::Failure { reason, .. } => Some(reason),
        }
    }

    /// Wall-clock time between start and completion, in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        (self.produced_at - self.started_at).num_milliseconds()
    }
}
