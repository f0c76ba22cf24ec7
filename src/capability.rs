//! Seams to the external services the executor calls through.
//!
//! `ModelCapability` runs one worker turn against a language model;
//! `RetrievalTool` searches one backend. Both are object safe so a run can
//! share a single pool of them across concurrently executing nodes.

use crate::core::schema::OutputSchema;
use crate::core::task::{Role, ToolRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure of a model or retrieval call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CapabilityError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CapabilityError::Transport(_) | CapabilityError::RateLimited(_)
        )
    }
}

/// One model call made on behalf of a node.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub task_id: String,
    pub role: Role,
    /// Rendered instructions, including the expected-output description.
    pub instructions: String,
    /// Upstream payloads and retrieval evidence.
    pub context: String,
    pub schema: Option<OutputSchema>,
    /// Names of the tools whose evidence is included in `context`.
    pub tools: Vec<ToolRef>,
    /// Signalled when the run no longer needs this result.
    pub cancel: CancellationToken,
}

impl Invocation {
    /// Single prompt combining role, instructions and context, for
    /// backends that take one block of text.
    pub fn to_prompt(&self) -> String {
        let mut prompt = format!(
            "You are the {}.\nGoal: {}\n{}\n\n# Task\n{}",
            self.role.name, self.role.goal, self.role.backstory, self.instructions
        );
        if !self.context.is_empty() {
            prompt.push_str("\n\n# Context\n");
            prompt.push_str(&self.context);
        }
        prompt
    }
}

/// Language-model worker capability.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    /// Run one invocation and return the raw text output.
    ///
    /// Structured output is validated by the caller; implementations must
    /// not coerce or repair it.
    async fn invoke(&self, invocation: Invocation) -> Result<String, CapabilityError>;
}

/// A single retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub source: String,
    #[serde(default)]
    pub score: f64,
}

/// Optional constraints for a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub limit: Option<usize>,
    pub score_threshold: Option<f64>,
    pub collection: Option<String>,
}

impl SearchFilters {
    /// Drop hits below the threshold and truncate to the limit, keeping
    /// the backend's order.
    pub fn apply(&self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        let threshold = self.score_threshold;
        let mut hits: Vec<SearchHit> = hits
            .into_iter()
            .filter(|h| threshold.map_or(true, |t| h.score >= t))
            .collect();
        if let Some(limit) = self.limit {
            hits.truncate(limit);
        }
        hits
    }
}

/// Retrieval capability (vector search, web search).
///
/// An empty result is a valid answer; implementations must never invent
/// hits.
#[async_trait]
pub trait RetrievalTool: Send + Sync {
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchHit>, CapabilityError>;
}

/// A retrieval tool together with the filters applied to its searches.
#[derive(Clone)]
pub struct ToolBinding {
    pub tool: Arc<dyn RetrievalTool>,
    pub filters: SearchFilters,
}

/// Shared, read-only pool of capabilities for one or more runs.
#[derive(Clone)]
pub struct Capabilities {
    pub model: Arc<dyn ModelCapability>,
    pub vector_search: Vec<ToolBinding>,
    pub web_search: Vec<ToolBinding>,
}

impl Capabilities {
    pub fn new(model: Arc<dyn ModelCapability>) -> Self {
        Self {
            model,
            vector_search: Vec::new(),
            web_search: Vec::new(),
        }
    }

    /// Register a vector store; `filters` apply to this tool only.
    pub fn with_vector_search(mut self, tool: Arc<dyn RetrievalTool>, filters: SearchFilters) -> Self {
        self.vector_search.push(ToolBinding { tool, filters });
        self
    }

    /// Register a web search backend; `filters` apply to this tool only.
    pub fn with_web_search(mut self, tool: Arc<dyn RetrievalTool>, filters: SearchFilters) -> Self {
        self.web_search.push(ToolBinding { tool, filters });
        self
    }

    /// Tools a reference resolves to.
    pub fn resolve(&self, tool: ToolRef) -> &[ToolBinding] {
        match tool {
            ToolRef::VectorSearch => &self.vector_search,
            ToolRef::WebSearch => &self.web_search,
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |bindings: &[ToolBinding]| {
            bindings
                .iter()
                .map(|b| b.tool.name().to_string())
                .collect::<Vec<_>>()
        };
        f.debug_struct("Capabilities")
            .field("vector_search", &names(&self.vector_search))
            .field("web_search", &names(&self.web_search))
            .finish()
    }
}
