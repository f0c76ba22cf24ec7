//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted model capability that answers per node
//! - Static search tools with optional delay or failure
//! - Canned node outputs for the research graph

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use navigator::capability::{
    Capabilities, CapabilityError, Invocation, ModelCapability, RetrievalTool, SearchFilters,
    SearchHit,
};
use navigator::orchestration::{ExecutionEvent, ExecutionOutcome, Executor, ExecutorConfig};
use navigator::research::{
    research_graph, QUERY_GENERATION, RELEVANCE_FILTER, RELEVANCY_GATE, SYNTHESIS,
};
use navigator::Query;

pub const KB_SOURCE: &str = "kb://botany/photosynthesis";
pub const WEB_SOURCE: &str = "https://en.wikipedia.org/wiki/Photosynthesis";

/// One recorded model call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub task_id: String,
    pub instructions: String,
    pub context: String,
}

/// Model capability answering from a per-node script.
///
/// Unscripted nodes answer `output of <id>`.
#[derive(Default)]
pub struct ScriptedModel {
    replies: HashMap<String, Result<String, CapabilityError>>,
    delays: HashMap<String, Duration>,
    /// Errors returned before the scripted reply, per node.
    flaky: Mutex<HashMap<String, (u32, CapabilityError)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, task_id: &str, text: &str) -> Self {
        self.replies.insert(task_id.to_string(), Ok(text.to_string()));
        self
    }

    pub fn fail(mut self, task_id: &str, error: CapabilityError) -> Self {
        self.replies.insert(task_id.to_string(), Err(error));
        self
    }

    pub fn delay(mut self, task_id: &str, delay: Duration) -> Self {
        self.delays.insert(task_id.to_string(), delay);
        self
    }

    /// Fail `times` times with `error` before answering.
    pub fn flaky(self, task_id: &str, times: u32, error: CapabilityError) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(task_id.to_string(), (times, error));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Node ids in invocation order.
    pub fn called_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.task_id).collect()
    }

    pub fn was_called(&self, task_id: &str) -> bool {
        self.called_ids().iter().any(|id| id == task_id)
    }

    pub fn call_for(&self, task_id: &str) -> Option<RecordedCall> {
        self.calls().into_iter().find(|c| c.task_id == task_id)
    }
}

#[async_trait]
impl ModelCapability for ScriptedModel {
    async fn invoke(&self, invocation: Invocation) -> Result<String, CapabilityError> {
        self.calls.lock().unwrap().push(RecordedCall {
            task_id: invocation.task_id.clone(),
            instructions: invocation.instructions.clone(),
            context: invocation.context.clone(),
        });

        if let Some(delay) = self.delays.get(&invocation.task_id) {
            tokio::time::sleep(*delay).await;
        }

        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some((left, error)) = flaky.get_mut(&invocation.task_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(error.clone());
                }
            }
        }

        self.replies
            .get(&invocation.task_id)
            .cloned()
            .unwrap_or_else(|| Ok(format!("output of {}", invocation.task_id)))
    }
}

/// Search tool returning a fixed list of hits.
pub struct StaticSearchTool {
    name: String,
    hits: Vec<SearchHit>,
    delay: Option<Duration>,
    failure: Option<CapabilityError>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearchTool {
    pub fn new(name: &str, hits: Vec<SearchHit>) -> Self {
        Self {
            name: name.to_string(),
            hits,
            delay: None,
            failure: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, error: CapabilityError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Queries received, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalTool for StaticSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        query: &str,
        _filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.hits.clone()),
        }
    }
}

pub fn hit(source: &str, content: &str, score: f64) -> SearchHit {
    SearchHit {
        content: content.to_string(),
        source: source.to_string(),
        score,
    }
}

pub fn kb_hits() -> Vec<SearchHit> {
    vec![hit(
        KB_SOURCE,
        "Photosynthesis converts light energy into chemical energy stored in glucose.",
        0.92,
    )]
}

pub fn web_hits() -> Vec<SearchHit> {
    vec![hit(
        WEB_SOURCE,
        "Photosynthesis is the process used by plants to convert light into chemical energy.",
        0.88,
    )]
}

pub fn verdict(query: &str, relevant: bool, reasons: &[&str]) -> String {
    json!({
        "query": query,
        "relevant": relevant,
        "reasons": if reasons.is_empty() { json!(null) } else { json!(reasons) },
        "suggestions": if relevant { json!(null) } else { json!(["Ask about a specific topic"]) },
    })
    .to_string()
}

pub fn search_queries() -> String {
    json!({
        "queries": [
            "photosynthesis definition",
            "light dependent reactions",
            "calvin cycle steps",
            "chlorophyll role in photosynthesis",
            "photosynthesis equation",
        ]
    })
    .to_string()
}

pub fn report(sources: &[&str]) -> String {
    let sources: Vec<_> = sources.iter().map(|s| json!({ "source": s })).collect();
    let findings = if sources.is_empty() {
        "A conclusive answer cannot be generated from the available data."
    } else {
        "Photosynthesis converts light energy into chemical energy [1][2]."
    };
    // Fenced, as models often reply.
    format!(
        "Here is the report:\n```json\n{}\n```",
        json!({
            "findings": findings,
            "sources": sources,
            "confidence_score": if sources.is_empty() { 0.0 } else { 0.85 },
            "related_topics": ["chlorophyll", "calvin cycle"],
            "metadata": { "model": "scripted" },
        })
    )
}

/// Model for a relevant query whose report cites both retrieved sources.
pub fn happy_model(query: &str) -> ScriptedModel {
    ScriptedModel::new()
        .reply(RELEVANCY_GATE, &verdict(query, true, &[]))
        .reply(QUERY_GENERATION, &search_queries())
        .reply(RELEVANCE_FILTER, "Relevant: glucose storage (kb), light conversion (web).")
        .reply(SYNTHESIS, &report(&[KB_SOURCE, WEB_SOURCE]))
}

pub fn capabilities(
    model: Arc<ScriptedModel>,
    vector: Arc<StaticSearchTool>,
    web: Arc<StaticSearchTool>,
) -> Capabilities {
    Capabilities::new(model)
        .with_vector_search(vector, SearchFilters::default())
        .with_web_search(web, SearchFilters::default())
}

/// Harness holding a scripted pool for one query.
pub struct ResearchHarness {
    pub query: Query,
    pub model: Arc<ScriptedModel>,
    pub vector: Arc<StaticSearchTool>,
    pub web: Arc<StaticSearchTool>,
    pub config: ExecutorConfig,
}

impl ResearchHarness {
    pub fn new(query: &str, model: ScriptedModel) -> Self {
        Self {
            query: Query::new(query).expect("valid query"),
            model: Arc::new(model),
            vector: Arc::new(StaticSearchTool::new("kb", kb_hits())),
            web: Arc::new(StaticSearchTool::new("web", web_hits())),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_vector(mut self, tool: StaticSearchTool) -> Self {
        self.vector = Arc::new(tool);
        self
    }

    pub fn with_web(mut self, tool: StaticSearchTool) -> Self {
        self.web = Arc::new(tool);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        capabilities(self.model.clone(), self.vector.clone(), self.web.clone())
    }

    /// Build the research graph and execute it.
    pub async fn execute(&self) -> ExecutionOutcome {
        self.execute_with(None, CancellationToken::new()).await
    }

    pub async fn execute_with(
        &self,
        events: Option<mpsc::Sender<ExecutionEvent>>,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let graph = research_graph(&self.query).expect("graph builds");
        let capabilities = self.capabilities();
        let mut executor =
            Executor::new(&graph, &self.query, &capabilities, &self.config).with_cancellation(cancel);
        if let Some(tx) = events {
            executor = executor.with_events(tx);
        }
        executor.run().await.expect("run completes")
    }
}

/// Drain every event currently buffered.
pub fn drain(rx: &mut mpsc::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
