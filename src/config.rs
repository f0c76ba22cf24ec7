use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::capability::{Capabilities, SearchFilters};
use crate::orchestration::command::{CommandModel, CommandSearchTool, DEFAULT_MODEL_COMMAND};
use crate::orchestration::executor::ExecutorConfig;
use crate::{Error, Result};

/// Vector store backend: an external command plus its similarity filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSearchConfig {
    pub command: Option<String>,
    pub limit: Option<usize>,
    pub score_threshold: Option<f64>,
    pub collection: Option<String>,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            command: None,
            limit: Some(5),
            score_threshold: Some(0.5),
            collection: Some("research".to_string()),
        }
    }
}

impl VectorSearchConfig {
    pub fn filters(&self) -> SearchFilters {
        SearchFilters {
            limit: self.limit,
            score_threshold: self.score_threshold,
            collection: self.collection.clone(),
        }
    }
}

/// Web search backend. Web hits carry no similarity score, so only the
/// result count is configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub command: Option<String>,
    pub limit: Option<usize>,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            command: None,
            limit: Some(5),
        }
    }
}

impl WebSearchConfig {
    pub fn filters(&self) -> SearchFilters {
        SearchFilters {
            limit: self.limit,
            ..SearchFilters::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_command: Option<String>,
    pub call_timeout_secs: Option<u64>,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub artifact_dir: Option<String>,
    pub strict_citations: bool,
    pub max_queries_per_tool: usize,
    pub vector_search: VectorSearchConfig,
    pub web_search: WebSearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_command: None,
            call_timeout_secs: None,
            max_retries: 0,
            retry_backoff_ms: 500,
            artifact_dir: None,
            strict_citations: true,
            max_queries_per_tool: 5,
            vector_search: VectorSearchConfig::default(),
            web_search: WebSearchConfig::default(),
        }
    }
}

impl Config {
    pub fn navigator_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".navigator"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::navigator_dir()?.join("navigator.toml"))
    }

    pub fn effective_model_command(&self) -> &str {
        self.model_command.as_deref().unwrap_or(DEFAULT_MODEL_COMMAND)
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            model_command = config.effective_model_command(),
            call_timeout_secs = ?config.call_timeout_secs,
            max_retries = config.max_retries,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.call_timeout_secs == Some(0) {
            return Err(Error::Config("call_timeout_secs must be positive".to_string()));
        }
        if self.max_queries_per_tool == 0 {
            return Err(Error::Config("max_queries_per_tool must be positive".to_string()));
        }
        if let Some(threshold) = self.vector_search.score_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::Config(format!(
                    "vector_search.score_threshold must be within [0, 1], got {}",
                    threshold
                )));
            }
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            call_timeout: self.call_timeout_secs.map(Duration::from_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_queries_per_tool: self.max_queries_per_tool,
            strict_citations: self.strict_citations,
            artifact_dir: self.artifact_dir.as_deref().map(expand_tilde),
        }
    }

    /// Build the subprocess-backed capability pool.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a configured command cannot be found or a
    /// search backend has no command.
    pub fn capabilities(&self) -> Result<Capabilities> {
        let model = CommandModel::from_command_line(self.effective_model_command())?;
        let vector = search_tool("vector_search", self.vector_search.command.as_deref())?;
        let web = search_tool("web_search", self.web_search.command.as_deref())?;
        Ok(Capabilities::new(Arc::new(model))
            .with_vector_search(Arc::new(vector), self.vector_search.filters())
            .with_web_search(Arc::new(web), self.web_search.filters()))
    }

}

fn search_tool(name: &str, command: Option<&str>) -> Result<CommandSearchTool> {
    let command =
        command.ok_or_else(|| Error::Config(format!("[{}] has no command configured", name)))?;
    CommandSearchTool::from_command_line(name, command)
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
