//! Subprocess-backed capabilities.
//!
//! `CommandModel` drives a headless model CLI (by default
//! `claude -p --output-format json`) and unwraps its JSON envelope.
//! `CommandSearchTool` runs an external search command that prints a JSON
//! array of `{content, source, score}` hits on stdout.

use crate::capability::{
    CapabilityError, Invocation, ModelCapability, RetrievalTool, SearchFilters, SearchHit,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_MODEL_COMMAND: &str = "claude -p --output-format json";

/// Envelope printed by `claude --output-format json`.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    response_type: Option<String>,
    subtype: Option<String>,
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Split a command line on whitespace and resolve the program on `PATH`.
fn resolve(command_line: &str) -> Result<(PathBuf, Vec<String>)> {
    let mut parts = command_line.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Error::Config("empty command".to_string()))?;
    let binary = which::which(program)
        .map_err(|_| Error::Config(format!("command not found: {}", program)))?;
    Ok((binary, parts.map(str::to_string).collect()))
}

/// Run `binary args.. last_arg`, stopping early if `cancel` fires.
async fn run(
    binary: &Path,
    args: &[String],
    last_arg: &str,
    envs: &[(&str, String)],
    cancel: &CancellationToken,
) -> std::result::Result<Output, CapabilityError> {
    let mut command = Command::new(binary);
    command.args(args).arg(last_arg).kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(CapabilityError::Cancelled),
        output = command.output() => output.map_err(|e| {
            CapabilityError::Transport(format!("failed to run {}: {}", binary.display(), e))
        }),
    }
}

fn exit_failure(output: &Output) -> CapabilityError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = if stderr.trim().is_empty() {
        format!(
            "command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        )
    } else {
        stderr.trim().to_string()
    };
    classify(message)
}

fn classify(message: String) -> CapabilityError {
    let lower = message.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("overloaded") {
        CapabilityError::RateLimited(message)
    } else {
        CapabilityError::Transport(message)
    }
}

/// Headless model CLI capability.
#[derive(Debug, Clone)]
pub struct CommandModel {
    binary: PathBuf,
    args: Vec<String>,
}

impl CommandModel {
    /// Build from a command line such as `claude -p --output-format json`.
    /// The prompt is appended as the final argument.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the program cannot be found.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let (binary, args) = resolve(command_line)?;
        Ok(Self { binary, args })
    }

    /// Use a specific binary, bypassing `PATH` lookup.
    pub fn with_binary(binary: PathBuf, args: Vec<String>) -> Self {
        Self { binary, args }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Extract the model's text from the command's stdout.
    ///
    /// JSON envelopes are unwrapped; anything else is returned as is.
    pub fn parse_output(stdout: &str) -> std::result::Result<String, CapabilityError> {
        let envelope = serde_json::from_str::<RawEnvelope>(stdout.trim())
            .ok()
            .filter(|raw| raw.response_type.as_deref() == Some("result") || raw.subtype.is_some());
        let Some(raw) = envelope else {
            return Ok(stdout.trim().to_string());
        };

        let failed = raw.is_error || raw.subtype.as_deref().is_some_and(|s| s.starts_with("error"));
        if failed {
            let message = raw
                .error
                .or(raw.result)
                .unwrap_or_else(|| raw.subtype.unwrap_or_default());
            return Err(classify(message));
        }
        raw.result
            .ok_or_else(|| CapabilityError::InvalidResponse("envelope has no result".to_string()))
    }
}

#[async_trait]
impl ModelCapability for CommandModel {
    async fn invoke(&self, invocation: Invocation) -> std::result::Result<String, CapabilityError> {
        let prompt = invocation.to_prompt();
        debug!(
            task_id = %invocation.task_id,
            binary = %self.binary.display(),
            prompt_len = prompt.len(),
            "invoking model command"
        );
        let output = run(&self.binary, &self.args, &prompt, &[], &invocation.cancel).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            // Error envelopes are still printed on stdout.
            Self::parse_output(&stdout)?;
            return Err(exit_failure(&output));
        }
        Self::parse_output(&stdout)
    }
}

/// External search command capability.
///
/// The query is appended as the final argument; filters are passed as
/// `NAVIGATOR_LIMIT`, `NAVIGATOR_SCORE_THRESHOLD` and
/// `NAVIGATOR_COLLECTION` environment variables.
#[derive(Debug, Clone)]
pub struct CommandSearchTool {
    name: String,
    binary: PathBuf,
    args: Vec<String>,
}

impl CommandSearchTool {
    /// # Errors
    ///
    /// Returns `Error::Config` if the program cannot be found.
    pub fn from_command_line(name: &str, command_line: &str) -> Result<Self> {
        let (binary, args) = resolve(command_line)?;
        Ok(Self {
            name: name.to_string(),
            binary,
            args,
        })
    }

    pub fn with_binary(name: &str, binary: PathBuf, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            binary,
            args,
        }
    }

    pub fn parse_hits(stdout: &str) -> std::result::Result<Vec<SearchHit>, CapabilityError> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(trimmed)
            .map_err(|e| CapabilityError::InvalidResponse(format!("search output: {}", e)))
    }
}

#[async_trait]
impl RetrievalTool for CommandSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        query: &str,
        filters: Option<&SearchFilters>,
    ) -> std::result::Result<Vec<SearchHit>, CapabilityError> {
        let mut envs = Vec::new();
        if let Some(filters) = filters {
            if let Some(limit) = filters.limit {
                envs.push(("NAVIGATOR_LIMIT", limit.to_string()));
            }
            if let Some(threshold) = filters.score_threshold {
                envs.push(("NAVIGATOR_SCORE_THRESHOLD", threshold.to_string()));
            }
            if let Some(collection) = &filters.collection {
                envs.push(("NAVIGATOR_COLLECTION", collection.clone()));
            }
        }

        // Searches are short; they are not tied to a run's token.
        let output = run(&self.binary, &self.args, query, &envs, &CancellationToken::new()).await?;
        if !output.status.success() {
            return Err(exit_failure(&output));
        }
        let hits = Self::parse_hits(&String::from_utf8_lossy(&output.stdout))?;
        debug!(tool = %self.name, %query, hits = hits.len(), "search command finished");
        Ok(hits)
    }
}
