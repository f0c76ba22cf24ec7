//! Optional per-node output files for audit and debugging.
//!
//! One file per node, overwritten on every run. Failures to write are
//! logged and otherwise ignored: artifacts are a side channel, not part of
//! the execution contract.

use crate::core::task::{TaskResult, TaskStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Writes node outputs under a directory.
#[derive(Debug, Clone)]
pub struct ArtifactSink {
    dir: PathBuf,
}

impl ArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Render a result as the text stored in its artifact.
    pub fn render(result: &TaskResult) -> String {
        match &result.status {
            TaskStatus::Success { payload } => payload.text.clone(),
            TaskStatus::Failure { reason, detail } => match detail {
                Some(detail) => format!("FAILED: {}\n{}", reason, detail),
                None => format!("FAILED: {}", reason),
            },
        }
    }

    /// Write `result` to `<dir>/<file_name>`.
    pub async fn write(&self, file_name: &str, result: &TaskResult) {
        let path = self.dir.join(file_name);
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "cannot create artifact directory");
            return;
        }
        match tokio::fs::write(&path, Self::render(result)).await {
            Ok(()) => debug!(task_id = %result.task_id, path = %path.display(), "artifact written"),
            Err(e) => warn!(task_id = %result.task_id, path = %path.display(), error = %e, "artifact write failed"),
        }
    }
}
