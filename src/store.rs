//! Result file persistence
//!
//! Per-run results land under `results/<runLabel>/benchmark-<timestamp>.json`;
//! agent-driven runs use the `agent-benchmark-` prefix. Historical files
//! contain either a bare array of results or a `{ "results": [...] }`
//! wrapper, and the loader accepts both.

use chrono::Utc;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::aggregate::RunSummary;
use crate::types::TaskExecutionResult;

/// Result store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Result file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Result file JSON invalid: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    base_dir: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResultFile {
    Wrapped { results: Vec<TaskExecutionResult> },
    Bare(Vec<TaskExecutionResult>),
}

impl ResultStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn run_dir(&self, label: &str) -> PathBuf {
        self.base_dir.join(label)
    }

    fn timestamp() -> String {
        Utc::now().format("%Y%m%d-%H%M%S").to_string()
    }

    /// Write the run's results in the wrapped layout. Returns the file path.
    pub fn save_results(
        &self,
        label: &str,
        results: &[TaskExecutionResult],
    ) -> Result<PathBuf, StoreError> {
        let dir = self.run_dir(label);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("benchmark-{}.json", Self::timestamp()));
        let body = serde_json::json!({ "results": results });
        std::fs::write(&path, serde_json::to_vec_pretty(&body)?)?;
        Ok(path)
    }

    /// Write the machine-readable run summary next to the results.
    pub fn save_summary(&self, label: &str, summary: &RunSummary) -> Result<PathBuf, StoreError> {
        let dir = self.run_dir(label);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("summary-{}.json", Self::timestamp()));
        std::fs::write(&path, serde_json::to_vec_pretty(summary)?)?;
        Ok(path)
    }

    /// Read a result file in either historical layout.
    pub fn load_results(path: &Path) -> Result<Vec<TaskExecutionResult>, StoreError> {
        let content = std::fs::read(path)?;
        let file: ResultFile = serde_json::from_slice(&content)?;
        Ok(match file {
            ResultFile::Wrapped { results } => results,
            ResultFile::Bare(results) => results,
        })
    }

    /// All result files for a run label, LLM-run and agent-run formats
    /// alike, sorted by file name (and therefore by timestamp).
    pub fn list_run_files(&self, label: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.run_dir(label);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| {
                        (name.starts_with("benchmark-") || name.starts_with("agent-benchmark-"))
                            && name.ends_with(".json")
                    })
            })
            .collect();
        files.sort();
        Ok(files)
    }
}
