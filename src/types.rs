//! Shared work items, results, and execution records
//!
//! Everything here is a single-owner immutable value: items are built once,
//! handed across the pool/queue boundary by value, and results are appended
//! to append-only attempt lists. Cross-coroutine handoff is by id, never by
//! reference into another component's tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::provider::LlmResponse;
use crate::manifest::TaskManifest;
use crate::sandbox::{CompilationResult, TestResult};

/// Frozen per (task, variant) snapshot, built once before the attempt loop.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub manifest: Arc<TaskManifest>,
    /// Kind of artifact the task produces (e.g. "codeunit", "table").
    pub task_type: String,
    /// Rendered prompt-template output for attempt 1.
    pub instructions: String,
    /// File the compile queue writes the artifact to (`<taskId>.al`).
    pub target_file: String,
    pub prompt_template: PathBuf,
    pub fix_template: PathBuf,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Resolved system prompt text, if the variant names or inlines one.
    pub system_prompt: Option<String>,
    /// Resolved reasoning budget in tokens, if the variant sets one.
    pub thinking_budget: Option<u32>,
    pub sandbox_provider: String,
    pub sandbox_name: String,
    pub output_dir: PathBuf,
    pub debug: bool,
    /// Per-task prompt overrides from the manifest, if any.
    pub prompt_overrides: Option<HashMap<String, String>>,
}

impl ExecutionContext {
    /// Token estimate handed to the rate limiter for TPM admission.
    pub fn estimated_tokens(&self) -> Option<u64> {
        self.manifest.metadata.estimated_tokens
    }
}

/// Extracted code plus failure reasons from an earlier attempt, carried into
/// the repair prompt.
#[derive(Debug, Clone)]
pub struct PreviousAttempt {
    pub extracted_code: String,
    pub failure_reasons: Vec<String>,
}

/// A unit of generation work handed to the LLM work pool.
#[derive(Debug, Clone)]
pub struct LlmWorkItem {
    pub id: String,
    pub manifest: Arc<TaskManifest>,
    pub provider: String,
    pub model: String,
    pub attempt_number: u32,
    pub previous_attempts: Vec<PreviousAttempt>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub context: ExecutionContext,
}

/// Outcome of one generation work item.
#[derive(Debug, Clone)]
pub struct LlmWorkResult {
    pub work_item_id: String,
    pub success: bool,
    pub code: Option<String>,
    pub llm_response: Option<LlmResponse>,
    pub error: Option<String>,
    pub duration: Duration,
    /// True iff the call succeeded and the extractor's confidence cleared
    /// 0.5. Advisory: callers may compile anyway.
    pub ready_for_compile: bool,
}

/// A unit of compile+test work handed to a compile queue.
#[derive(Debug, Clone)]
pub struct CompileWorkItem {
    pub id: String,
    pub llm_work_item_id: String,
    pub code: String,
    pub context: ExecutionContext,
    pub attempt_number: u32,
    pub llm_response: LlmResponse,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one compile+test work item.
#[derive(Debug, Clone)]
pub struct CompileWorkResult {
    pub work_item_id: String,
    pub compilation: CompilationResult,
    pub tests: Option<TestResult>,
    pub duration: Duration,
    pub compile_duration: Duration,
    pub test_duration: Option<Duration>,
}

/// Record appended per attempt within a task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub attempt_number: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub prompt: String,
    pub llm_response: LlmResponse,
    pub extracted_code: String,
    pub code_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compilation: Option<CompilationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestResult>,
    pub success: bool,
    /// Normalized 0-100 attempt score.
    pub score: f64,
    pub failure_reasons: Vec<String>,
    pub tokens_used: u64,
    pub cost: f64,
    pub duration_ms: u64,
    pub llm_duration_ms: u64,
    pub compile_duration_ms: u64,
}

impl ExecutionAttempt {
    /// Placeholder record for an attempt whose LLM call failed outright.
    pub fn llm_failure(attempt_number: u32, error: Option<String>, duration: Duration) -> Self {
        let now = Utc::now();
        let duration_ms = duration.as_millis() as u64;
        Self {
            attempt_number,
            start_time: now - chrono::Duration::milliseconds(duration_ms as i64),
            end_time: now,
            prompt: String::new(),
            llm_response: LlmResponse::failed(),
            extracted_code: String::new(),
            code_language: "al".to_string(),
            compilation: None,
            tests: None,
            success: false,
            score: 0.0,
            failure_reasons: vec![error.unwrap_or_else(|| "LLM call failed".to_string())],
            tokens_used: 0,
            cost: 0.0,
            duration_ms,
            llm_duration_ms: duration_ms,
            compile_duration_ms: 0,
        }
    }
}

/// Serializable slice of the execution context stored with each result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultContext {
    pub variant_id: String,
    pub provider: String,
    pub model: String,
    pub sandbox_provider: String,
    pub sandbox_name: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Final outcome of one (task, variant) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub task_id: String,
    pub execution_id: String,
    pub context: ResultContext,
    pub attempts: Vec<ExecutionAttempt>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_code: Option<String>,
    pub final_score: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_duration_ms: u64,
    /// Attempt number that passed; 0 when no attempt did.
    pub passed_attempt_number: u32,
    /// Passed attempts over attempts made.
    pub success_rate: f64,
    pub executed_at: DateTime<Utc>,
    pub executed_by: String,
    pub environment: String,
}

/// All variants' outcomes for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelTaskResult {
    pub task_id: String,
    /// Variant display id to its execution result.
    pub model_results: HashMap<String, TaskExecutionResult>,
    /// Variant display id to the error that kept it from producing a result.
    pub failures: HashMap<String, String>,
    pub partial_success: bool,
    pub comparison: TaskComparison,
    pub duration_ms: u64,
}

/// Cross-model comparison for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskComparison {
    pub best_score: f64,
    pub avg_score: f64,
    pub passing_models: Vec<String>,
    pub failing_models: Vec<String>,
    pub ranking: Vec<RankEntry>,
    /// Set iff exactly one variant attains `best_score` and it is positive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankEntry {
    pub model: String,
    pub score: f64,
    /// 1-based dense rank.
    pub rank: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_failure_attempt_shape() {
        let attempt =
            ExecutionAttempt::llm_failure(2, None, Duration::from_millis(340));
        assert_eq!(attempt.attempt_number, 2);
        assert!(!attempt.success);
        assert_eq!(attempt.score, 0.0);
        assert_eq!(attempt.failure_reasons, vec!["LLM call failed".to_string()]);
        assert!(attempt.extracted_code.is_empty());
        assert_eq!(attempt.code_language, "al");
        assert_eq!(attempt.llm_response.model, "unknown");
        assert_eq!(attempt.duration_ms, 340);
        assert_eq!(attempt.llm_duration_ms, 340);
        assert_eq!(attempt.compile_duration_ms, 0);
        assert_eq!(
            attempt.end_time - attempt.start_time,
            chrono::Duration::milliseconds(340)
        );
    }

    #[test]
    fn test_llm_failure_attempt_keeps_adapter_error() {
        let attempt = ExecutionAttempt::llm_failure(
            1,
            Some("API error: 500 upstream".to_string()),
            Duration::ZERO,
        );
        assert_eq!(attempt.failure_reasons, vec!["API error: 500 upstream"]);
    }
}
