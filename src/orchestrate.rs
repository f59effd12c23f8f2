//! Run orchestration
//!
//! Drives the end-to-end loop: for each task, one coroutine per variant
//! runs up to `max_attempts` generate, compile, optional test, score
//! cycles. The first passing attempt ends the variant; otherwise the best
//! attempt's score is kept at half value. Every stage transition emits a
//! typed event, and all outcomes fold into the aggregator.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregate::{ResultAggregator, RunSummary};
use crate::error::{HarnessError, HarnessResult};
use crate::events::{BenchEvent, EventBus, EventListener, ProgressSnapshot};
use crate::llm::provider::LlmResponse;
use crate::manifest::TaskManifest;
use crate::pool::LlmWorkPool;
use crate::queue::{CompileQueuePool, QueueError};
use crate::render::{task_vars, TemplateRenderer};
use crate::sandbox::{CompilationResult, TestResult};
use crate::types::{
    CompileWorkItem, ExecutionAttempt, ExecutionContext, LlmWorkItem, LlmWorkResult,
    ParallelTaskResult, PreviousAttempt, ResultContext, TaskExecutionResult,
};
use crate::variant::{ModelVariant, SystemPromptSpec, ThinkingBudget};

/// Score deduction per extra attempt needed to pass.
const RETRY_PENALTY: f64 = 10.0;

/// Share of the best attempt's score kept when no attempt passed.
const BEST_EFFORT_FACTOR: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub task_concurrency: usize,
    /// Treat infrastructure failures as run-aborting.
    pub fail_fast: bool,
    pub executed_by: String,
    pub environment: String,
    /// Defaults applied when a variant config is silent.
    pub temperature: f64,
    pub max_tokens: u32,
    pub call_timeout: Duration,
    pub sandbox_provider: String,
    pub output_dir: PathBuf,
    pub debug: bool,
    /// Named system prompts referenced from variant specs.
    pub system_prompts: HashMap<String, String>,
    /// Root for relative template paths in manifests.
    pub templates_root: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_concurrency: 1,
            fail_fast: false,
            executed_by: "albench".to_string(),
            environment: "local".to_string(),
            temperature: 0.2,
            max_tokens: 4000,
            call_timeout: Duration::from_secs(120),
            sandbox_provider: "mock".to_string(),
            output_dir: PathBuf::from("output"),
            debug: false,
            system_prompts: HashMap::new(),
            templates_root: PathBuf::from("."),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_harness(config: &crate::config::HarnessConfig) -> Self {
        Self {
            task_concurrency: config.run.task_concurrency,
            fail_fast: config.run.fail_fast,
            executed_by: config.run.executed_by.clone(),
            environment: config.run.environment.clone(),
            temperature: config.run.temperature,
            max_tokens: config.run.max_tokens,
            call_timeout: Duration::from_millis(config.run.call_timeout_ms),
            sandbox_provider: config.sandbox.provider.clone(),
            output_dir: config.run.output_dir.clone(),
            debug: config.run.debug,
            system_prompts: config.system_prompts.clone(),
            templates_root: PathBuf::from("."),
        }
    }
}

/// Everything a finished run hands back.
pub struct RunOutcome {
    pub results: Vec<TaskExecutionResult>,
    pub task_results: Vec<ParallelTaskResult>,
    pub summary: RunSummary,
}

pub struct Orchestrator {
    pool: Arc<LlmWorkPool>,
    queues: Arc<CompileQueuePool>,
    bus: Arc<EventBus>,
    renderer: TemplateRenderer,
    config: OrchestratorConfig,
    aborted: AtomicBool,
    first_critical: Mutex<Option<String>>,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<LlmWorkPool>,
        queues: Arc<CompileQueuePool>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            pool,
            queues,
            bus: Arc::new(EventBus::new()),
            renderer: TemplateRenderer::new(),
            config,
            aborted: AtomicBool::new(false),
            first_critical: Mutex::new(None),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.bus.subscribe(listener);
    }

    /// Run the full task x variant matrix.
    ///
    /// Always completes with a summary unless a critical error aborted the
    /// run, in which case in-flight work finishes, queues drain, and the
    /// first critical error is re-raised.
    pub async fn run(
        &self,
        tasks: &[Arc<TaskManifest>],
        variants: &[ModelVariant],
    ) -> HarnessResult<RunOutcome> {
        let run_started = Instant::now();
        let total_tasks = tasks.len();
        info!(
            tasks = total_tasks,
            variants = variants.len(),
            task_concurrency = self.config.task_concurrency,
            "benchmark run starting"
        );

        let mut aggregator = ResultAggregator::new();
        let mut task_results = Vec::with_capacity(total_tasks);
        let mut progress_errors: Vec<String> = Vec::new();
        let mut completed = 0usize;

        let mut task_stream = stream::iter(
            tasks
                .iter()
                .map(|task| self.run_task(task.clone(), variants)),
        )
        .buffer_unordered(self.config.task_concurrency.max(1));

        while let Some(task_result) = task_stream.next().await {
            completed += 1;
            for (variant_id, message) in &task_result.failures {
                progress_errors.push(format!(
                    "{}/{variant_id}: {message}",
                    task_result.task_id
                ));
            }
            aggregator.add_parallel_task_result(&task_result);

            let elapsed_ms = run_started.elapsed().as_millis() as u64;
            let estimated_remaining_ms = (completed > 0).then(|| {
                elapsed_ms / completed as u64 * (total_tasks - completed) as u64
            });
            self.bus.emit(&BenchEvent::Progress(ProgressSnapshot {
                total_tasks,
                completed_tasks: completed,
                active_llm_calls: self.pool.active_count(),
                compile_queue_length: self.queues.len().await,
                errors: progress_errors.clone(),
                elapsed_ms,
                estimated_remaining_ms,
            }));
            task_results.push(task_result);
        }

        self.pool.drain().await;
        self.queues.drain().await;

        let critical = {
            let guard = match self.first_critical.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        if let Some(message) = critical {
            error!(error = %message, "run aborted by critical error");
            return Err(HarnessError::Critical { message });
        }

        let results = aggregator.results().to_vec();
        let summary = aggregator.finalize();
        info!(
            executions = results.len(),
            pass_rate = summary.summary.pass_rate,
            "benchmark run complete"
        );
        Ok(RunOutcome {
            results,
            task_results,
            summary,
        })
    }

    /// Fan one task out across all variants and settle them.
    async fn run_task(
        &self,
        task: Arc<TaskManifest>,
        variants: &[ModelVariant],
    ) -> ParallelTaskResult {
        let task_started = Instant::now();

        if self.aborted.load(Ordering::SeqCst) {
            // Skipped entirely after a critical error: no events, no work.
            let failures = variants
                .iter()
                .map(|v| {
                    (
                        v.display_id(),
                        "skipped after critical error".to_string(),
                    )
                })
                .collect();
            return ParallelTaskResult {
                task_id: task.id.clone(),
                model_results: HashMap::new(),
                failures,
                partial_success: false,
                comparison: ResultAggregator::build_task_comparison(
                    &task.id,
                    &HashMap::new(),
                ),
                duration_ms: 0,
            };
        }

        self.bus.emit(&BenchEvent::TaskStarted {
            task_id: task.id.clone(),
            variant_count: variants.len(),
            timestamp: Utc::now(),
        });

        let outcomes = futures::future::join_all(variants.iter().map(|variant| {
            let task = task.clone();
            async move {
                let variant_id = variant.display_id();
                let outcome = self.run_variant(task, variant).await;
                (variant_id, outcome)
            }
        }))
        .await;

        let mut model_results = HashMap::new();
        let mut failures = HashMap::new();
        for (variant_id, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    self.bus.emit(&BenchEvent::Result {
                        task_id: task.id.clone(),
                        variant_id: variant_id.clone(),
                        success: result.success,
                        score: result.final_score,
                    });
                    model_results.insert(variant_id, result);
                }
                Err(e) => {
                    if e.is_critical() {
                        self.record_critical(&e);
                    }
                    self.bus.emit(&BenchEvent::Error {
                        task_id: Some(task.id.clone()),
                        variant_id: Some(variant_id.clone()),
                        message: e.to_string(),
                    });
                    warn!(task_id = %task.id, variant = %variant_id, error = %e, "variant failed");
                    failures.insert(variant_id, e.to_string());
                }
            }
        }

        let passed = model_results.values().filter(|r| r.success).count();
        let failed = model_results.len() - passed + failures.len();
        let duration_ms = task_started.elapsed().as_millis() as u64;
        self.bus.emit(&BenchEvent::TaskCompleted {
            task_id: task.id.clone(),
            passed,
            failed,
            duration_ms,
        });

        let comparison = ResultAggregator::build_task_comparison(&task.id, &model_results);
        ParallelTaskResult {
            task_id: task.id.clone(),
            partial_success: !model_results.is_empty(),
            model_results,
            failures,
            comparison,
            duration_ms,
        }
    }

    /// One variant's attempt loop.
    async fn run_variant(
        &self,
        task: Arc<TaskManifest>,
        variant: &ModelVariant,
    ) -> HarnessResult<TaskExecutionResult> {
        let variant_id = variant.display_id();
        let context = self.build_context(&task, variant)?;
        let execution_started = Instant::now();
        let executed_at = Utc::now();
        let execution_id = format!(
            "{}_{}_{}",
            task.id,
            variant_id,
            executed_at.timestamp_millis()
        );

        let mut attempts: Vec<ExecutionAttempt> = Vec::new();
        let mut success = false;
        let mut final_code = None;
        let mut passed_attempt_number = 0u32;
        let mut final_score = 0.0;

        for attempt_number in 1..=task.max_attempts {
            if self.aborted.load(Ordering::SeqCst) {
                break;
            }
            let attempt_started = Utc::now();

            self.bus.emit(&BenchEvent::LlmStarted {
                task_id: task.id.clone(),
                variant_id: variant_id.clone(),
                attempt: attempt_number,
            });

            let item = self.build_work_item(&task, variant, &context, attempt_number, &attempts);
            let llm_result = match self.pool.submit(item).await {
                Ok(result) => result,
                Err(e) => LlmWorkResult {
                    work_item_id: String::new(),
                    success: false,
                    code: None,
                    llm_response: None,
                    error: Some(e.to_string()),
                    duration: Duration::ZERO,
                    ready_for_compile: false,
                },
            };

            self.bus.emit(&BenchEvent::LlmCompleted {
                task_id: task.id.clone(),
                variant_id: variant_id.clone(),
                attempt: attempt_number,
                success: llm_result.success,
                duration_ms: llm_result.duration.as_millis() as u64,
            });

            let code = llm_result.code.clone().unwrap_or_default();
            if !llm_result.success || code.is_empty() {
                attempts.push(ExecutionAttempt::llm_failure(
                    attempt_number,
                    llm_result.error.clone(),
                    llm_result.duration,
                ));
                continue;
            }
            let llm_response = llm_result
                .llm_response
                .clone()
                .unwrap_or_else(LlmResponse::failed);

            self.bus.emit(&BenchEvent::CompileQueued {
                task_id: task.id.clone(),
                variant_id: variant_id.clone(),
                attempt: attempt_number,
                queue_length: self.queues.len().await,
            });
            self.bus.emit(&BenchEvent::CompileStarted {
                task_id: task.id.clone(),
                variant_id: variant_id.clone(),
                attempt: attempt_number,
            });

            let compile_item = CompileWorkItem {
                id: Uuid::new_v4().to_string(),
                llm_work_item_id: llm_result.work_item_id.clone(),
                code: code.clone(),
                context: context.clone(),
                attempt_number,
                llm_response: llm_response.clone(),
                created_at: Utc::now(),
            };

            match self.queues.enqueue(compile_item).await {
                Ok(compile_result) => {
                    self.bus.emit(&BenchEvent::CompileCompleted {
                        task_id: task.id.clone(),
                        variant_id: variant_id.clone(),
                        attempt: attempt_number,
                        success: compile_result.compilation.success,
                    });

                    let scored = score_attempt(
                        &task,
                        &code,
                        &compile_result.compilation,
                        compile_result.tests.as_ref(),
                    );
                    let tokens_used = llm_response.usage.total_tokens;
                    let cost = llm_response.usage.estimated_cost.unwrap_or(0.0);
                    attempts.push(ExecutionAttempt {
                        attempt_number,
                        start_time: attempt_started,
                        end_time: Utc::now(),
                        prompt: context.instructions.clone(),
                        llm_response: llm_response.clone(),
                        extracted_code: code.clone(),
                        code_language: "al".to_string(),
                        compilation: Some(compile_result.compilation.clone()),
                        tests: compile_result.tests.clone(),
                        success: scored.success,
                        score: scored.score,
                        failure_reasons: scored.failure_reasons.clone(),
                        tokens_used,
                        cost,
                        duration_ms: llm_result.duration.as_millis() as u64
                            + compile_result.duration.as_millis() as u64,
                        llm_duration_ms: llm_result.duration.as_millis() as u64,
                        compile_duration_ms: compile_result.compile_duration.as_millis() as u64,
                    });

                    if scored.success {
                        success = true;
                        final_code = Some(code);
                        passed_attempt_number = attempt_number;
                        final_score = (scored.score
                            - f64::from(attempt_number - 1) * RETRY_PENALTY)
                            .max(0.0);
                        debug!(
                            task_id = %task.id,
                            variant = %variant_id,
                            attempt = attempt_number,
                            score = final_score,
                            "variant passed"
                        );
                        break;
                    }
                }
                Err(e) => {
                    self.bus.emit(&BenchEvent::CompileCompleted {
                        task_id: task.id.clone(),
                        variant_id: variant_id.clone(),
                        attempt: attempt_number,
                        success: false,
                    });
                    if self.config.fail_fast && matches!(e, QueueError::Sandbox(_)) {
                        return Err(HarnessError::critical(e.to_string()));
                    }
                    let duration_ms = llm_result.duration.as_millis() as u64;
                    attempts.push(ExecutionAttempt {
                        attempt_number,
                        start_time: attempt_started,
                        end_time: Utc::now(),
                        prompt: context.instructions.clone(),
                        llm_response: llm_response.clone(),
                        extracted_code: code.clone(),
                        code_language: "al".to_string(),
                        compilation: None,
                        tests: None,
                        success: false,
                        score: 0.0,
                        failure_reasons: vec![format!("Compilation failed: {e}")],
                        tokens_used: llm_response.usage.total_tokens,
                        cost: llm_response.usage.estimated_cost.unwrap_or(0.0),
                        duration_ms,
                        llm_duration_ms: duration_ms,
                        compile_duration_ms: 0,
                    });
                }
            }
        }

        if !success && !attempts.is_empty() {
            let best = attempts.iter().map(|a| a.score).fold(0.0, f64::max);
            final_score = best * BEST_EFFORT_FACTOR;
        }

        let total_tokens = attempts.iter().map(|a| a.tokens_used).sum();
        let total_cost = attempts.iter().map(|a| a.cost).sum();
        let passed_attempts = attempts.iter().filter(|a| a.success).count();
        let success_rate = if attempts.is_empty() {
            0.0
        } else {
            passed_attempts as f64 / attempts.len() as f64
        };

        Ok(TaskExecutionResult {
            task_id: task.id.clone(),
            execution_id,
            context: ResultContext {
                variant_id,
                provider: variant.provider.clone(),
                model: variant.model.clone(),
                sandbox_provider: context.sandbox_provider.clone(),
                sandbox_name: context.sandbox_name.clone(),
                temperature: context.temperature,
                max_tokens: context.max_tokens,
            },
            attempts,
            success,
            final_code,
            final_score,
            total_tokens,
            total_cost,
            total_duration_ms: execution_started.elapsed().as_millis() as u64,
            passed_attempt_number,
            success_rate,
            executed_at,
            executed_by: self.config.executed_by.clone(),
            environment: self.config.environment.clone(),
        })
    }

    /// Build the frozen per (task, variant) snapshot.
    fn build_context(
        &self,
        task: &Arc<TaskManifest>,
        variant: &ModelVariant,
    ) -> HarnessResult<ExecutionContext> {
        let vars = task_vars(task);
        let prompt_template = self.resolve_template(&task.prompt_template);
        let fix_template = self.resolve_template(&task.fix_template);
        let instructions = self.renderer.render_file(&prompt_template, &vars)?;

        let system_prompt = match &variant.config.system_prompt {
            Some(SystemPromptSpec::Named(name)) => Some(
                self.config
                    .system_prompts
                    .get(name)
                    .cloned()
                    .ok_or_else(|| {
                        HarnessError::internal(format!("unknown system prompt: {name}"))
                    })?,
            ),
            Some(SystemPromptSpec::Inline(text)) => Some(text.clone()),
            None => None,
        };

        let thinking_budget = variant.config.thinking_budget.as_ref().map(|tb| match tb {
            ThinkingBudget::Tokens(n) => *n,
            ThinkingBudget::Effort(tag) => effort_tokens(tag),
        });

        Ok(ExecutionContext {
            task_type: task
                .metadata
                .category
                .clone()
                .unwrap_or_else(|| "object".to_string()),
            instructions,
            target_file: task.target_file(),
            prompt_template,
            fix_template,
            temperature: variant.config.temperature.unwrap_or(self.config.temperature),
            max_tokens: variant.config.max_tokens.unwrap_or(self.config.max_tokens),
            timeout: variant
                .config
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(self.config.call_timeout),
            system_prompt,
            thinking_budget,
            sandbox_provider: self.config.sandbox_provider.clone(),
            sandbox_name: self
                .queues
                .sandbox_names()
                .first()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            output_dir: self.config.output_dir.clone(),
            debug: self.config.debug,
            prompt_overrides: task.prompts.clone(),
            manifest: task.clone(),
        })
    }

    fn resolve_template(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.templates_root.join(path)
        }
    }

    fn build_work_item(
        &self,
        task: &Arc<TaskManifest>,
        variant: &ModelVariant,
        context: &ExecutionContext,
        attempt_number: u32,
        attempts: &[ExecutionAttempt],
    ) -> LlmWorkItem {
        LlmWorkItem {
            id: Uuid::new_v4().to_string(),
            manifest: task.clone(),
            provider: variant.provider.clone(),
            model: variant.model.clone(),
            attempt_number,
            previous_attempts: attempts
                .iter()
                .map(|a| PreviousAttempt {
                    extracted_code: a.extracted_code.clone(),
                    failure_reasons: a.failure_reasons.clone(),
                })
                .collect(),
            priority: 0,
            created_at: Utc::now(),
            context: context.clone(),
        }
    }

    fn record_critical(&self, error: &HarnessError) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut guard = match self.first_critical.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            *guard = Some(error.to_string());
        }
    }
}

/// Outcome of scoring one attempt.
#[derive(Debug, Clone)]
pub struct ScoredAttempt {
    /// Normalized 0-100 score.
    pub score: f64,
    pub failure_reasons: Vec<String>,
    /// True iff every enabled category is at its maximum.
    pub success: bool,
}

/// Score one attempt against the task's expectations.
///
/// Compilation always contributes up to 50 points. Declared tests add up to
/// 30, required patterns 10, forbidden patterns 10. The result is
/// normalized to 0-100 over the enabled categories.
pub fn score_attempt(
    task: &TaskManifest,
    code: &str,
    compilation: &CompilationResult,
    tests: Option<&TestResult>,
) -> ScoredAttempt {
    let mut max_score = 0.0;
    let mut score = 0.0;
    let mut failure_reasons = Vec::new();

    max_score += 50.0;
    if compilation.success {
        score += 50.0;
    } else {
        failure_reasons.push(format!(
            "Compilation failed: {}",
            compilation.error_summary()
        ));
    }

    if task.has_tests() {
        max_score += 30.0;
        match tests {
            Some(t) if t.success => score += 30.0,
            Some(t) => failure_reasons.push(format!(
                "Tests failed: {}/{} passed",
                t.passed_tests, t.total_tests
            )),
            // Tests never ran (compile failed); the compile reason stands
            // alone.
            None => {}
        }
    }

    if let Some(required) = task
        .expected
        .must_contain
        .as_ref()
        .filter(|p| !p.is_empty())
    {
        max_score += 10.0;
        let missing: Vec<&String> = required.iter().filter(|p| !code.contains(p.as_str())).collect();
        if missing.is_empty() {
            score += 10.0;
        } else {
            failure_reasons.push(format!(
                "Missing required pattern: {}",
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }

    if let Some(forbidden) = task
        .expected
        .must_not_contain
        .as_ref()
        .filter(|p| !p.is_empty())
    {
        max_score += 10.0;
        let present: Vec<&String> = forbidden.iter().filter(|p| code.contains(p.as_str())).collect();
        if present.is_empty() {
            score += 10.0;
        } else {
            failure_reasons.push(format!(
                "Forbidden pattern present: {}",
                present
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
    }

    let normalized = if max_score == 0.0 {
        0.0
    } else {
        100.0 * score / max_score
    };
    ScoredAttempt {
        score: normalized,
        success: max_score > 0.0 && (max_score - score).abs() < f64::EPSILON,
        failure_reasons,
    }
}

fn effort_tokens(tag: &str) -> u32 {
    match tag {
        "low" => 1_024,
        "medium" => 4_096,
        "high" => 16_384,
        _ => 4_096,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::CompilerDiagnostic;
    use crate::testing::mocks::{test_manifest, test_manifest_with_tests};

    fn compile_ok() -> CompilationResult {
        CompilationResult {
            success: true,
            errors: vec![],
            warnings: vec![],
            output: String::new(),
            duration_ms: 10,
            artifact_path: None,
        }
    }

    fn compile_failed() -> CompilationResult {
        CompilationResult {
            success: false,
            errors: vec![CompilerDiagnostic {
                code: "AL0118".to_string(),
                message: "undefined symbol".to_string(),
                file: "t.al".to_string(),
                line: 1,
                column: 1,
                severity: "error".to_string(),
            }],
            warnings: vec![],
            output: String::new(),
            duration_ms: 10,
            artifact_path: None,
        }
    }

    fn tests_passed() -> TestResult {
        TestResult {
            success: true,
            total_tests: 3,
            passed_tests: 3,
            failed_tests: 0,
            duration_ms: 5,
            results: vec![],
            output: String::new(),
        }
    }

    fn tests_failed() -> TestResult {
        TestResult {
            success: false,
            total_tests: 3,
            passed_tests: 1,
            failed_tests: 2,
            duration_ms: 5,
            results: vec![],
            output: String::new(),
        }
    }

    #[test]
    fn test_score_compile_only_task() {
        let manifest = test_manifest("t1");
        let scored = score_attempt(&manifest, "codeunit 1 A {}", &compile_ok(), None);
        assert_eq!(scored.score, 100.0);
        assert!(scored.success);
        assert!(scored.failure_reasons.is_empty());
    }

    #[test]
    fn test_score_compile_failure_is_zero() {
        let manifest = test_manifest("t1");
        let scored = score_attempt(&manifest, "garbage", &compile_failed(), None);
        assert_eq!(scored.score, 0.0);
        assert!(!scored.success);
        assert!(scored.failure_reasons[0].starts_with("Compilation failed"));
    }

    #[test]
    fn test_score_with_tests_all_passing() {
        let manifest = test_manifest_with_tests("t1");
        let scored = score_attempt(&manifest, "codeunit 1 A {}", &compile_ok(), Some(&tests_passed()));
        assert_eq!(scored.score, 100.0);
        assert!(scored.success);
    }

    #[test]
    fn test_score_with_tests_failing() {
        let manifest = test_manifest_with_tests("t1");
        let scored = score_attempt(&manifest, "codeunit 1 A {}", &compile_ok(), Some(&tests_failed()));
        // 50 of 80 points.
        assert!((scored.score - 62.5).abs() < 1e-9);
        assert!(!scored.success);
        assert!(scored.failure_reasons[0].contains("Tests failed: 1/3"));
    }

    #[test]
    fn test_score_compile_failed_with_declared_tests_has_no_test_reason() {
        let manifest = test_manifest_with_tests("t1");
        let scored = score_attempt(&manifest, "garbage", &compile_failed(), None);
        assert_eq!(scored.score, 0.0);
        assert_eq!(scored.failure_reasons.len(), 1);
        assert!(scored.failure_reasons[0].starts_with("Compilation failed"));
    }

    #[test]
    fn test_score_pattern_categories() {
        let mut manifest = test_manifest("t1");
        manifest.expected.must_contain = Some(vec!["Greet".to_string(), "exit".to_string()]);
        manifest.expected.must_not_contain = Some(vec!["OnRun".to_string()]);

        let code = "codeunit 1 A { procedure Greet() begin exit; end; }";
        let scored = score_attempt(&manifest, code, &compile_ok(), None);
        assert_eq!(scored.score, 100.0);
        assert!(scored.success);

        let bad = "codeunit 1 A { trigger OnRun() begin end; }";
        let scored = score_attempt(&manifest, bad, &compile_ok(), None);
        // 50 of 70: required missing and forbidden present.
        assert!((scored.score - 100.0 * 50.0 / 70.0).abs() < 1e-9);
        assert_eq!(scored.failure_reasons.len(), 2);
    }

    #[test]
    fn test_retry_penalty_applied_per_extra_attempt() {
        // Raw 100 on attempt 3 nets 80.
        let raw = 100.0;
        let attempt_number = 3u32;
        let penalized = (raw - f64::from(attempt_number - 1) * RETRY_PENALTY).max(0.0);
        assert_eq!(penalized, 80.0);
    }

    #[test]
    fn test_effort_tags() {
        assert_eq!(effort_tokens("low"), 1_024);
        assert_eq!(effort_tokens("high"), 16_384);
        assert_eq!(effort_tokens("unheard-of"), 4_096);
    }
}
