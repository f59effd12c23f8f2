//! Result aggregation
//!
//! Collects task execution results, rolls them into per-model and per-task
//! statistics, and computes cross-model comparisons. The aggregator never
//! fails; it is updated only from the orchestrator's coordination point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::types::{
    ExecutionAttempt, ParallelTaskResult, RankEntry, TaskComparison, TaskExecutionResult,
};

/// Extracted code shorter than this (trimmed) marks a malformed response.
const MALFORMED_CODE_LEN: usize = 20;

/// How a failed execution is categorized, judged from its last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Malformed,
    Test,
    Compile,
    Unclassified,
}

/// Classify the last attempt of a failed execution.
pub fn classify_failure(last_attempt: &ExecutionAttempt) -> FailureClass {
    let reasons = &last_attempt.failure_reasons;
    if last_attempt.extracted_code.trim().len() < MALFORMED_CODE_LEN
        || reasons.iter().any(|r| r.contains("LLM call failed"))
    {
        FailureClass::Malformed
    } else if reasons.iter().any(|r| r.contains("Tests failed")) {
        FailureClass::Test
    } else if reasons.iter().any(|r| r.contains("Compilation failed")) {
        FailureClass::Compile
    } else {
        FailureClass::Unclassified
    }
}

/// Roll-up for one model variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelStats {
    pub tasks_passed: usize,
    pub tasks_failed: usize,
    pub avg_score: f64,
    pub tokens: u64,
    pub cost: f64,
    /// Mean of passed-attempt number on success, attempts made otherwise.
    pub avg_attempts: f64,
    pub passed_on_attempt1: usize,
    /// Cumulative: tasks passed by the 2nd attempt. Successes on attempt
    /// three or later count in neither attempt bucket.
    pub passed_on_attempt2: usize,
    pub compile_failures: usize,
    pub test_failures: usize,
    pub malformed_responses: usize,
}

/// Roll-up for one task across models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub models_passed: usize,
    pub models_failed: usize,
    pub avg_score: f64,
    pub best_score: f64,
    /// First-added result whose score equals `best_score`.
    pub best_model: Option<String>,
}

/// Whole-run roll-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateStats {
    pub total_executions: usize,
    pub passed: usize,
    pub failed: usize,
    pub overall_pass_rate: f64,
    pub average_score: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_duration_ms: u64,
    pub pass_num1: usize,
    pub pass_num2: usize,
    pub pass_rate1: f64,
    pub pass_rate2: f64,
    pub total_compile_errors: usize,
    pub total_test_failures: usize,
    pub total_malformed: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub seconds_per_task: f64,
}

/// Machine-readable run summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub summary: SummarySection,
    pub models: BTreeMap<String, ModelSummary>,
    pub comparisons: Vec<ComparisonSummary>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummarySection {
    pub task_count: usize,
    pub pass_rate: f64,
    pub average_score: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub pass_rate: f64,
    pub avg_score: f64,
    pub cost: f64,
    pub avg_attempts: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    pub best_score: f64,
    pub ranking: Vec<RankEntry>,
}

/// Collects results and produces the roll-ups.
#[derive(Default)]
pub struct ResultAggregator {
    results: Vec<TaskExecutionResult>,
    comparisons: Vec<(String, TaskComparison)>,
    seen_executions: HashSet<String>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one result. A result with an already-seen execution id is
    /// ignored, so re-adding is harmless.
    pub fn add(&mut self, result: TaskExecutionResult) {
        if !self.seen_executions.insert(result.execution_id.clone()) {
            return;
        }
        self.results.push(result);
    }

    /// Store the cross-model comparison and append each nested result.
    pub fn add_parallel_task_result(&mut self, task_result: &ParallelTaskResult) {
        self.comparisons
            .push((task_result.task_id.clone(), task_result.comparison.clone()));
        let mut ordered: Vec<&TaskExecutionResult> = task_result.model_results.values().collect();
        ordered.sort_by(|a, b| a.context.variant_id.cmp(&b.context.variant_id));
        for result in ordered {
            self.add(result.clone());
        }
    }

    pub fn results(&self) -> &[TaskExecutionResult] {
        &self.results
    }

    /// Per-variant roll-ups, keyed by display id.
    pub fn model_stats(&self) -> BTreeMap<String, ModelStats> {
        let mut grouped: BTreeMap<String, Vec<&TaskExecutionResult>> = BTreeMap::new();
        for result in &self.results {
            grouped
                .entry(result.context.variant_id.clone())
                .or_default()
                .push(result);
        }

        grouped
            .into_iter()
            .map(|(variant_id, results)| {
                let mut stats = ModelStats::default();
                let mut score_sum = 0.0;
                let mut attempts_sum = 0.0;
                for result in &results {
                    score_sum += result.final_score;
                    stats.tokens += result.total_tokens;
                    stats.cost += result.total_cost;
                    if result.success {
                        stats.tasks_passed += 1;
                        attempts_sum += f64::from(result.passed_attempt_number);
                        if result.passed_attempt_number == 1 {
                            stats.passed_on_attempt1 += 1;
                        }
                        if result.passed_attempt_number <= 2 {
                            stats.passed_on_attempt2 += 1;
                        }
                    } else {
                        stats.tasks_failed += 1;
                        attempts_sum += result.attempts.len() as f64;
                        if let Some(last) = result.attempts.last() {
                            match classify_failure(last) {
                                FailureClass::Malformed => stats.malformed_responses += 1,
                                FailureClass::Test => stats.test_failures += 1,
                                FailureClass::Compile => stats.compile_failures += 1,
                                FailureClass::Unclassified => {}
                            }
                        }
                    }
                }
                let count = results.len() as f64;
                stats.avg_score = score_sum / count;
                stats.avg_attempts = attempts_sum / count;
                (variant_id, stats)
            })
            .collect()
    }

    /// Per-task roll-ups, keyed by task id.
    pub fn task_stats(&self) -> BTreeMap<String, TaskStats> {
        let mut grouped: BTreeMap<String, Vec<&TaskExecutionResult>> = BTreeMap::new();
        for result in &self.results {
            grouped
                .entry(result.task_id.clone())
                .or_default()
                .push(result);
        }

        grouped
            .into_iter()
            .map(|(task_id, results)| {
                let mut stats = TaskStats::default();
                let mut score_sum = 0.0;
                for result in &results {
                    score_sum += result.final_score;
                    if result.success {
                        stats.models_passed += 1;
                    } else {
                        stats.models_failed += 1;
                    }
                    if result.final_score > stats.best_score {
                        stats.best_score = result.final_score;
                    }
                }
                // First result (in insertion order) at the best score.
                stats.best_model = results
                    .iter()
                    .find(|r| r.final_score == stats.best_score)
                    .map(|r| r.context.variant_id.clone());
                stats.avg_score = score_sum / results.len() as f64;
                (task_id, stats)
            })
            .collect()
    }

    pub fn aggregate_stats(&self) -> AggregateStats {
        let mut stats = AggregateStats {
            total_executions: self.results.len(),
            ..AggregateStats::default()
        };
        let mut score_sum = 0.0;
        let mut task_ids = HashSet::new();
        for result in &self.results {
            task_ids.insert(result.task_id.as_str());
            score_sum += result.final_score;
            stats.total_tokens += result.total_tokens;
            stats.total_cost += result.total_cost;
            stats.total_duration_ms += result.total_duration_ms;
            for attempt in &result.attempts {
                stats.prompt_tokens += attempt.llm_response.usage.prompt_tokens;
                stats.completion_tokens += attempt.llm_response.usage.completion_tokens;
            }
            if result.success {
                stats.passed += 1;
                if result.passed_attempt_number == 1 {
                    stats.pass_num1 += 1;
                }
                if result.passed_attempt_number <= 2 {
                    stats.pass_num2 += 1;
                }
            } else {
                stats.failed += 1;
                if let Some(last) = result.attempts.last() {
                    match classify_failure(last) {
                        FailureClass::Malformed => stats.total_malformed += 1,
                        FailureClass::Test => stats.total_test_failures += 1,
                        FailureClass::Compile => stats.total_compile_errors += 1,
                        FailureClass::Unclassified => {}
                    }
                }
            }
        }

        if stats.total_executions > 0 {
            let total = stats.total_executions as f64;
            stats.overall_pass_rate = stats.passed as f64 / total;
            stats.average_score = score_sum / total;
            stats.pass_rate1 = stats.pass_num1 as f64 / total;
            stats.pass_rate2 = stats.pass_num2 as f64 / total;
        }
        if !task_ids.is_empty() {
            stats.seconds_per_task =
                stats.total_duration_ms as f64 / 1000.0 / task_ids.len() as f64;
        }
        stats
    }

    /// Produce the machine-readable summary. Pure function of collected
    /// state except for the generation timestamp, so calling it twice on an
    /// unchanged aggregator yields equal stats.
    pub fn finalize(&self) -> RunSummary {
        let aggregate = self.aggregate_stats();
        let task_count = self
            .results
            .iter()
            .map(|r| r.task_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let models = self
            .model_stats()
            .into_iter()
            .map(|(variant_id, stats)| {
                let executed = stats.tasks_passed + stats.tasks_failed;
                let pass_rate = if executed == 0 {
                    0.0
                } else {
                    stats.tasks_passed as f64 / executed as f64
                };
                (
                    variant_id,
                    ModelSummary {
                        pass_rate,
                        avg_score: stats.avg_score,
                        cost: stats.cost,
                        avg_attempts: stats.avg_attempts,
                    },
                )
            })
            .collect();

        let comparisons = self
            .comparisons
            .iter()
            .map(|(_, comparison)| ComparisonSummary {
                winner: comparison.winner.clone(),
                best_score: comparison.best_score,
                ranking: comparison.ranking.clone(),
            })
            .collect();

        RunSummary {
            summary: SummarySection {
                task_count,
                pass_rate: aggregate.overall_pass_rate,
                average_score: aggregate.average_score,
                total_tokens: aggregate.total_tokens,
                total_cost: aggregate.total_cost,
            },
            models,
            comparisons,
            generated_at: Utc::now(),
        }
    }

    /// Build the cross-model comparison for one task.
    ///
    /// Ranks are 1-based dense. The winner is set iff exactly one variant
    /// ties for first and that score is positive.
    pub fn build_task_comparison(
        _task_id: &str,
        model_results: &HashMap<String, TaskExecutionResult>,
    ) -> TaskComparison {
        let mut scored: Vec<(String, f64, bool)> = model_results
            .iter()
            .map(|(variant_id, result)| {
                (variant_id.clone(), result.final_score, result.success)
            })
            .collect();
        // Descending by score, id-ordered within ties for determinism.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut ranking = Vec::with_capacity(scored.len());
        let mut rank = 0u32;
        let mut previous_score = f64::NAN;
        for (model, score, _) in &scored {
            if *score != previous_score {
                rank += 1;
                previous_score = *score;
            }
            ranking.push(RankEntry {
                model: model.clone(),
                score: *score,
                rank,
            });
        }

        let best_score = scored.first().map(|(_, score, _)| *score).unwrap_or(0.0);
        let top_count = scored.iter().filter(|(_, score, _)| *score == best_score).count();
        let winner = (top_count == 1 && best_score > 0.0)
            .then(|| scored[0].0.clone());

        let avg_score = if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|(_, score, _)| score).sum::<f64>() / scored.len() as f64
        };

        let mut passing_models: Vec<String> = scored
            .iter()
            .filter(|(_, _, success)| *success)
            .map(|(model, _, _)| model.clone())
            .collect();
        let mut failing_models: Vec<String> = scored
            .iter()
            .filter(|(_, _, success)| !*success)
            .map(|(model, _, _)| model.clone())
            .collect();
        passing_models.sort();
        failing_models.sort();

        TaskComparison {
            best_score,
            avg_score,
            passing_models,
            failing_models,
            ranking,
            winner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{FinishReason, LlmResponse, TokenUsage};
    use crate::types::ResultContext;

    fn attempt(number: u32, success: bool, score: f64, reasons: &[&str], code: &str) -> ExecutionAttempt {
        ExecutionAttempt {
            attempt_number: number,
            start_time: Utc::now(),
            end_time: Utc::now(),
            prompt: String::new(),
            llm_response: LlmResponse {
                content: String::new(),
                model: "m".to_string(),
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                    total_tokens: 150,
                    estimated_cost: Some(0.001),
                },
                duration_ms: 10,
                finish_reason: FinishReason::Stop,
            },
            extracted_code: code.to_string(),
            code_language: "al".to_string(),
            compilation: None,
            tests: None,
            success,
            score,
            failure_reasons: reasons.iter().map(|r| r.to_string()).collect(),
            tokens_used: 150,
            cost: 0.001,
            duration_ms: 500,
            llm_duration_ms: 400,
            compile_duration_ms: 100,
        }
    }

    fn result(
        task_id: &str,
        variant_id: &str,
        success: bool,
        final_score: f64,
        attempts: Vec<ExecutionAttempt>,
    ) -> TaskExecutionResult {
        let passed = if success {
            attempts
                .iter()
                .find(|a| a.success)
                .map(|a| a.attempt_number)
                .unwrap_or(1)
        } else {
            0
        };
        TaskExecutionResult {
            task_id: task_id.to_string(),
            execution_id: format!("{task_id}_{variant_id}_{}", attempts.len()),
            context: ResultContext {
                variant_id: variant_id.to_string(),
                provider: "mock".to_string(),
                model: "mock-model".to_string(),
                sandbox_provider: "mock".to_string(),
                sandbox_name: "bc-1".to_string(),
                temperature: 0.2,
                max_tokens: 4000,
            },
            success,
            final_code: success.then(|| "codeunit 1 A {}".to_string()),
            final_score,
            total_tokens: attempts.len() as u64 * 150,
            total_cost: attempts.len() as f64 * 0.001,
            total_duration_ms: attempts.len() as u64 * 500,
            passed_attempt_number: passed,
            success_rate: if success { 1.0 } else { 0.0 },
            executed_at: Utc::now(),
            executed_by: "albench".to_string(),
            environment: "test".to_string(),
            attempts,
        }
    }

    const GOOD_CODE: &str = "codeunit 50100 \"Long Enough Object\" { }";

    #[test]
    fn test_duplicate_execution_id_added_once() {
        let mut aggregator = ResultAggregator::new();
        let r = result("t1", "mock/m", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]);
        aggregator.add(r.clone());
        aggregator.add(r);
        assert_eq!(aggregator.results().len(), 1);
    }

    #[test]
    fn test_model_stats_pass_buckets() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(result("t1", "v", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]));
        aggregator.add(result(
            "t2",
            "v",
            true,
            90.0,
            vec![
                attempt(1, false, 50.0, &["Compilation failed: AL0001"], GOOD_CODE),
                attempt(2, true, 100.0, &[], GOOD_CODE),
            ],
        ));
        aggregator.add(result(
            "t3",
            "v",
            true,
            80.0,
            vec![
                attempt(1, false, 50.0, &["Compilation failed: AL0001"], GOOD_CODE),
                attempt(2, false, 50.0, &["Compilation failed: AL0001"], GOOD_CODE),
                attempt(3, true, 100.0, &[], GOOD_CODE),
            ],
        ));

        let stats = &aggregator.model_stats()["v"];
        assert_eq!(stats.tasks_passed, 3);
        assert_eq!(stats.passed_on_attempt1, 1);
        // Cumulative: attempts 1 and 2 both count; attempt 3 in neither.
        assert_eq!(stats.passed_on_attempt2, 2);
        assert!((stats.avg_attempts - 2.0).abs() < 1e-9);
        assert!((stats.avg_score - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_classification_malformed_by_short_code() {
        let last = attempt(1, false, 0.0, &["something odd"], "short");
        assert_eq!(classify_failure(&last), FailureClass::Malformed);
    }

    #[test]
    fn test_failure_classification_malformed_by_reason() {
        let last = attempt(1, false, 0.0, &["LLM call failed"], GOOD_CODE);
        assert_eq!(classify_failure(&last), FailureClass::Malformed);
    }

    #[test]
    fn test_failure_classification_test_over_compile() {
        let last = attempt(
            2,
            false,
            50.0,
            &["Tests failed: 1/3", "Compilation failed earlier"],
            GOOD_CODE,
        );
        assert_eq!(classify_failure(&last), FailureClass::Test);
    }

    #[test]
    fn test_failure_classification_compile() {
        let last = attempt(2, false, 25.0, &["Compilation failed: AL0118"], GOOD_CODE);
        assert_eq!(classify_failure(&last), FailureClass::Compile);
    }

    #[test]
    fn test_failure_classes_roll_into_model_stats() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(result(
            "t1",
            "v",
            false,
            25.0,
            vec![attempt(1, false, 50.0, &["Compilation failed: AL1"], GOOD_CODE)],
        ));
        aggregator.add(result(
            "t2",
            "v",
            false,
            35.0,
            vec![attempt(1, false, 70.0, &["Tests failed: 2/3"], GOOD_CODE)],
        ));
        aggregator.add(result(
            "t3",
            "v",
            false,
            0.0,
            vec![attempt(1, false, 0.0, &["LLM call failed"], "")],
        ));

        let stats = &aggregator.model_stats()["v"];
        assert_eq!(stats.compile_failures, 1);
        assert_eq!(stats.test_failures, 1);
        assert_eq!(stats.malformed_responses, 1);
        assert_eq!(stats.tasks_failed, 3);
    }

    #[test]
    fn test_task_stats_best_model_first_at_best_score() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(result("t1", "a", true, 90.0, vec![attempt(1, true, 90.0, &[], GOOD_CODE)]));
        aggregator.add(result("t1", "b", true, 90.0, vec![attempt(1, true, 90.0, &[], GOOD_CODE)]));
        aggregator.add(result("t1", "c", false, 40.0, vec![attempt(1, false, 80.0, &["Tests failed: 1/3"], GOOD_CODE)]));

        let stats = &aggregator.task_stats()["t1"];
        assert_eq!(stats.models_passed, 2);
        assert_eq!(stats.models_failed, 1);
        assert_eq!(stats.best_score, 90.0);
        assert_eq!(stats.best_model.as_deref(), Some("a"));
    }

    #[test]
    fn test_aggregate_stats_totals() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(result("t1", "a", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]));
        aggregator.add(result("t1", "b", false, 25.0, vec![attempt(1, false, 50.0, &["Compilation failed: x"], GOOD_CODE)]));
        aggregator.add(result("t2", "a", true, 90.0, vec![
            attempt(1, false, 50.0, &["Compilation failed: x"], GOOD_CODE),
            attempt(2, true, 100.0, &[], GOOD_CODE),
        ]));

        let stats = aggregator.aggregate_stats();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.overall_pass_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.pass_num1, 1);
        assert_eq!(stats.pass_num2, 2);
        assert_eq!(stats.total_compile_errors, 1);
        assert_eq!(stats.prompt_tokens, 400);
        assert_eq!(stats.completion_tokens, 200);
        // Two distinct tasks, 4 attempts x 500ms.
        assert!((stats.seconds_per_task - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pass_sum_invariant() {
        let mut aggregator = ResultAggregator::new();
        for (task, variant, ok) in [("t1", "a", true), ("t1", "b", false), ("t2", "a", true), ("t2", "b", true)] {
            aggregator.add(result(task, variant, ok, 50.0, vec![attempt(1, ok, 50.0, &[], GOOD_CODE)]));
        }
        let models = aggregator.model_stats();
        let total: usize = models
            .values()
            .map(|s| s.tasks_passed + s.tasks_failed)
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_comparison_unique_winner() {
        let mut model_results = HashMap::new();
        model_results.insert(
            "a".to_string(),
            result("t1", "a", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]),
        );
        model_results.insert(
            "b".to_string(),
            result("t1", "b", false, 40.0, vec![attempt(1, false, 80.0, &["Tests failed: 1/3"], GOOD_CODE)]),
        );

        let comparison = ResultAggregator::build_task_comparison("t1", &model_results);
        assert_eq!(comparison.winner.as_deref(), Some("a"));
        assert_eq!(comparison.best_score, 100.0);
        assert_eq!(comparison.ranking[0].rank, 1);
        assert_eq!(comparison.ranking[1].rank, 2);
        assert_eq!(comparison.passing_models, vec!["a"]);
        assert_eq!(comparison.failing_models, vec!["b"]);
    }

    #[test]
    fn test_comparison_tie_has_no_winner() {
        let mut model_results = HashMap::new();
        model_results.insert(
            "a".to_string(),
            result("t1", "a", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]),
        );
        model_results.insert(
            "b".to_string(),
            result("t1", "b", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]),
        );

        let comparison = ResultAggregator::build_task_comparison("t1", &model_results);
        assert!(comparison.winner.is_none());
        assert_eq!(comparison.ranking[0].rank, 1);
        assert_eq!(comparison.ranking[1].rank, 1);
    }

    #[test]
    fn test_comparison_all_zero_has_no_winner() {
        let mut model_results = HashMap::new();
        model_results.insert(
            "a".to_string(),
            result("t1", "a", false, 0.0, vec![attempt(1, false, 0.0, &["LLM call failed"], "")]),
        );
        let comparison = ResultAggregator::build_task_comparison("t1", &model_results);
        assert!(comparison.winner.is_none());
    }

    #[test]
    fn test_dense_ranking() {
        let mut model_results = HashMap::new();
        for (variant, score) in [("a", 100.0), ("b", 100.0), ("c", 70.0), ("d", 40.0)] {
            model_results.insert(
                variant.to_string(),
                result("t1", variant, score == 100.0, score, vec![attempt(1, score == 100.0, score, &[], GOOD_CODE)]),
            );
        }
        let comparison = ResultAggregator::build_task_comparison("t1", &model_results);
        let ranks: Vec<u32> = comparison.ranking.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 1, 2, 3]);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(result("t1", "a", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]));
        let first = aggregator.finalize();
        let second = aggregator.finalize();
        assert_eq!(first.summary, second.summary);
        assert_eq!(first.models, second.models);
        assert_eq!(first.comparisons, second.comparisons);
    }

    #[test]
    fn test_parallel_result_appends_nested() {
        let mut model_results = HashMap::new();
        model_results.insert(
            "a".to_string(),
            result("t1", "a", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]),
        );
        let comparison = ResultAggregator::build_task_comparison("t1", &model_results);
        let parallel = ParallelTaskResult {
            task_id: "t1".to_string(),
            model_results,
            failures: HashMap::new(),
            partial_success: true,
            comparison,
            duration_ms: 900,
        };

        let mut aggregator = ResultAggregator::new();
        aggregator.add_parallel_task_result(&parallel);
        assert_eq!(aggregator.results().len(), 1);
        let summary = aggregator.finalize();
        assert_eq!(summary.comparisons.len(), 1);
        assert_eq!(summary.summary.task_count, 1);
    }

    #[test]
    fn test_summary_json_shape() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(result("t1", "a", true, 100.0, vec![attempt(1, true, 100.0, &[], GOOD_CODE)]));
        let json = serde_json::to_value(aggregator.finalize()).unwrap();
        assert!(json.get("summary").is_some());
        assert!(json["summary"].get("taskCount").is_some());
        assert!(json["summary"].get("passRate").is_some());
        assert!(json.get("models").is_some());
        assert!(json.get("generatedAt").is_some());
    }
}
