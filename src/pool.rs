//! LLM work pool
//!
//! Bounds total concurrent generations across all providers, attaches rate
//! limiter leases, invokes the provider, extracts code from the response,
//! and retries transient failures. Retry here is intra-attempt and capped
//! at one per class; attempt-level retry with a repair prompt belongs to
//! the orchestrator.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::llm::extract::CodeExtractor;
use crate::llm::provider::{GenerationRequest, LlmError, ProviderRegistry};
use crate::ratelimit::RateLimiter;
use crate::types::{LlmWorkItem, LlmWorkResult};

/// Extraction confidence above which a result is flagged ready to compile.
const READY_CONFIDENCE: f64 = 0.5;

static RATE_LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)rate limit|429|too many|quota").expect("static rate-limit pattern")
});

static TRANSIENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timeout|connection|ECONNRESET|ENOTFOUND|5\d\d")
        .expect("static transient pattern")
});

// Best-effort: upstream libraries surface Retry-After only inside message
// text, so it is scraped with a regex rather than read structurally.
static RETRY_AFTER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry[-_ ]?after[:=]?\s*(\d+)").expect("static retry-after pattern")
});

/// How an adapter error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    Transient,
    Fatal,
}

/// Classify adapter error text. Rate-limit wins over transient; everything
/// unmatched is fatal.
pub fn classify_error(message: &str) -> ErrorClass {
    if RATE_LIMIT_PATTERN.is_match(message) {
        ErrorClass::RateLimited
    } else if TRANSIENT_PATTERN.is_match(message) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// Scrape a Retry-After value (seconds) out of error text.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    RETRY_AFTER_PATTERN
        .captures(message)
        .and_then(|c| c[1].parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct WorkPoolConfig {
    /// Process-wide cap on in-flight generations.
    pub max_concurrent: usize,
    /// Poll period while the global cap is saturated.
    pub poll_interval: Duration,
}

impl Default for WorkPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Work pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Work pool is draining; no new submissions accepted")]
    Draining,
}

/// Decrements the pool's active counter when the work item finishes, even
/// if the future is cancelled mid-call.
struct ActiveSlot(Arc<AtomicUsize>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct LlmWorkPool {
    providers: Arc<ProviderRegistry>,
    limiter: Arc<RateLimiter>,
    extractor: CodeExtractor,
    active: Arc<AtomicUsize>,
    draining: AtomicBool,
    config: WorkPoolConfig,
}

impl LlmWorkPool {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        limiter: Arc<RateLimiter>,
        config: WorkPoolConfig,
    ) -> Self {
        Self {
            providers,
            limiter,
            extractor: CodeExtractor::new(),
            active: Arc::new(AtomicUsize::new(0)),
            draining: AtomicBool::new(false),
            config,
        }
    }

    /// Currently in-flight generations.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run one work item to a result. Adapter failures come back as
    /// unsuccessful results, not errors; the only error is `Draining`.
    pub async fn submit(&self, item: LlmWorkItem) -> Result<LlmWorkResult, PoolError> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(PoolError::Draining);
        }

        let _slot = self.admit().await?;
        let started = Instant::now();

        let mut retried_rate_limit = false;
        let mut retried_transient = false;

        loop {
            let lease = self
                .limiter
                .acquire(&item.provider, item.context.estimated_tokens())
                .await;

            match self.call_provider(&item).await {
                Ok(response) => {
                    self.limiter
                        .release(lease, Some(response.usage.total_tokens))
                        .await;
                    if response.content.trim().is_empty() {
                        // Malformed: the call "succeeded" but produced
                        // nothing to compile.
                        warn!(work_item = %item.id, model = %item.model, "empty response content");
                        return Ok(LlmWorkResult {
                            work_item_id: item.id.clone(),
                            success: false,
                            code: None,
                            llm_response: Some(response),
                            error: None,
                            duration: started.elapsed(),
                            ready_for_compile: false,
                        });
                    }
                    let extraction = self.extractor.extract(&response.content);
                    let ready = extraction.confidence > READY_CONFIDENCE;
                    debug!(
                        work_item = %item.id,
                        model = %item.model,
                        confidence = extraction.confidence,
                        ready_for_compile = ready,
                        "generation complete"
                    );
                    return Ok(LlmWorkResult {
                        work_item_id: item.id.clone(),
                        success: true,
                        code: Some(extraction.code),
                        llm_response: Some(response),
                        error: None,
                        duration: started.elapsed(),
                        ready_for_compile: ready,
                    });
                }
                Err(error) => {
                    let message = error.to_string();
                    let class = classify_error(&message);
                    if class == ErrorClass::RateLimited {
                        // Record the upstream signal while the multiplier
                        // from this failure streak is still in effect.
                        self.limiter
                            .update_from_error(
                                &item.provider,
                                parse_retry_after(&message),
                                true,
                            )
                            .await;
                    }
                    self.limiter.release(lease, None).await;

                    match class {
                        ErrorClass::RateLimited if !retried_rate_limit => {
                            retried_rate_limit = true;
                            let delay =
                                parse_retry_after(&message).unwrap_or(Duration::from_secs(1));
                            warn!(
                                work_item = %item.id,
                                provider = %item.provider,
                                delay_ms = delay.as_millis() as u64,
                                "rate limited upstream, retrying once"
                            );
                            sleep(delay).await;
                            continue;
                        }
                        ErrorClass::Transient
                            if item.attempt_number <= 2 && !retried_transient =>
                        {
                            retried_transient = true;
                            let delay =
                                Duration::from_millis(1000 * u64::from(item.attempt_number));
                            warn!(
                                work_item = %item.id,
                                provider = %item.provider,
                                delay_ms = delay.as_millis() as u64,
                                "transient provider error, retrying once"
                            );
                            // The global slot is still held, so the retry
                            // does not re-run admission.
                            sleep(delay).await;
                            continue;
                        }
                        _ => {
                            debug!(
                                work_item = %item.id,
                                model = %item.model,
                                error = %message,
                                ?class,
                                "generation failed"
                            );
                            return Ok(LlmWorkResult {
                                work_item_id: item.id.clone(),
                                success: false,
                                code: None,
                                llm_response: None,
                                error: Some(message),
                                duration: started.elapsed(),
                                ready_for_compile: false,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Run all items in parallel. Never fails: per-item failures become
    /// unsuccessful results keyed by the item's model.
    pub async fn submit_batch(
        &self,
        items: Vec<LlmWorkItem>,
    ) -> HashMap<String, LlmWorkResult> {
        let futures = items.into_iter().map(|item| {
            let model = item.model.clone();
            let id = item.id.clone();
            async move {
                let result = match self.submit(item).await {
                    Ok(result) => result,
                    Err(e) => LlmWorkResult {
                        work_item_id: id,
                        success: false,
                        code: None,
                        llm_response: None,
                        error: Some(e.to_string()),
                        duration: Duration::ZERO,
                        ready_for_compile: false,
                    },
                };
                (model, result)
            }
        });
        futures::future::join_all(futures).await.into_iter().collect()
    }

    /// Refuse new submissions and wait until every in-flight item has
    /// finished.
    pub async fn drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        while self.active.load(Ordering::SeqCst) > 0 {
            sleep(self.config.poll_interval).await;
        }
    }

    /// Busy-wait admission against the global cap, bounded by the poll
    /// interval.
    async fn admit(&self) -> Result<ActiveSlot, PoolError> {
        loop {
            if self.draining.load(Ordering::SeqCst) {
                return Err(PoolError::Draining);
            }
            let current = self.active.load(Ordering::SeqCst);
            if current < self.config.max_concurrent
                && self
                    .active
                    .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Ok(ActiveSlot(self.active.clone()));
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn call_provider(
        &self,
        item: &LlmWorkItem,
    ) -> Result<crate::llm::provider::LlmResponse, LlmError> {
        let provider = self.providers.resolve(&item.provider)?;
        let request = GenerationRequest {
            instructions: item.context.instructions.clone(),
            model: item.model.clone(),
            temperature: item.context.temperature,
            max_tokens: item.context.max_tokens,
            system_prompt: item.context.system_prompt.clone(),
            thinking_budget: item.context.thinking_budget,
            timeout: item.context.timeout,
        };

        match item.previous_attempts.last() {
            Some(previous) if item.attempt_number > 1 => {
                provider
                    .generate_fix(
                        &previous.extracted_code,
                        &previous.failure_reasons,
                        &request,
                        &item.context,
                    )
                    .await
            }
            _ => provider.generate_code(&request, &item.context).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::LlmError;
    use crate::testing::mocks::{
        default_al_response, test_context, test_manifest, test_variant, MockOutcome, MockProvider,
    };
    use chrono::Utc;

    fn pool_with(provider: MockProvider, max_concurrent: usize) -> LlmWorkPool {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider));
        LlmWorkPool::new(
            Arc::new(registry),
            Arc::new(RateLimiter::new()),
            WorkPoolConfig {
                max_concurrent,
                poll_interval: Duration::from_millis(10),
            },
        )
    }

    fn work_item(model: &str, attempt_number: u32) -> LlmWorkItem {
        let manifest = Arc::new(test_manifest("t1"));
        let context = test_context(manifest.clone(), &test_variant());
        LlmWorkItem {
            id: format!("item-{model}-{attempt_number}"),
            manifest,
            provider: "mock".to_string(),
            model: model.to_string(),
            attempt_number,
            previous_attempts: vec![],
            priority: 0,
            created_at: Utc::now(),
            context,
        }
    }

    #[tokio::test]
    async fn test_submit_success_extracts_code() {
        let pool = pool_with(MockProvider::new(), 2);
        let result = pool.submit(work_item("m", 1)).await.unwrap();
        assert!(result.success);
        assert!(result.ready_for_compile);
        assert!(result.code.as_deref().unwrap().contains("codeunit"));
        assert!(result.llm_response.is_some());
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_content_is_unsuccessful() {
        let pool = pool_with(
            MockProvider::with_script([MockOutcome::Content(String::new())]),
            2,
        );
        let result = pool.submit(work_item("m", 1)).await.unwrap();
        assert!(!result.success);
        assert!(result.code.is_none());
        assert!(result.error.is_none());
        assert!(!result.ready_for_compile);
    }

    #[tokio::test]
    async fn test_transient_error_retried_once() {
        let provider = MockProvider::with_script([
            MockOutcome::Error(LlmError::NetworkError("connection reset".to_string())),
            MockOutcome::Content(default_al_response()),
        ]);
        let pool = pool_with(provider, 2);
        let result = pool.submit(work_item("m", 1)).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_transient_error_fails_after_one_retry() {
        let provider = MockProvider::with_script([
            MockOutcome::Error(LlmError::NetworkError("connection reset".to_string())),
            MockOutcome::Error(LlmError::NetworkError("connection reset".to_string())),
        ]);
        let pool = pool_with(provider, 2);
        let result = pool.submit(work_item("m", 1)).await.unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_transient_error_not_retried_on_late_attempts() {
        let provider = MockProvider::with_script([MockOutcome::Error(LlmError::NetworkError(
            "connection reset".to_string(),
        ))]);
        let pool = pool_with(provider, 2);
        // Attempt 3: past the retry window, fails immediately.
        let result = pool.submit(work_item("m", 3)).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let provider = MockProvider::with_script([MockOutcome::Error(
            LlmError::AuthenticationFailed("bad key".to_string()),
        )]);
        let pool = pool_with(provider, 2);
        let result = pool.submit(work_item("m", 1)).await.unwrap();
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("Authentication failed"));
    }

    #[tokio::test]
    async fn test_submit_batch_keys_by_model_and_never_errors() {
        let provider = MockProvider::with_script([
            MockOutcome::Content(default_al_response()),
            MockOutcome::Error(LlmError::AuthenticationFailed("bad key".to_string())),
        ]);
        let pool = pool_with(provider, 1);
        let results = pool
            .submit_batch(vec![work_item("model-a", 1), work_item("model-b", 1)])
            .await;

        assert_eq!(results.len(), 2);
        // With max_concurrent = 1 the items run in order.
        assert!(results["model-a"].success);
        assert!(!results["model-b"].success);
    }

    #[tokio::test]
    async fn test_drain_refuses_new_submissions() {
        let pool = pool_with(MockProvider::new(), 2);
        pool.drain().await;
        let result = pool.submit(work_item("m", 1)).await;
        assert!(matches!(result, Err(PoolError::Draining)));
    }

    #[test]
    fn test_classify_rate_limit_messages() {
        assert_eq!(classify_error("Rate limit exceeded"), ErrorClass::RateLimited);
        assert_eq!(classify_error("HTTP 429 from upstream"), ErrorClass::RateLimited);
        assert_eq!(classify_error("Too many requests"), ErrorClass::RateLimited);
        assert_eq!(classify_error("quota exhausted"), ErrorClass::RateLimited);
    }

    #[test]
    fn test_classify_transient_messages() {
        assert_eq!(classify_error("request timeout"), ErrorClass::Transient);
        assert_eq!(classify_error("connection refused"), ErrorClass::Transient);
        assert_eq!(classify_error("ECONNRESET"), ErrorClass::Transient);
        assert_eq!(classify_error("dns: ENOTFOUND api.example"), ErrorClass::Transient);
        assert_eq!(classify_error("server returned 503"), ErrorClass::Transient);
    }

    #[test]
    fn test_rate_limit_wins_over_transient() {
        // "429" and "timeout" both present; rate-limit class takes priority.
        assert_eq!(
            classify_error("429 too many requests, connection timeout"),
            ErrorClass::RateLimited
        );
    }

    #[test]
    fn test_classify_fatal_fallthrough() {
        assert_eq!(classify_error("invalid api key"), ErrorClass::Fatal);
        assert_eq!(classify_error("model not found"), ErrorClass::Fatal);
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(
            parse_retry_after("429 Too Many Requests, Retry-After: 2"),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            parse_retry_after("rate limited; retry_after=30"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_retry_after("rate limited, no hint"), None);
    }
}
