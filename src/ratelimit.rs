//! Per-provider rate limiting
//!
//! Admission control for LLM calls: every provider has three budgets that
//! must hold simultaneously (max concurrent in-flight, requests per minute,
//! tokens per minute) plus an exponential cool-off driven by upstream
//! rate-limit signals. Leases are minted on admission and released when the
//! call finishes; waiters blocked on the concurrency budget are served in
//! strict FIFO order per provider.
//!
//! All timing uses `tokio::time::Instant` so tests can pause and advance
//! the clock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, trace, warn};

/// Sliding-window length for the RPM and TPM budgets.
const WINDOW: Duration = Duration::from_secs(60);

/// Cap on the consecutive-error backoff multiplier.
const MAX_BACKOFF_MULTIPLIER: u32 = 64;

/// Cap on a single computed backoff delay when the upstream gave none.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Per-provider admission budgets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderLimits {
    pub concurrent: usize,
    pub requests_per_minute: usize,
    pub tokens_per_minute: u64,
}

impl ProviderLimits {
    /// Built-in budgets per provider; unknown providers get the openai tier
    /// until `set_limits` overrides them.
    pub fn defaults_for(provider: &str) -> Self {
        let (concurrent, requests_per_minute, tokens_per_minute) = match provider {
            "anthropic" => (3, 50, 100_000),
            "openai" => (5, 60, 150_000),
            "gemini" => (2, 30, 50_000),
            "openrouter" => (10, 100, 200_000),
            "azure" => (5, 60, 150_000),
            "local" => (1, 999, 999_999),
            "mock" => (100, 999, 999_999),
            _ => (5, 60, 150_000),
        };
        Self {
            concurrent,
            requests_per_minute,
            tokens_per_minute,
        }
    }
}

/// Token granting one in-flight call against a provider's budgets.
///
/// Owned by the acquirer and valid until handed back to `release`.
#[derive(Debug)]
pub struct RateLease {
    pub id: u64,
    pub provider: String,
    pub acquired_at: Instant,
    pub estimated_tokens: Option<u64>,
}

/// Point-in-time view of one provider's budgets.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub provider: String,
    pub limits: ProviderLimits,
    pub active_leases: usize,
    pub recent_requests: usize,
    pub recent_tokens: u64,
    pub backoff_remaining: Duration,
    pub backoff_multiplier: u32,
    pub waiting: usize,
}

#[derive(Debug)]
struct TokenEntry {
    at: Instant,
    tokens: u64,
    lease_id: u64,
}

struct ProviderState {
    limits: ProviderLimits,
    active: HashSet<u64>,
    requests: VecDeque<Instant>,
    tokens: VecDeque<TokenEntry>,
    backoff_until: Option<Instant>,
    backoff_multiplier: u32,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl ProviderState {
    fn new(limits: ProviderLimits) -> Self {
        Self {
            limits,
            active: HashSet::new(),
            requests: VecDeque::new(),
            tokens: VecDeque::new(),
            backoff_until: None,
            backoff_multiplier: 1,
            waiters: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: Instant) {
        while self
            .requests
            .front()
            .is_some_and(|&at| now.duration_since(at) >= WINDOW)
        {
            self.requests.pop_front();
        }
        while self
            .tokens
            .front()
            .is_some_and(|e| now.duration_since(e.at) >= WINDOW)
        {
            self.tokens.pop_front();
        }
    }

    fn token_sum(&self) -> u64 {
        self.tokens.iter().map(|e| e.tokens).sum()
    }

    /// Wake at most as many FIFO waiters as there are free concurrency
    /// slots. A waiter whose receiver was dropped (cancelled acquire) is
    /// skipped without consuming a slot.
    fn wake_waiters(&mut self) {
        let mut free = self.limits.concurrent.saturating_sub(self.active.len());
        while free > 0 {
            match self.waiters.pop_front() {
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        free -= 1;
                    }
                }
                None => break,
            }
        }
    }
}

enum Admission {
    Granted(RateLease),
    /// Sleep this long, then re-run admission (backoff or window budgets).
    Sleep(Duration),
    /// Wait for a concurrency slot on the FIFO.
    Queued(oneshot::Receiver<()>),
    /// Concurrency saturated and the caller declined to queue.
    Busy,
}

/// Per-provider rate limiter.
///
/// Cancellation model: dropping an in-flight `acquire` future abandons its
/// waiter slot; the dropped receiver is detected and skipped when `release`
/// wakes the queue, so a cancelled acquire never inherits a lease and never
/// leaks budget.
pub struct RateLimiter {
    providers: Mutex<HashMap<String, ProviderState>>,
    next_lease: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            next_lease: AtomicU64::new(1),
        }
    }

    /// Construct with explicit limits for a set of providers; everything
    /// else falls back to the defaults table.
    pub fn with_limits(limits: impl IntoIterator<Item = (String, ProviderLimits)>) -> Self {
        let map = limits
            .into_iter()
            .map(|(provider, l)| (provider, ProviderState::new(l)))
            .collect();
        Self {
            providers: Mutex::new(map),
            next_lease: AtomicU64::new(1),
        }
    }

    /// Block until all three budgets admit one more request and no backoff
    /// is active, then mint a lease.
    pub async fn acquire(&self, provider: &str, estimated_tokens: Option<u64>) -> RateLease {
        let mut woken = false;
        loop {
            let admission = self
                .check_admission(provider, estimated_tokens, woken, true)
                .await;
            match admission {
                Admission::Granted(lease) => {
                    trace!(provider, lease = lease.id, "rate lease granted");
                    return lease;
                }
                Admission::Sleep(duration) => {
                    trace!(provider, ?duration, "rate limiter waiting on window");
                    sleep(duration).await;
                    woken = false;
                }
                Admission::Queued(rx) => {
                    // A failed receive means the state was reset; loop and
                    // re-run admission either way.
                    let _ = rx.await;
                    woken = true;
                }
                // Unreachable with register = true; back off and re-check.
                Admission::Busy => {
                    sleep(Duration::from_millis(10)).await;
                    woken = false;
                }
            }
        }
    }

    /// Non-blocking acquire: empty exactly when some budget is at its limit
    /// or backoff is active.
    pub async fn try_acquire(
        &self,
        provider: &str,
        estimated_tokens: Option<u64>,
    ) -> Option<RateLease> {
        match self
            .check_admission(provider, estimated_tokens, false, false)
            .await
        {
            Admission::Granted(lease) => Some(lease),
            _ => None,
        }
    }

    async fn check_admission(
        &self,
        provider: &str,
        estimated_tokens: Option<u64>,
        woken: bool,
        register: bool,
    ) -> Admission {
        let now = Instant::now();
        let mut map = self.providers.lock().await;
        let state = map
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(ProviderLimits::defaults_for(provider)));
        state.evict(now);

        if let Some(until) = state.backoff_until {
            if until > now {
                return Admission::Sleep(until - now);
            }
            state.backoff_until = None;
        }

        if state.active.len() >= state.limits.concurrent {
            if !register {
                return Admission::Busy;
            }
            let (tx, rx) = oneshot::channel();
            // A woken waiter that lost the race re-enters at the front so
            // FIFO order holds against newcomers.
            if woken {
                state.waiters.push_front(tx);
            } else {
                state.waiters.push_back(tx);
            }
            return Admission::Queued(rx);
        }

        if state.requests.len() >= state.limits.requests_per_minute {
            let oldest = state
                .requests
                .front()
                .copied()
                .unwrap_or(now);
            return Admission::Sleep((oldest + WINDOW).saturating_duration_since(now));
        }

        if state.token_sum() >= state.limits.tokens_per_minute {
            let oldest = state.tokens.front().map(|e| e.at).unwrap_or(now);
            return Admission::Sleep((oldest + WINDOW).saturating_duration_since(now));
        }

        let id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        state.active.insert(id);
        state.requests.push_back(now);
        if let Some(tokens) = estimated_tokens {
            state.tokens.push_back(TokenEntry {
                at: now,
                tokens,
                lease_id: id,
            });
        }
        Admission::Granted(RateLease {
            id,
            provider: provider.to_string(),
            acquired_at: now,
            estimated_tokens,
        })
    }

    /// Hand a lease back. `actual_tokens` corrects the reserved token-window
    /// entry (or inserts one when nothing was reserved). Releasing resets
    /// the consecutive-error backoff multiplier and wakes pending waiters.
    /// Releasing an unknown lease is a no-op.
    pub async fn release(&self, lease: RateLease, actual_tokens: Option<u64>) {
        let mut map = self.providers.lock().await;
        let Some(state) = map.get_mut(&lease.provider) else {
            return;
        };
        if !state.active.remove(&lease.id) {
            return;
        }

        if let Some(actual) = actual_tokens {
            match state.tokens.iter_mut().find(|e| e.lease_id == lease.id) {
                Some(entry) => entry.tokens = actual,
                None => state.tokens.push_back(TokenEntry {
                    at: Instant::now(),
                    tokens: actual,
                    lease_id: lease.id,
                }),
            }
        }

        state.backoff_multiplier = 1;
        state.wake_waiters();
    }

    /// React to an upstream error. Only rate-limit errors have any effect:
    /// they start (or extend) the cool-off and double the multiplier.
    pub async fn update_from_error(
        &self,
        provider: &str,
        retry_after: Option<Duration>,
        is_rate_limit: bool,
    ) {
        if !is_rate_limit {
            return;
        }
        let mut map = self.providers.lock().await;
        let state = map
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(ProviderLimits::defaults_for(provider)));

        let delay = retry_after.unwrap_or_else(|| {
            Duration::from_millis(
                (1000u64 * u64::from(state.backoff_multiplier)).min(MAX_BACKOFF_MS),
            )
        });
        state.backoff_until = Some(Instant::now() + delay);
        state.backoff_multiplier = (state.backoff_multiplier * 2).min(MAX_BACKOFF_MULTIPLIER);
        warn!(
            provider,
            delay_ms = delay.as_millis() as u64,
            multiplier = state.backoff_multiplier,
            "provider rate limited, backing off"
        );
    }

    pub async fn get_status(&self, provider: &str) -> ProviderStatus {
        let now = Instant::now();
        let mut map = self.providers.lock().await;
        let state = map
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(ProviderLimits::defaults_for(provider)));
        state.evict(now);
        ProviderStatus {
            provider: provider.to_string(),
            limits: state.limits,
            active_leases: state.active.len(),
            recent_requests: state.requests.len(),
            recent_tokens: state.token_sum(),
            backoff_remaining: state
                .backoff_until
                .map(|u| u.saturating_duration_since(now))
                .unwrap_or(Duration::ZERO),
            backoff_multiplier: state.backoff_multiplier,
            waiting: state.waiters.len(),
        }
    }

    pub async fn all_status(&self) -> Vec<ProviderStatus> {
        let providers: Vec<String> = {
            let map = self.providers.lock().await;
            map.keys().cloned().collect()
        };
        let mut statuses = Vec::with_capacity(providers.len());
        for provider in providers {
            statuses.push(self.get_status(&provider).await);
        }
        statuses.sort_by(|a, b| a.provider.cmp(&b.provider));
        statuses
    }

    /// Replace a provider's budgets. Existing leases and windows survive;
    /// waiters get a chance to re-check against the new limits.
    pub async fn set_limits(&self, provider: &str, limits: ProviderLimits) {
        let mut map = self.providers.lock().await;
        let state = map
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(limits));
        state.limits = limits;
        state.wake_waiters();
        debug!(provider, ?limits, "provider limits updated");
    }

    /// Drop all state for one provider, returning it to the pristine
    /// admission state. Pending waiters re-run admission against the fresh
    /// state.
    pub async fn reset(&self, provider: &str) {
        let mut map = self.providers.lock().await;
        map.remove(provider);
    }

    pub async fn reset_all(&self) {
        let mut map = self.providers.lock().await;
        map.clear();
    }
}
