//! Compile queue and queue pool
//!
//! Each sandbox gets one queue: a bounded FIFO drained by a single worker
//! task, so at most one compile (and test) runs against a sandbox at any
//! moment. The pool offers the same surface over several sandboxes with
//! least-loaded routing and no work stealing.

use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::sandbox::{SandboxError, SandboxProject, SandboxProvider};
use crate::types::{CompileWorkItem, CompileWorkResult};

/// Poll period for `drain`.
const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Pending entries beyond which `enqueue` rejects immediately.
    pub max_queue_size: usize,
    /// How long an entry may sit pending before it is timed out.
    pub timeout: Duration,
    /// Platform tag stamped into staged project manifests.
    pub platform: String,
    /// Runtime tag stamped into staged project manifests.
    pub runtime: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            timeout: Duration::from_millis(300_000),
            platform: "1.0.0.0".to_string(),
            runtime: "11.0".to_string(),
        }
    }
}

/// Compile queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Compile queue full: {current_size} entries pending")]
    Full { current_size: usize },
    #[error("Compile queue entry timed out after {wait_ms} ms")]
    Timeout { wait_ms: u64 },
    #[error("Compile queue cleared")]
    Cleared,
    #[error("Project staging failed: {0}")]
    Staging(String),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("Compile queue pool requires at least one sandbox")]
    NoSandboxes,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub processed: u64,
    pub avg_wait_ms: f64,
    pub avg_process_ms: f64,
}

type EntryResult = Result<CompileWorkResult, QueueError>;

struct PendingEntry {
    seq: u64,
    item: CompileWorkItem,
    enqueued_at: Instant,
    tx: oneshot::Sender<EntryResult>,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<PendingEntry>,
    processing: bool,
    processed: u64,
    total_wait: Duration,
    total_process: Duration,
    next_seq: u64,
}

/// FIFO compile queue serializing one sandbox.
pub struct CompileQueue {
    inner: Arc<Mutex<QueueInner>>,
    notify: Arc<Notify>,
    sandbox_name: String,
    config: QueueConfig,
    worker: tokio::task::JoinHandle<()>,
}

impl CompileQueue {
    pub fn new(
        sandbox: Arc<dyn SandboxProvider>,
        sandbox_name: impl Into<String>,
        config: QueueConfig,
    ) -> Self {
        let sandbox_name = sandbox_name.into();
        let inner: Arc<Mutex<QueueInner>> = Arc::default();
        let notify = Arc::new(Notify::new());

        let worker = tokio::spawn(Self::worker_loop(
            inner.clone(),
            notify.clone(),
            sandbox,
            sandbox_name.clone(),
            config.clone(),
        ));

        Self {
            inner,
            notify,
            sandbox_name,
            config,
            worker,
        }
    }

    pub fn sandbox_name(&self) -> &str {
        &self.sandbox_name
    }

    /// Admit one item. Rejects synchronously with `Full` when saturated;
    /// resolves when the worker processes the entry, the per-entry timer
    /// fires, or the queue is cleared.
    pub async fn enqueue(&self, item: CompileWorkItem) -> EntryResult {
        let (tx, mut rx) = oneshot::channel();
        let (seq, enqueued_at) = {
            let mut inner = self.inner.lock().await;
            if inner.pending.len() >= self.config.max_queue_size {
                return Err(QueueError::Full {
                    current_size: inner.pending.len(),
                });
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let now = Instant::now();
            inner.pending.push_back(PendingEntry {
                seq,
                item,
                enqueued_at: now,
                tx,
            });
            (seq, now)
        };
        self.notify.notify_one();

        let timer = sleep(self.config.timeout);
        tokio::pin!(timer);

        tokio::select! {
            result = &mut rx => result.unwrap_or(Err(QueueError::Cleared)),
            _ = &mut timer => {
                let removed = {
                    let mut inner = self.inner.lock().await;
                    match inner.pending.iter().position(|e| e.seq == seq) {
                        Some(index) => {
                            inner.pending.remove(index);
                            true
                        }
                        None => false,
                    }
                };
                if removed {
                    Err(QueueError::Timeout {
                        wait_ms: enqueued_at.elapsed().as_millis() as u64,
                    })
                } else {
                    // Already in process; let it run to resolution.
                    rx.await.unwrap_or(Err(QueueError::Cleared))
                }
            }
        }
    }

    /// Resolve when the queue is empty and nothing is in process.
    pub async fn drain(&self) {
        loop {
            {
                let inner = self.inner.lock().await;
                if inner.pending.is_empty() && !inner.processing {
                    return;
                }
            }
            sleep(DRAIN_POLL).await;
        }
    }

    /// Reject all pending entries. In-process work continues to resolution.
    pub async fn clear(&self) {
        let entries: Vec<PendingEntry> = {
            let mut inner = self.inner.lock().await;
            inner.pending.drain(..).collect()
        };
        for entry in entries {
            let _ = entry.tx.send(Err(QueueError::Cleared));
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_processing(&self) -> bool {
        self.inner.lock().await.processing
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let processed = inner.processed;
        let avg = |total: Duration| {
            if processed == 0 {
                0.0
            } else {
                total.as_millis() as f64 / processed as f64
            }
        };
        QueueStats {
            pending: inner.pending.len(),
            processing: usize::from(inner.processing),
            processed,
            avg_wait_ms: avg(inner.total_wait),
            avg_process_ms: avg(inner.total_process),
        }
    }

    async fn worker_loop(
        inner: Arc<Mutex<QueueInner>>,
        notify: Arc<Notify>,
        sandbox: Arc<dyn SandboxProvider>,
        sandbox_name: String,
        config: QueueConfig,
    ) {
        loop {
            notify.notified().await;
            loop {
                let entry = {
                    let mut guard = inner.lock().await;
                    match guard.pending.pop_front() {
                        Some(entry) => {
                            guard.processing = true;
                            Some(entry)
                        }
                        None => {
                            guard.processing = false;
                            None
                        }
                    }
                };
                let Some(entry) = entry else { break };

                let wait = entry.enqueued_at.elapsed();
                trace!(
                    sandbox = %sandbox_name,
                    item = %entry.item.id,
                    wait_ms = wait.as_millis() as u64,
                    "compile queue dequeued item"
                );

                let process_start = Instant::now();
                let result =
                    Self::process(sandbox.as_ref(), &sandbox_name, &config, &entry.item).await;
                let process = process_start.elapsed();

                {
                    let mut guard = inner.lock().await;
                    guard.processed += 1;
                    guard.total_wait += wait;
                    guard.total_process += process;
                    guard.processing = false;
                }

                if let Err(e) = &result {
                    error!(sandbox = %sandbox_name, item = %entry.item.id, error = %e, "compile item rejected");
                }
                // Receiver may have timed out and given up; nothing to do.
                let _ = entry.tx.send(result);
            }
        }
    }

    /// Stage, compile, optionally test, clean up.
    async fn process(
        sandbox: &dyn SandboxProvider,
        sandbox_name: &str,
        config: &QueueConfig,
        item: &CompileWorkItem,
    ) -> EntryResult {
        let started = Instant::now();
        let staged = stage_project(config, item)?;

        let compile_start = Instant::now();
        let compilation = sandbox.compile_project(sandbox_name, &staged.project).await?;
        let compile_duration = compile_start.elapsed();

        let mut tests = None;
        let mut test_duration = None;
        if compilation.success && item.context.manifest.has_tests() {
            let test_start = Instant::now();
            tests = Some(sandbox.run_tests(sandbox_name, &staged.project).await?);
            test_duration = Some(test_start.elapsed());
        }

        debug!(
            sandbox = %sandbox_name,
            item = %item.id,
            compiled = compilation.success,
            tested = tests.is_some(),
            "compile sequence finished"
        );

        // TempDir cleanup errors are swallowed on drop.
        drop(staged);

        Ok(CompileWorkResult {
            work_item_id: item.id.clone(),
            compilation,
            tests,
            duration: started.elapsed(),
            compile_duration,
            test_duration,
        })
    }
}

impl Drop for CompileQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct StagedProject {
    // Held so the directory lives for the duration of the compile.
    _dir: tempfile::TempDir,
    project: SandboxProject,
}

/// Materialize a temporary project directory: a generated project manifest
/// plus the artifact at `<taskId>.al`.
fn stage_project(config: &QueueConfig, item: &CompileWorkItem) -> Result<StagedProject, QueueError> {
    let dir = tempfile::Builder::new()
        .prefix("albench-")
        .tempdir()
        .map_err(|e| QueueError::Staging(e.to_string()))?;

    let project_id = Uuid::new_v4().to_string();
    let manifest_path = dir.path().join("app.json");
    let manifest = json!({
        "id": project_id,
        "name": item.context.manifest.id,
        "publisher": "albench",
        "version": "1.0.0.0",
        "platform": config.platform,
        "runtime": config.runtime,
        "test": item.context.manifest.expected.test_app,
    });
    std::fs::write(
        &manifest_path,
        serde_json::to_vec_pretty(&manifest).map_err(|e| QueueError::Staging(e.to_string()))?,
    )
    .map_err(|e| QueueError::Staging(e.to_string()))?;

    let code_path = dir.path().join(&item.context.target_file);
    std::fs::write(&code_path, &item.code).map_err(|e| QueueError::Staging(e.to_string()))?;

    let project = SandboxProject {
        id: project_id,
        root: dir.path().to_path_buf(),
        manifest_path,
        code_files: vec![code_path],
        test_app: item.context.manifest.expected.test_app.clone(),
        platform: config.platform.clone(),
        runtime: config.runtime.clone(),
    };

    Ok(StagedProject { _dir: dir, project })
}

/// Pool of compile queues, one per sandbox, with least-loaded routing.
pub struct CompileQueuePool {
    queues: Vec<CompileQueue>,
}

impl CompileQueuePool {
    /// Build one queue per sandbox name. An empty list is a programming
    /// error and is rejected here.
    pub fn new(
        sandbox: Arc<dyn SandboxProvider>,
        sandbox_names: &[String],
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        if sandbox_names.is_empty() {
            return Err(QueueError::NoSandboxes);
        }
        let queues = sandbox_names
            .iter()
            .map(|name| CompileQueue::new(sandbox.clone(), name.clone(), config.clone()))
            .collect();
        Ok(Self { queues })
    }

    /// Route to the queue with the fewest pending entries; ties go to the
    /// first encountered. No work stealing afterwards.
    pub async fn enqueue(&self, item: CompileWorkItem) -> EntryResult {
        let mut best_index = 0;
        let mut best_len = usize::MAX;
        for (index, queue) in self.queues.iter().enumerate() {
            let len = queue.len().await;
            if len < best_len {
                best_len = len;
                best_index = index;
            }
        }
        self.queues[best_index].enqueue(item).await
    }

    pub async fn drain(&self) {
        futures::future::join_all(self.queues.iter().map(|q| q.drain())).await;
    }

    pub async fn clear(&self) {
        futures::future::join_all(self.queues.iter().map(|q| q.clear())).await;
    }

    pub async fn len(&self) -> usize {
        let mut total = 0;
        for queue in &self.queues {
            total += queue.len().await;
        }
        total
    }

    pub async fn is_processing(&self) -> bool {
        for queue in &self.queues {
            if queue.is_processing().await {
                return true;
            }
        }
        false
    }

    /// Sum counts; average the per-queue averages unweighted.
    pub async fn stats(&self) -> QueueStats {
        let mut aggregate = QueueStats::default();
        let count = self.queues.len() as f64;
        for queue in &self.queues {
            let stats = queue.stats().await;
            aggregate.pending += stats.pending;
            aggregate.processing += stats.processing;
            aggregate.processed += stats.processed;
            aggregate.avg_wait_ms += stats.avg_wait_ms / count;
            aggregate.avg_process_ms += stats.avg_process_ms / count;
        }
        aggregate
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn sandbox_names(&self) -> Vec<&str> {
        self.queues.iter().map(|q| q.sandbox_name()).collect()
    }
}
