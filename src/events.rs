//! Typed run events and the listener bus
//!
//! The orchestrator narrates a run through these events. Listeners are
//! fire-and-forget sinks: a panicking listener is isolated and counted,
//! never aborting delivery to the others, and per-listener delivery order
//! is emission order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Rolling run progress, emitted after each task completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub active_llm_calls: usize,
    pub compile_queue_length: usize,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
    /// `(elapsed / completed) * remaining`; absent until a task completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BenchEvent {
    TaskStarted {
        task_id: String,
        variant_count: usize,
        timestamp: DateTime<Utc>,
    },
    LlmStarted {
        task_id: String,
        variant_id: String,
        attempt: u32,
    },
    LlmCompleted {
        task_id: String,
        variant_id: String,
        attempt: u32,
        success: bool,
        duration_ms: u64,
    },
    CompileQueued {
        task_id: String,
        variant_id: String,
        attempt: u32,
        queue_length: usize,
    },
    CompileStarted {
        task_id: String,
        variant_id: String,
        attempt: u32,
    },
    CompileCompleted {
        task_id: String,
        variant_id: String,
        attempt: u32,
        success: bool,
    },
    Result {
        task_id: String,
        variant_id: String,
        success: bool,
        score: f64,
    },
    TaskCompleted {
        task_id: String,
        passed: usize,
        failed: usize,
        duration_ms: u64,
    },
    Progress(ProgressSnapshot),
    Error {
        task_id: Option<String>,
        variant_id: Option<String>,
        message: String,
    },
}

/// Sink for run events. Implementations must not block the orchestrator
/// indefinitely.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &BenchEvent);
}

/// Fan-out bus for registered listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    panicked: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    /// Deliver an event to every listener in registration order. A
    /// panicking listener is counted and skipped for this event only.
    pub fn emit(&self, event: &BenchEvent) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                warn!("event listener panicked; continuing delivery");
            }
        }
    }

    /// Number of listener invocations that panicked over the bus lifetime.
    pub fn panicked_count(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl EventListener for Recorder {
        fn on_event(&self, event: &BenchEvent) {
            if let BenchEvent::TaskStarted { task_id, .. } = event {
                self.0.lock().expect("recorder lock").push(task_id.clone());
            }
        }
    }

    struct Panicker;

    impl EventListener for Panicker {
        fn on_event(&self, _event: &BenchEvent) {
            panic!("listener blew up");
        }
    }

    fn task_started(task_id: &str) -> BenchEvent {
        BenchEvent::TaskStarted {
            task_id: task_id.to_string(),
            variant_count: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_delivery_order_per_listener() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        bus.subscribe(recorder.clone());

        bus.emit(&task_started("t1"));
        bus.emit(&task_started("t2"));
        bus.emit(&task_started("t3"));

        assert_eq!(
            *recorder.0.lock().expect("recorder lock"),
            vec!["t1", "t2", "t3"]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_abort_others() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        bus.subscribe(Arc::new(Panicker));
        bus.subscribe(recorder.clone());

        bus.emit(&task_started("t1"));

        assert_eq!(*recorder.0.lock().expect("recorder lock"), vec!["t1"]);
        assert_eq!(bus.panicked_count(), 1);
    }

    #[test]
    fn test_event_serialization_tags() {
        let json = serde_json::to_string(&task_started("t1")).expect("serialize");
        assert!(json.contains("\"type\":\"task_started\""));
    }
}
