//! Crate-level error type
//!
//! Wraps the per-module error enums for callers that drive a whole run.
//! `Critical` is the one kind that aborts a run: everything else is
//! contained at the variant or attempt boundary.

use thiserror::Error;

/// Top-level harness error
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] crate::manifest::ManifestError),

    #[error("Variant error: {0}")]
    Variant(#[from] crate::variant::VariantError),

    #[error("Template error: {0}")]
    Render(#[from] crate::render::RenderError),

    #[error("Compile queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Result store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] crate::llm::provider::LlmError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    /// Aborts the run: unstarted work is skipped, in-flight work finishes,
    /// queues drain, and this error is re-raised.
    #[error("Critical error: {message}")]
    Critical { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HarnessError {
    pub fn critical<S: Into<String>>(message: S) -> Self {
        Self::Critical {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error should abort the remainder of the run.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical { .. })
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
