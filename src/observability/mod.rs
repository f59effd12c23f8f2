//! Observability
//!
//! Structured logging setup for the harness. Progress reporting rides the
//! event bus in `crate::events`; this module only owns the tracing
//! subscriber wiring.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
