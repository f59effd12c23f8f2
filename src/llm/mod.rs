//! LLM generation layer
//!
//! Provider-agnostic generation contract plus the concrete vendor
//! implementations and the code extractor the work pool applies to
//! response text.

pub mod extract;
pub mod provider;
pub mod providers;

pub use extract::{CodeExtractor, Extraction};
pub use provider::*;
pub use providers::*;
