//! Prompt template rendering
//!
//! Templates are plain text with `{{key}}` placeholders. Rendering is
//! deterministic; unknown placeholders are left intact so template authors
//! notice them in the generated prompt.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::manifest::TaskManifest;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("static placeholder pattern")
});

/// Template rendering errors
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to read template {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render_str(&self, template: &str, vars: &HashMap<String, String>) -> String {
        PLACEHOLDER
            .replace_all(template, |captures: &Captures| {
                let key = &captures[1];
                vars.get(key)
                    .cloned()
                    .unwrap_or_else(|| captures[0].to_string())
            })
            .into_owned()
    }

    pub fn render_file(
        &self,
        path: &Path,
        vars: &HashMap<String, String>,
    ) -> Result<String, RenderError> {
        let template = std::fs::read_to_string(path).map_err(|source| RenderError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Ok(self.render_str(&template, vars))
    }
}

/// Standard substitution variables derived from a task manifest.
pub fn task_vars(manifest: &TaskManifest) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("task_id".to_string(), manifest.id.clone());
    vars.insert("description".to_string(), manifest.description.clone());
    vars.insert("target_file".to_string(), manifest.target_file());
    if let Some(test_app) = &manifest.expected.test_app {
        vars.insert("test_app".to_string(), test_app.clone());
    }
    if let Some(difficulty) = &manifest.metadata.difficulty {
        vars.insert("difficulty".to_string(), difficulty.clone());
    }
    if let Some(category) = &manifest.metadata.category {
        vars.insert("category".to_string(), category.clone());
    }
    vars
}
