//! Task manifest model and TOML loader
//!
//! A manifest is the immutable declarative description of one benchmark
//! item: the prompt and repair templates to render, the attempt budget, and
//! the expectations the scorer checks against the compile/test outcome.
//! Manifests are produced by the loader and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Declarative description of one benchmark task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskManifest {
    /// Stable task identifier; also names the generated `<id>.al` file.
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Path to the prompt template, relative to the manifest file.
    pub prompt_template: PathBuf,
    /// Path to the repair ("fix") template used from attempt 2 on.
    pub fix_template: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub expected: Expectations,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub metadata: TaskMetadata,
    /// Optional per-task prompt overrides keyed by override name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<std::collections::HashMap<String, String>>,
}

fn default_max_attempts() -> u32 {
    2
}

/// Expected outcome block driving scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expectations {
    /// Whether the artifact must compile.
    pub compile: bool,
    /// Test app name; presence triggers test execution after compile.
    #[serde(default, rename = "testApp", skip_serializing_if = "Option::is_none")]
    pub test_app: Option<String>,
    /// Substrings that must all appear in the generated code.
    #[serde(default, rename = "mustContain", skip_serializing_if = "Option::is_none")]
    pub must_contain: Option<Vec<String>>,
    /// Substrings that must not appear in the generated code.
    #[serde(
        default,
        rename = "mustNotContain",
        skip_serializing_if = "Option::is_none"
    )]
    pub must_not_contain: Option<Vec<String>>,
}

/// Reporting-only metadata; never consulted by the execution core except for
/// the estimated token budget handed to the rate limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Rough prompt+completion token estimate for TPM admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<u64>,
}

/// Manifest loading errors
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid manifest {path}: {reason}")]
    Invalid { path: String, reason: String },
}

impl TaskManifest {
    /// Load and validate a single manifest from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        let manifest: TaskManifest = toml::from_str(&content)?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    /// Discover and load every `*.toml` manifest directly under `dir`,
    /// sorted by task id for a stable run order.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, ManifestError> {
        let mut manifests = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                manifests.push(Self::load_from_file(&path)?);
            }
        }
        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(manifests)
    }

    fn validate(&self, path: &Path) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError::Invalid {
                path: path.display().to_string(),
                reason: "task id must not be empty".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ManifestError::Invalid {
                path: path.display().to_string(),
                reason: "max_attempts must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// Name of the source file the compile queue writes the artifact to.
    pub fn target_file(&self) -> String {
        format!("{}.al", self.id)
    }

    /// Whether the scorer should run tests for this task.
    pub fn has_tests(&self) -> bool {
        self.expected.test_app.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_toml() -> &'static str {
        r#"
id = "cu-basic-greeter"
description = "Write a greeter codeunit"
prompt_template = "templates/greeter.md"
fix_template = "templates/fix.md"
max_attempts = 3

[expected]
compile = true
testApp = "greeter-tests"
mustContain = ["codeunit", "Greet"]
mustNotContain = ["OnRun()"]

[metadata]
difficulty = "easy"
category = "codeunit"
tags = ["basics"]
estimated_tokens = 1800
"#
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest: TaskManifest = toml::from_str(manifest_toml()).unwrap();
        assert_eq!(manifest.id, "cu-basic-greeter");
        assert_eq!(manifest.max_attempts, 3);
        assert!(manifest.expected.compile);
        assert_eq!(manifest.expected.test_app.as_deref(), Some("greeter-tests"));
        assert_eq!(
            manifest.expected.must_contain.as_ref().unwrap().len(),
            2
        );
        assert_eq!(manifest.metadata.estimated_tokens, Some(1800));
        assert!(manifest.has_tests());
    }

    #[test]
    fn test_minimal_manifest_defaults() {
        let toml_str = r#"
id = "t1"
prompt_template = "p.md"
fix_template = "f.md"

[expected]
compile = true
"#;
        let manifest: TaskManifest = toml::from_str(toml_str).unwrap();
        assert_eq!(manifest.max_attempts, 2);
        assert!(manifest.description.is_empty());
        assert!(manifest.expected.test_app.is_none());
        assert!(!manifest.has_tests());
        assert!(manifest.metrics.is_empty());
    }

    #[test]
    fn test_target_file_name() {
        let toml_str = r#"
id = "tab-item-buffer"
prompt_template = "p.md"
fix_template = "f.md"

[expected]
compile = true
"#;
        let manifest: TaskManifest = toml::from_str(toml_str).unwrap();
        assert_eq!(manifest.target_file(), "tab-item-buffer.al");
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let toml_str = r#"
id = "t1"
prompt_template = "p.md"
fix_template = "f.md"
max_attempts = 0

[expected]
compile = true
"#;
        let manifest: TaskManifest = toml::from_str(toml_str).unwrap();
        let err = manifest.validate(Path::new("t1.toml")).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_validation_rejects_empty_id() {
        let toml_str = r#"
id = "  "
prompt_template = "p.md"
fix_template = "f.md"

[expected]
compile = true
"#;
        let manifest: TaskManifest = toml::from_str(toml_str).unwrap();
        assert!(manifest.validate(Path::new("t1.toml")).is_err());
    }

    #[test]
    fn test_manifest_roundtrip() {
        let manifest: TaskManifest = toml::from_str(manifest_toml()).unwrap();
        let json = serde_json::to_string(&manifest).unwrap();
        let back: TaskManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest, back);
    }
}
