//! Sandbox provider contract
//!
//! A sandbox is the external compile-and-test environment, one logical
//! machine per compile queue. Providers are resolved by name from a
//! registry; the shipped `HttpSandbox` talks to a compile service over
//! HTTP, and tests use the mock in `crate::testing`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Project handed to a sandbox: a staged directory with a manifest and the
/// generated source files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxProject {
    /// Auto-generated project id.
    pub id: String,
    pub root: PathBuf,
    pub manifest_path: PathBuf,
    pub code_files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_app: Option<String>,
    pub platform: String,
    pub runtime: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerDiagnostic {
    pub code: String,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationResult {
    pub success: bool,
    pub errors: Vec<CompilerDiagnostic>,
    pub warnings: Vec<CompilerDiagnostic>,
    pub output: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
}

impl CompilationResult {
    /// Short human summary of the first few errors, used in failure reasons.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .take(3)
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub success: bool,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub duration_ms: u64,
    pub results: Vec<TestCaseResult>,
    pub output: String,
}

/// Sandbox errors
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    #[error("Sandbox not found: {0}")]
    NotFound(String),
    #[error("Compile service error: {0}")]
    Service(String),
    #[error("Network error: {0}")]
    Network(String),
}

/// External compile-and-test environment.
///
/// Both operations may fail with a `SandboxError`; a compile *failure*
/// (success=false with diagnostics) is a normal result, not an error.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn compile_project(
        &self,
        sandbox_name: &str,
        project: &SandboxProject,
    ) -> Result<CompilationResult, SandboxError>;

    async fn run_tests(
        &self,
        sandbox_name: &str,
        project: &SandboxProject,
    ) -> Result<TestResult, SandboxError>;
}

/// Name-keyed sandbox provider registry.
#[derive(Default)]
pub struct SandboxRegistry {
    providers: HashMap<String, Arc<dyn SandboxProvider>>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn SandboxProvider>) {
        self.providers
            .insert(provider.name().to_string(), provider);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn SandboxProvider>, SandboxError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(name.to_string()))
    }
}

/// HTTP-backed sandbox provider.
///
/// Posts the staged project's sources to a compile service and maps its
/// JSON responses onto the result types. The service owns container
/// lifecycle; this client only names the sandbox it wants.
pub struct HttpSandbox {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompileRequest<'a> {
    sandbox: &'a str,
    project_id: &'a str,
    platform: &'a str,
    runtime: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_app: Option<&'a str>,
    files: Vec<CompileFile>,
}

#[derive(Serialize)]
struct CompileFile {
    name: String,
    content: String,
}

impl HttpSandbox {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, SandboxError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SandboxError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn read_files(project: &SandboxProject) -> Result<Vec<CompileFile>, SandboxError> {
        let mut files = Vec::with_capacity(project.code_files.len() + 1);
        for path in std::iter::once(&project.manifest_path).chain(project.code_files.iter()) {
            let content = std::fs::read_to_string(path)
                .map_err(|e| SandboxError::Service(format!("read {}: {e}", path.display())))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push(CompileFile { name, content });
        }
        Ok(files)
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        sandbox_name: &str,
        project: &SandboxProject,
    ) -> Result<T, SandboxError> {
        let request = CompileRequest {
            sandbox: sandbox_name,
            project_id: &project.id,
            platform: &project.platform,
            runtime: &project.runtime,
            test_app: project.test_app.as_deref(),
            files: Self::read_files(project)?,
        };

        let response = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| SandboxError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::Service(format!(
                "compile service returned {status}: {body}"
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SandboxError::Service(format!("malformed service response: {e}")))
    }
}

#[async_trait]
impl SandboxProvider for HttpSandbox {
    fn name(&self) -> &str {
        "http"
    }

    async fn compile_project(
        &self,
        sandbox_name: &str,
        project: &SandboxProject,
    ) -> Result<CompilationResult, SandboxError> {
        self.post("compile", sandbox_name, project).await
    }

    async fn run_tests(
        &self,
        sandbox_name: &str,
        project: &SandboxProject,
    ) -> Result<TestResult, SandboxError> {
        self.post("test", sandbox_name, project).await
    }
}
