//! Mock implementations for testing
//!
//! Provides mock LlmProvider, SandboxProvider, and EventListener
//! implementations plus fixture builders for manifests and execution
//! contexts.

use crate::events::{BenchEvent, EventListener};
use crate::llm::provider::{
    FinishReason, GenerationRequest, LlmError, LlmProvider, LlmResponse, TokenUsage,
};
use crate::manifest::{Expectations, TaskManifest, TaskMetadata};
use crate::sandbox::{
    CompilationResult, CompilerDiagnostic, SandboxError, SandboxProject, SandboxProvider,
    TestCaseResult, TestResult,
};
use crate::types::ExecutionContext;
use crate::variant::ModelVariant;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One scripted generation outcome for the mock provider.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Content(String),
    Error(LlmError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCallKind {
    Generate,
    Fix,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub kind: MockCallKind,
    pub model: String,
    pub previous_errors: Vec<String>,
}

/// Mock LLM provider with a scripted outcome queue.
///
/// Outcomes are consumed front-to-back across both operations; an empty
/// queue yields the default fenced-AL success response.
pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<MockOutcome>>,
    default_content: String,
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            default_content: default_al_response(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            ..Self::new()
        }
    }

    pub async fn push_outcome(&self, outcome: MockOutcome) {
        self.script.lock().await.push_back(outcome);
    }

    pub async fn recorded_calls(&self) -> Vec<MockCall> {
        self.calls.lock().await.clone()
    }

    async fn respond(&self, request: &GenerationRequest) -> Result<LlmResponse, LlmError> {
        let outcome = self.script.lock().await.pop_front();
        match outcome {
            Some(MockOutcome::Error(error)) => Err(error),
            Some(MockOutcome::Content(content)) => Ok(mock_response(&request.model, content)),
            None => Ok(mock_response(&request.model, self.default_content.clone())),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_code(
        &self,
        request: &GenerationRequest,
        _context: &ExecutionContext,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.lock().await.push(MockCall {
            kind: MockCallKind::Generate,
            model: request.model.clone(),
            previous_errors: Vec::new(),
        });
        self.respond(request).await
    }

    async fn generate_fix(
        &self,
        _previous_code: &str,
        errors: &[String],
        request: &GenerationRequest,
        _context: &ExecutionContext,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.lock().await.push(MockCall {
            kind: MockCallKind::Fix,
            model: request.model.clone(),
            previous_errors: errors.to_vec(),
        });
        self.respond(request).await
    }
}

fn mock_response(model: &str, content: String) -> LlmResponse {
    LlmResponse {
        content,
        model: model.to_string(),
        usage: TokenUsage {
            prompt_tokens: 120,
            completion_tokens: 240,
            total_tokens: 360,
            estimated_cost: Some(0.0031),
        },
        duration_ms: 5,
        finish_reason: FinishReason::Stop,
    }
}

pub fn default_al_response() -> String {
    "Here you go:\n```al\ncodeunit 50100 \"Mock Greeter\"\n{\n    procedure Greet(): Text\n    begin\n        exit('Hello');\n    end;\n}\n```\n"
        .to_string()
}

/// One scripted compile outcome for the mock sandbox.
#[derive(Debug, Clone)]
pub enum CompileOutcome {
    Success,
    /// Normal compile failure with these diagnostic messages.
    CompileError(Vec<String>),
    /// Sandbox-level failure (rejects the queue entry).
    Fail(String),
}

/// Mock sandbox with a scripted compile queue and configurable latency.
pub struct MockSandbox {
    script: Mutex<VecDeque<CompileOutcome>>,
    default_outcome: CompileOutcome,
    test_success: bool,
    delay: Duration,
    pub compiled: Arc<Mutex<Vec<String>>>,
    pub tested: Arc<Mutex<Vec<String>>>,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_outcome: CompileOutcome::Success,
            test_success: true,
            delay: Duration::ZERO,
            compiled: Arc::new(Mutex::new(Vec::new())),
            tested: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_compile() -> Self {
        let mut sandbox = Self::new();
        sandbox.default_outcome =
            CompileOutcome::CompileError(vec!["AL0118: undefined symbol".to_string()]);
        sandbox
    }

    pub fn with_test_failure() -> Self {
        let mut sandbox = Self::new();
        sandbox.test_success = false;
        sandbox
    }

    pub fn with_delay(delay: Duration) -> Self {
        let mut sandbox = Self::new();
        sandbox.delay = delay;
        sandbox
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = CompileOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            ..Self::new()
        }
    }

    pub async fn compiled_projects(&self) -> Vec<String> {
        self.compiled.lock().await.clone()
    }

    async fn next_outcome(&self) -> CompileOutcome {
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxProvider for MockSandbox {
    fn name(&self) -> &str {
        "mock"
    }

    async fn compile_project(
        &self,
        _sandbox_name: &str,
        project: &SandboxProject,
    ) -> Result<CompilationResult, SandboxError> {
        self.compiled.lock().await.push(project.id.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_outcome().await {
            CompileOutcome::Fail(message) => Err(SandboxError::Service(message)),
            CompileOutcome::Success => Ok(CompilationResult {
                success: true,
                errors: vec![],
                warnings: vec![],
                output: "Compilation succeeded".to_string(),
                duration_ms: self.delay.as_millis() as u64,
                artifact_path: None,
            }),
            CompileOutcome::CompileError(messages) => Ok(CompilationResult {
                success: false,
                errors: messages
                    .into_iter()
                    .map(|message| CompilerDiagnostic {
                        code: "AL0000".to_string(),
                        message,
                        file: project
                            .code_files
                            .first()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                        line: 1,
                        column: 1,
                        severity: "error".to_string(),
                    })
                    .collect(),
                warnings: vec![],
                output: "Compilation failed".to_string(),
                duration_ms: self.delay.as_millis() as u64,
                artifact_path: None,
            }),
        }
    }

    async fn run_tests(
        &self,
        _sandbox_name: &str,
        project: &SandboxProject,
    ) -> Result<TestResult, SandboxError> {
        self.tested.lock().await.push(project.id.clone());
        let passed = if self.test_success { 3 } else { 2 };
        Ok(TestResult {
            success: self.test_success,
            total_tests: 3,
            passed_tests: passed,
            failed_tests: 3 - passed,
            duration_ms: 8,
            results: (0..3)
                .map(|i| TestCaseResult {
                    name: format!("Test{i}"),
                    passed: self.test_success || i < 2,
                    duration_ms: 2,
                    error: (!self.test_success && i == 2)
                        .then(|| "Assert.AreEqual failed".to_string()),
                })
                .collect(),
            output: String::new(),
        })
    }
}

/// Listener that records every event it sees.
#[derive(Default)]
pub struct RecordingListener {
    events: std::sync::Mutex<Vec<BenchEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BenchEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count_matching(&self, predicate: impl Fn(&BenchEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &BenchEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Compile-only manifest fixture.
pub fn test_manifest(id: &str) -> TaskManifest {
    TaskManifest {
        id: id.to_string(),
        description: format!("Test task {id}"),
        prompt_template: PathBuf::from("templates/prompt.md"),
        fix_template: PathBuf::from("templates/fix.md"),
        max_attempts: 2,
        expected: Expectations {
            compile: true,
            test_app: None,
            must_contain: None,
            must_not_contain: None,
        },
        metrics: vec![],
        metadata: TaskMetadata {
            difficulty: Some("easy".to_string()),
            category: Some("codeunit".to_string()),
            tags: vec![],
            estimated_tokens: Some(1200),
        },
        prompts: None,
    }
}

/// Manifest fixture that also declares a test app.
pub fn test_manifest_with_tests(id: &str) -> TaskManifest {
    let mut manifest = test_manifest(id);
    manifest.expected.test_app = Some(format!("{id}-tests"));
    manifest
}

/// Execution context fixture for a manifest/variant pair.
pub fn test_context(manifest: Arc<TaskManifest>, variant: &ModelVariant) -> ExecutionContext {
    let target_file = manifest.target_file();
    ExecutionContext {
        manifest,
        task_type: "codeunit".to_string(),
        instructions: "Write the requested AL object.".to_string(),
        target_file,
        prompt_template: PathBuf::from("templates/prompt.md"),
        fix_template: PathBuf::from("templates/fix.md"),
        temperature: variant.config.temperature.unwrap_or(0.2),
        max_tokens: variant.config.max_tokens.unwrap_or(4000),
        timeout: Duration::from_secs(120),
        system_prompt: None,
        thinking_budget: None,
        sandbox_provider: "mock".to_string(),
        sandbox_name: "bc-sandbox-1".to_string(),
        output_dir: std::env::temp_dir(),
        debug: false,
        prompt_overrides: None,
    }
}

/// Default mock variant fixture.
pub fn test_variant() -> ModelVariant {
    ModelVariant::new("mock", "mock-model")
}
