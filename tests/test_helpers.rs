//! Test helpers and utilities for integration tests
#![allow(dead_code)]

use albench::llm::provider::ProviderRegistry;
use albench::manifest::{Expectations, TaskManifest, TaskMetadata};
use albench::orchestrate::{Orchestrator, OrchestratorConfig};
use albench::pool::{LlmWorkPool, WorkPoolConfig};
use albench::queue::{CompileQueuePool, QueueConfig};
use albench::ratelimit::RateLimiter;
use albench::sandbox::SandboxProvider;
use albench::testing::mocks::{MockProvider, MockSandbox};
use std::path::PathBuf;
use std::sync::Arc;

/// Fully assembled harness over mocks, plus handles to inspect them.
pub struct HarnessFixture {
    pub orchestrator: Orchestrator,
    pub provider: Arc<MockProvider>,
    pub sandbox: Arc<MockSandbox>,
    template_dir: tempfile::TempDir,
}

pub fn fixture(provider: MockProvider, sandbox: MockSandbox) -> HarnessFixture {
    fixture_with(provider, sandbox, OrchestratorConfig::default())
}

pub fn fixture_with(
    provider: MockProvider,
    sandbox: MockSandbox,
    mut config: OrchestratorConfig,
) -> HarnessFixture {
    let template_dir = tempfile::tempdir().expect("template dir");
    std::fs::write(
        template_dir.path().join("prompt.md"),
        "Write {{task_id}}: {{description}}. Put the object in {{target_file}}.",
    )
    .expect("prompt template");
    std::fs::write(
        template_dir.path().join("fix.md"),
        "Fix the previous solution for {{task_id}}.",
    )
    .expect("fix template");

    let provider = Arc::new(provider);
    let sandbox = Arc::new(sandbox);

    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());

    let limiter = Arc::new(RateLimiter::new());
    let pool = Arc::new(LlmWorkPool::new(
        Arc::new(registry),
        limiter,
        WorkPoolConfig {
            max_concurrent: 8,
            ..WorkPoolConfig::default()
        },
    ));

    let queues = Arc::new(
        CompileQueuePool::new(
            sandbox.clone() as Arc<dyn SandboxProvider>,
            &["bc-1".to_string()],
            QueueConfig::default(),
        )
        .expect("queue pool"),
    );

    config.templates_root = template_dir.path().to_path_buf();
    let orchestrator = Orchestrator::new(pool, queues, config);

    HarnessFixture {
        orchestrator,
        provider,
        sandbox,
        template_dir,
    }
}

/// Compile-only manifest using the fixture's template files.
pub fn manifest(id: &str, max_attempts: u32) -> Arc<TaskManifest> {
    Arc::new(TaskManifest {
        id: id.to_string(),
        description: format!("integration task {id}"),
        prompt_template: PathBuf::from("prompt.md"),
        fix_template: PathBuf::from("fix.md"),
        max_attempts,
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
            estimated_tokens: Some(1500),
        },
        prompts: None,
    })
}

/// Manifest that additionally declares a test app.
pub fn manifest_with_tests(id: &str, max_attempts: u32) -> Arc<TaskManifest> {
    let mut m = (*manifest(id, max_attempts)).clone();
    m.expected.test_app = Some(format!("{id}-tests"));
    Arc::new(m)
}
