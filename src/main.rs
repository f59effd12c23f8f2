//! albench - Main Entry Point
//!
//! Assembles the harness from configuration (providers, rate limits,
//! sandboxes, compile queues) and drives a benchmark run over the task
//! suite and the model variants named on the command line.

use albench::config::HarnessConfig;
use albench::events::{BenchEvent, EventListener};
use albench::llm::provider::{LlmProvider, ProviderRegistry};
use albench::llm::providers::{AnthropicProvider, OpenAiConfig, OpenAiProvider};
use albench::manifest::TaskManifest;
use albench::observability::init_default_logging;
use albench::orchestrate::{Orchestrator, OrchestratorConfig};
use albench::pool::{LlmWorkPool, WorkPoolConfig};
use albench::queue::CompileQueuePool;
use albench::ratelimit::RateLimiter;
use albench::sandbox::{HttpSandbox, SandboxProvider};
use albench::store::ResultStore;
use albench::testing::mocks::{MockProvider, MockSandbox};
use albench::variant::ModelVariant;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

/// AL code-generation benchmark harness
#[derive(Parser)]
#[command(name = "albench")]
#[command(about = "Benchmark LLM code generation against compile-and-test sandboxes")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the benchmark suite
    Run {
        /// Directory of task manifests (*.toml)
        #[arg(long, default_value = "tasks")]
        tasks: PathBuf,

        /// Model variants to benchmark (provider/model[@k=v;...])
        #[arg(long = "model", required = true)]
        models: Vec<String>,

        /// Run label naming the results directory
        #[arg(long)]
        label: Option<String>,

        /// Override configured task concurrency
        #[arg(long)]
        parallel_tasks: Option<usize>,
    },
    /// List the tasks a manifest directory defines
    ListTasks {
        #[arg(long, default_value = "tasks")]
        tasks: PathBuf,
    },
    /// Validate and show the effective configuration
    Config {
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            tasks,
            models,
            label,
            parallel_tasks,
        } => run_benchmark(config, tasks, models, label, parallel_tasks).await,
        Commands::ListTasks { tasks } => list_tasks(&tasks),
        Commands::Config { show } => {
            if show {
                match toml::to_string_pretty(&config) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => error!("Failed to render configuration: {e}"),
                }
            } else {
                info!("Configuration is valid");
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(HarnessConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["albench.toml", "config/albench.toml"];
            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(HarnessConfig::load_from_file(&path)?);
                }
            }
            error!("No configuration file found. Provide one with -c/--config or create albench.toml");
            process::exit(1);
        }
    }
}

fn list_tasks(tasks_dir: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let manifests = TaskManifest::load_dir(tasks_dir)?;
    for manifest in &manifests {
        println!(
            "{:<28} attempts={} tests={} {}",
            manifest.id,
            manifest.max_attempts,
            manifest.has_tests(),
            manifest.description
        );
    }
    info!(count = manifests.len(), "tasks discovered");
    Ok(())
}

async fn run_benchmark(
    config: HarnessConfig,
    tasks_dir: PathBuf,
    model_specs: Vec<String>,
    label: Option<String>,
    parallel_tasks: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tasks: Vec<Arc<TaskManifest>> = TaskManifest::load_dir(&tasks_dir)?
        .into_iter()
        .map(Arc::new)
        .collect();
    if tasks.is_empty() {
        return Err(format!("no task manifests found under {}", tasks_dir.display()).into());
    }

    let variants: Vec<ModelVariant> = model_specs
        .iter()
        .map(|spec| ModelVariant::parse(spec))
        .collect::<Result<_, _>>()?;

    let providers = Arc::new(build_provider_registry(&config));
    let limiter = Arc::new(RateLimiter::with_limits(config.provider_limits()));
    let pool = Arc::new(LlmWorkPool::new(
        providers,
        limiter,
        WorkPoolConfig {
            max_concurrent: config.run.max_concurrent_llm,
            ..WorkPoolConfig::default()
        },
    ));

    let sandbox = build_sandbox(&config)?;
    let queues = Arc::new(CompileQueuePool::new(
        sandbox,
        &config.sandbox.names,
        config.queue_config(),
    )?);

    let mut orchestrator_config = OrchestratorConfig::from_harness(&config);
    orchestrator_config.templates_root = tasks_dir.clone();
    if let Some(parallel_tasks) = parallel_tasks {
        orchestrator_config.task_concurrency = parallel_tasks.max(1);
    }

    let orchestrator = Orchestrator::new(pool, queues, orchestrator_config);
    orchestrator.subscribe(Arc::new(ConsoleListener));

    let outcome = orchestrator.run(&tasks, &variants).await?;

    let run_label = label.unwrap_or_else(|| config.run.label.clone());
    let store = ResultStore::new(&config.run.results_dir);
    let results_path = store.save_results(&run_label, &outcome.results)?;
    let summary_path = store.save_summary(&run_label, &outcome.summary)?;
    info!(
        results = %results_path.display(),
        summary = %summary_path.display(),
        "run artifacts written"
    );

    println!(
        "\n{} tasks, pass rate {:.1}%, average score {:.1}",
        outcome.summary.summary.task_count,
        outcome.summary.summary.pass_rate * 100.0,
        outcome.summary.summary.average_score
    );
    for (variant_id, model) in &outcome.summary.models {
        println!(
            "  {:<44} pass {:.1}%  score {:.1}  attempts {:.2}  ${:.4}",
            variant_id,
            model.pass_rate * 100.0,
            model.avg_score,
            model.avg_attempts,
            model.cost
        );
    }
    Ok(())
}

fn build_provider_registry(config: &HarnessConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(MockProvider::new()));

    for provider_name in config.credentials.keys() {
        let api_key = match config.api_key(provider_name) {
            Ok(key) => key,
            Err(e) => {
                warn!(provider = %provider_name, error = %e, "skipping provider; no API key");
                continue;
            }
        };
        let provider: Option<Arc<dyn LlmProvider>> = match provider_name.as_str() {
            "anthropic" => AnthropicProvider::with_api_key(api_key)
                .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                .ok(),
            "openai" => OpenAiProvider::with_api_key(api_key)
                .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                .ok(),
            "openrouter" => OpenAiProvider::new(OpenAiConfig {
                api_key,
                base_url: "https://openrouter.ai/api/v1".to_string(),
                provider_name: "openrouter".to_string(),
                ..OpenAiConfig::default()
            })
            .map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
            .ok(),
            other => {
                warn!(provider = %other, "no adapter implementation for provider");
                None
            }
        };
        if let Some(provider) = provider {
            info!(provider = %provider_name, "provider registered");
            registry.register(provider);
        }
    }
    registry
}

fn build_sandbox(
    config: &HarnessConfig,
) -> Result<Arc<dyn SandboxProvider>, Box<dyn std::error::Error>> {
    match config.sandbox.provider.as_str() {
        "mock" => Ok(Arc::new(MockSandbox::new())),
        "http" => {
            let base_url = config
                .sandbox
                .base_url
                .clone()
                .ok_or("sandbox.base_url is required for the http provider")?;
            Ok(Arc::new(HttpSandbox::new(
                base_url,
                std::time::Duration::from_millis(config.sandbox.timeout_ms),
            )?))
        }
        other => Err(format!("unknown sandbox provider: {other}").into()),
    }
}

/// Narrates run progress to the log.
struct ConsoleListener;

impl EventListener for ConsoleListener {
    fn on_event(&self, event: &BenchEvent) {
        match event {
            BenchEvent::TaskStarted {
                task_id,
                variant_count,
                ..
            } => info!(task = %task_id, variants = variant_count, "task started"),
            BenchEvent::TaskCompleted {
                task_id,
                passed,
                failed,
                duration_ms,
            } => info!(task = %task_id, passed, failed, duration_ms, "task completed"),
            BenchEvent::Progress(progress) => info!(
                completed = progress.completed_tasks,
                total = progress.total_tasks,
                queue = progress.compile_queue_length,
                eta_ms = ?progress.estimated_remaining_ms,
                "progress"
            ),
            BenchEvent::Error {
                task_id,
                variant_id,
                message,
            } => warn!(task = ?task_id, variant = ?variant_id, "{message}"),
            _ => {}
        }
    }
}
