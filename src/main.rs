use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hyphae::agent::templates::TemplateSet;
use hyphae::agent::{AgentRunner, CliAgentRunner};
use hyphae::artifacts::{ArtifactStore, EXECUTION_LOG_FILE};
use hyphae::config::AppConfig;
use hyphae::environment::{self, Console, EnvMarkers, ExecutionEnvironment};
use hyphae::error::AppError;
use hyphae::exit_codes;
use hyphae::platform::github::{resolve_token, GitHubPlatform};
use hyphae::platform::retry::RetryPolicy;
use hyphae::shutdown;
use hyphae::workflow::{Orchestrator, PipelineDeps};
use hyphae::workspace::Workspace;

#[derive(Parser)]
#[command(name = "hyphae", version, about = "Turns GitHub issues into pull requests")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Git checkout to work in
    #[arg(short, long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Console log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline for one issue
    Run {
        /// Issue number
        issue: u64,
    },
    /// Verify configuration, credentials, agent tool and checkout
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Console logs go to stderr; stdout carries CI workflow commands.
fn init_tracing(format: LogFormat, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (text, json) = match format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, EXECUTION_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .with(file)
        .init();

    guard
}

fn repository(config: &AppConfig, env: &dyn ExecutionEnvironment) -> Result<String, AppError> {
    config
        .github
        .repository
        .clone()
        .filter(|r| !r.trim().is_empty())
        .or_else(|| env.repository())
        .ok_or_else(|| {
            AppError::Config(
                "Repository unknown: set github.repository (HYPHAE_GITHUB__REPOSITORY)".to_string(),
            )
        })
}

async fn run(cli: &Cli, issue: u64) -> i32 {
    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hyphae: {e}");
            return e.exit_code();
        }
    };

    let store = ArtifactStore::new(config.artifacts_root(&cli.workdir));
    let run_id = match store.allocate_run_id().await {
        Ok(run_id) => run_id,
        Err(e) => {
            eprintln!("hyphae: {e}");
            return e.exit_code();
        }
    };

    let _guard = init_tracing(cli.log_format, Some(&store.run_dir(&run_id)));
    tracing::info!(run_id = %run_id, issue, "Starting Hyphae");

    let markers = EnvMarkers::from_process();
    let env = environment::detect(&markers, &cli.workdir, Console::Stdout);
    let platform_token = std::env::var("GITHUB_TOKEN").ok();
    let budget = config.pipeline.max_runtime_secs.map(Duration::from_secs);

    let orchestrator = match build(config, &run_id, &cli.workdir, platform_token, env) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "Failed to set up run");
            return e.exit_code();
        }
    };

    let report = orchestrator
        .run(issue, shutdown::cancellation(budget))
        .await;
    report.exit_code
}

fn build(
    config: AppConfig,
    run_id: &str,
    workdir: &Path,
    platform_token: Option<String>,
    env: Arc<dyn ExecutionEnvironment>,
) -> Result<Orchestrator, AppError> {
    let repo = repository(&config, env.as_ref())?;
    let token = resolve_token(platform_token.as_deref(), config.github.token.as_deref())?;
    let platform = GitHubPlatform::new(
        &token,
        &repo,
        config.github.api_url.as_deref(),
        RetryPolicy::from_config(&config.retry),
    )?;
    let agent = CliAgentRunner::from_config(&config.agent);

    Orchestrator::new(
        config,
        run_id,
        workdir,
        token,
        PipelineDeps {
            platform: Arc::new(platform),
            agent: Arc::new(agent),
            env,
        },
    )
}

async fn check(cli: &Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    println!("config: ok");

    let env = environment::detect(&EnvMarkers::from_process(), &cli.workdir, Console::Stdout);
    println!("environment: {}", env.kind());

    let repo = repository(&config, env.as_ref())?;
    println!("repository: {repo}");

    let platform_token = std::env::var("GITHUB_TOKEN").ok();
    resolve_token(platform_token.as_deref(), config.github.token.as_deref())?;
    println!("github token: ok");

    CliAgentRunner::from_config(&config.agent)
        .ensure_available()
        .await?;
    println!("agent tool: {}", config.agent.command);

    TemplateSet::load(config.agent.templates_dir.as_deref()).context("loading templates")?;
    println!("templates: ok");

    let workspace = Workspace::acquire(&cli.workdir)?;
    println!("checkout: {}", workspace.path().display());
    if let Err(e) = workspace.ensure_clean().await {
        println!("checkout warning: {e}");
    }

    Ok(())
}

async fn real_main() -> i32 {
    let cli = Cli::parse();

    match &cli.command {
        Command::Run { issue } => run(&cli, *issue).await,
        Command::Check => {
            let _guard = init_tracing(cli.log_format, None);
            match check(&cli).await {
                Ok(()) => exit_codes::OK,
                Err(e) => {
                    eprintln!("hyphae check failed: {e:#}");
                    e.downcast_ref::<AppError>()
                        .map(AppError::exit_code)
                        .unwrap_or(exit_codes::INTERNAL)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let code = real_main().await;
    std::process::exit(code);
}
