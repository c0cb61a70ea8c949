//! uiscenario CLI - data-driven browser scenario runner.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use uiscenario::artifact::FsArtifactStore;
use uiscenario::report::{publish, FsReportWriter};
use uiscenario::webdriver::WebDriverFactory;
use uiscenario::{
    list_environments, load_run_config, preflight, CancelToken, RunConfig,
    RunOrchestrator, RunReport, ScenarioResult, StepStatus, DEFAULT_ENVIRONMENTS_DIR,
};

const EXIT_CONFIG_ERROR: i32 = 2;

/// Run JSON-defined UI scenarios against a WebDriver endpoint.
#[derive(Parser, Debug)]
#[command(name = "uiscenario", version, about)]
struct Cli {
    /// Master configuration file.
    #[arg(
        short = 'c',
        long = "config",
        env = "UISCENARIO_CONFIG",
        default_value = "config/master_config.json"
    )]
    config: PathBuf,

    /// Environment profile id (loads `<id>_environment.json`).
    #[arg(short = 'e', long = "environment", env = "UISCENARIO_ENVIRONMENT")]
    environment: Option<String>,

    /// Directory holding environment profiles.
    #[arg(
        long = "environments-dir",
        env = "UISCENARIO_ENVIRONMENTS_DIR",
        default_value = DEFAULT_ENVIRONMENTS_DIR
    )]
    environments_dir: PathBuf,

    /// Only run scenarios whose name contains this text.
    #[arg(short = 'f', long = "filter")]
    filter: Option<String>,

    /// WebDriver endpoint override.
    #[arg(long = "webdriver-url", env = "WEBDRIVER_URL")]
    webdriver_url: Option<String>,

    /// Force parallel execution.
    #[arg(long = "parallel")]
    parallel: bool,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Validate configuration and scenarios, then exit.
    #[arg(long = "validate-only")]
    validate_only: bool,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn print_scenario_result(result: &ScenarioResult) {
    let status = if result.passed() {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    info!(
        "{} scenario: {} ({} ms)",
        status, result.name, result.duration_ms
    );

    if let Some(error) = &result.error {
        error!("     \x1b[31m{}: {}\x1b[0m", error.kind, error.message);
    }

    for step in &result.steps {
        let marker = match step.status {
            StepStatus::Passed => "\x1b[32m✓\x1b[0m",
            StepStatus::Failed => "\x1b[31m✗\x1b[0m",
            StepStatus::Skipped => "\x1b[33m-\x1b[0m",
        };
        info!(
            "  {}. {} {} ({} ms, {} attempt(s))",
            step.step_id, marker, step.step_name, step.duration_ms, step.attempts
        );
        if let Some(error) = &step.error {
            error!("     \x1b[31m{}: {}\x1b[0m", error.kind, error.message);
        }
    }
}

fn print_summary(report: &RunReport, elapsed_ms: u128) {
    let summary = &report.summary;
    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Steps: {} passed, {} failed, {} skipped\n  Success rate: {:.1}%\n  Duration: {} ms",
        summary.total_scenarios,
        summary.passed_scenarios,
        summary.failed_scenarios,
        summary.passed_steps,
        summary.failed_steps,
        summary.skipped_steps,
        summary.success_rate,
        elapsed_ms
    );
    if report.cancelled {
        warn!("Run was cancelled before all scenarios finished");
    }
}

/// Apply CLI overrides on top of the loaded configuration.
fn apply_overrides(config: &mut RunConfig, cli: &Cli) {
    if let Some(url) = &cli.webdriver_url {
        config.master.framework_config.webdriver_url = url.clone();
    }
    if cli.parallel {
        config.master.framework_config.parallel_execution = true;
    }
    if let Some(filter) = &cli.filter {
        let needle = filter.to_lowercase();
        for entry in &mut config.master.test_scenarios {
            if !entry.name.to_lowercase().contains(&needle) {
                entry.execute = "n".to_string();
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = load_run_config(
        &cli.config,
        cli.environment.as_deref(),
        &cli.environments_dir,
    )?;
    apply_overrides(&mut config, cli);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e:#}");
            if cli.environment.is_some() {
                if let Ok(ids) = list_environments(&cli.environments_dir) {
                    info!("Available environments: {}", ids.join(", "));
                }
            }
            exit(EXIT_CONFIG_ERROR);
        }
    };

    let checks = preflight(&config);
    if !checks.fatal.is_empty() {
        for problem in &checks.fatal {
            error!("\x1b[31m{problem}\x1b[0m");
        }
        error!("Configuration has {} problem(s)", checks.fatal.len());
        exit(EXIT_CONFIG_ERROR);
    }
    if cli.validate_only {
        if !checks.scenarios.is_empty() {
            for problem in &checks.scenarios {
                error!("\x1b[31m{problem}\x1b[0m");
            }
            error!("{} scenario(s) failed validation", checks.scenarios.len());
            exit(EXIT_CONFIG_ERROR);
        }
        info!("Configuration is valid");
        return Ok(());
    }
    for problem in &checks.scenarios {
        warn!("\x1b[33m{problem}\x1b[0m");
    }
    if !checks.scenarios.is_empty() {
        warn!(
            "{} scenario(s) will be reported as failed; running the rest",
            checks.scenarios.len()
        );
    }

    let config = Arc::new(config);
    let drivers = match WebDriverFactory::new(&config) {
        Ok(factory) => factory,
        Err(e) => {
            error!("Failed to set up WebDriver client: {e:#}");
            exit(EXIT_CONFIG_ERROR);
        }
    };

    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let run_id = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let store = FsArtifactStore::new(&config.master.reporting, &run_id);
    let orchestrator =
        RunOrchestrator::new(Arc::clone(&config), Arc::new(drivers), Arc::new(store))
            .with_run_id(run_id)
            .with_cancel(cancel);

    info!(
        "Running scenarios in environment '{}' (run {})",
        config.environment.environment_id,
        orchestrator.run_id()
    );
    let total_start = Instant::now();
    let report = orchestrator.run().await;

    for result in &report.scenarios {
        print_scenario_result(result);
    }

    let reporting = &config.master.reporting;
    publish(&report, &FsReportWriter::new(reporting), reporting);
    print_summary(&report, total_start.elapsed().as_millis());

    if !report.passed() {
        exit(1);
    }

    Ok(())
}
