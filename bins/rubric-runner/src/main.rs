mod stage;
mod suite;

use anyhow::Result;
use clap::Parser;
use rubric_common::report;
use rubric_harness::{GraderConfig, GraderPaths, ScriptEngine, TestContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rubric-runner")]
#[command(about = "Rubric runner - stage a submission and execute the grading suite", long_about = None)]
struct Cli {
    /// Autograder base directory (defaults to $RUBRIC_BASE, then /autograder)
    #[arg(short, long)]
    base: Option<String>,

    /// Results file path (defaults to <base>/results/results.json)
    #[arg(short, long)]
    output: Option<String>,

    /// Stage submitted files without running the suite
    #[arg(long, default_value = "false")]
    setup_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Rubric runner booting...");

    let cli = Cli::parse();

    let paths = match &cli.base {
        Some(base) => GraderPaths::new(base),
        None => GraderPaths::from_env(),
    };
    info!("Autograder base: {}", paths.base().display());

    let config = GraderConfig::load_default(&paths).map_err(|e| {
        error!("Failed to load grader configuration: {}", e);
        error!(
            "Make sure {} exists",
            paths.source_dir().join("config.json").display()
        );
        e
    })?;

    stage::setup_autograder(&paths, &config)?;

    if cli.setup_only {
        info!("Setup complete, skipping test run");
        return Ok(());
    }

    let engine = ScriptEngine::new(paths.clone(), config.interpreter.clone());
    let ctx = Arc::new(TestContext::new(engine, config));
    let suite = suite::assignment_suite();

    info!(suite = %suite.name(), tests = suite.len(), "Running grading suite");
    let report_data = suite.run(&ctx).await;

    info!(
        score = report_data.score,
        max_score = report_data.max_score,
        execution_ms = report_data.execution_time_ms,
        "Grading run completed"
    );

    let outfile = cli
        .output
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.results_dir().join("results.json"));
    report::write_report(&report_data, &outfile)?;
    info!("Results written to {}", outfile.display());

    let failures = report_data.failure_count();
    if failures > 0 {
        std::process::exit(failures.min(100) as i32);
    }
    Ok(())
}
