//! lsvrt - Main Entry Point
//!
//! Compares Storybook screenshots of the current branch against a target
//! branch and produces a visual regression report.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::debug;

use lsvrt_core::{DiffBackendKind, Pipeline, RunConfig};

mod output;

use output::OutputFormat;

/// Storybook visual regression between two git branches
#[derive(Parser, Debug)]
#[command(name = "lsvrt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Branch to compare against the current one
    target_branch: String,

    /// Diff backend: reg-cli or reg-suit (overrides LSVRT_DIFF_BACKEND)
    #[arg(long)]
    backend: Option<DiffBackendKind>,

    /// Continue with uncommitted changes instead of aborting
    #[arg(long)]
    allow_dirty: bool,

    /// Do not open the report when the run finishes
    #[arg(long)]
    no_open: bool,

    /// Repository to run in
    #[arg(short = 'C', long, default_value = ".")]
    workdir: PathBuf,

    /// Summary output format
    #[arg(long, default_value = "table")]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Environment-derived config with command-line overrides applied
    fn run_config(&self, workdir: PathBuf) -> RunConfig {
        let mut config = RunConfig::from_env(workdir);
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if self.allow_dirty {
            config.allow_dirty = true;
        }
        if self.no_open {
            config.open_report = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let workdir = std::fs::canonicalize(&cli.workdir)
        .with_context(|| format!("Cannot use working directory {}", cli.workdir.display()))?;
    let config = cli.run_config(workdir);
    debug!("Run configuration: {:?}", config);

    let pipeline = Pipeline::new(config)?;
    match pipeline.run(&cli.target_branch).await {
        Ok(outcome) => {
            output::print_outcome(&outcome, cli.format)?;
            output::print_success("Visual regression run finished");
            Ok(())
        }
        Err(e) => {
            if e.is_timeout() {
                output::print_warning(
                    "Check LSVRT_STORYBOOK_COMMAND and LSVRT_PORT, or raise LSVRT_READY_TIMEOUT_MS",
                );
            }
            Err(e.into())
        }
    }
}
