mod cli;
mod compressor;
mod config;
mod data;
mod llm;
mod operators;
mod pool;
mod scheduler;
mod utils;
mod workspace;

use clap::Parser;
use cli::Cli;
use config::Config;
use operators::OperatorRegistry;
use std::process::ExitCode;
use tracing::{error, info, warn};
use workspace::{resolve_workspace, ResumeDecision};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let project_root = workspace::project_root_for(&cli.config);
    let config = Config::load(&cli.config)?;

    let registry = OperatorRegistry::default();
    if let Err(e) = config.validate(&project_root, &registry.names()) {
        eprintln!("configuration invalid: {e}");
        return Ok(EXIT_FAILURE);
    }

    if cli.validate_only {
        println!("configuration is valid");
        return Ok(EXIT_SUCCESS);
    }

    let (workspace, decision) = resolve_workspace(
        &project_root,
        &config.output_dir,
        cli.resume,
        cli.clean_restart,
    )?;

    let _log_guard = utils::logging::init(&workspace.log_path())?;
    info!(workspace = %workspace.root.display(), ?decision, "workspace resolved");

    let total_iterations = config.strategy.len() as u32;
    let start_iteration = match decision {
        ResumeDecision::Resumed => {
            let last = workspace.last_completed_iteration(total_iterations);
            info!(last_completed_iteration = last, "resuming run");
            let partial_dir = workspace.iteration_dir(last + 1);
            if partial_dir.exists() {
                info!(dir = %partial_dir.display(), "removing partial iteration directory from interrupted run");
                std::fs::remove_dir_all(&partial_dir)?;
            }
            last + 1
        }
        ResumeDecision::Fresh | ResumeDecision::CleanRestarted => 1,
    };

    let outcome = scheduler::run(
        &config,
        &project_root,
        &workspace,
        start_iteration,
        cli.mode.into(),
        &registry,
    )
    .await?;

    if outcome.succeeded() {
        info!(
            completed = outcome.completed_iterations,
            total = outcome.total_iterations,
            "run completed successfully"
        );
        Ok(EXIT_SUCCESS)
    } else {
        warn!(
            failed_at = ?outcome.failed_at_iteration,
            completed = outcome.completed_iterations,
            "run stopped before completing all iterations"
        );
        error!("iteration failed; see log for details");
        Ok(EXIT_FAILURE)
    }
}
