//! Command-line argument parsing for the iteration scheduler binary.

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Iterative agent orchestration engine", long_about = None)]
#[command(group(ArgGroup::new("existing_workspace").args(["resume", "clean_restart"]).multiple(false)))]
pub struct Cli {
    /// Path to the scheduler configuration YAML file.
    #[arg(long)]
    pub config: PathBuf,

    /// Run mode: `execute` launches the real agent-runner subprocess each
    /// iteration; `demo` exercises the rest of the pipeline against
    /// synthetic trajectories.
    #[arg(long, value_enum, default_value_t = Mode::Execute)]
    pub mode: Mode,

    /// Resume a previous run from its last completed iteration.
    #[arg(long)]
    pub resume: bool,

    /// Discard an existing workspace directory and start from iteration 1.
    #[arg(long)]
    pub clean_restart: bool,

    /// Validate the configuration and exit without running any iterations.
    #[arg(long)]
    pub validate_only: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Demo,
    Execute,
}

impl From<Mode> for crate::scheduler::RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Demo => crate::scheduler::RunMode::Demo,
            Mode::Execute => crate::scheduler::RunMode::Execute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_and_clean_restart_are_mutually_exclusive() {
        let result = Cli::try_parse_from([
            "se-run",
            "--config",
            "scheduler.yaml",
            "--resume",
            "--clean-restart",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_to_execute_mode() {
        let cli = Cli::try_parse_from(["se-run", "--config", "scheduler.yaml"]).unwrap();
        assert_eq!(cli.mode, Mode::Execute);
        assert!(!cli.resume);
        assert!(!cli.clean_restart);
    }

    #[test]
    fn accepts_demo_mode_and_resume() {
        let cli = Cli::try_parse_from([
            "se-run",
            "--config",
            "scheduler.yaml",
            "--mode",
            "demo",
            "--resume",
        ])
        .unwrap();
        assert_eq!(cli.mode, Mode::Demo);
        assert!(cli.resume);
    }
}
