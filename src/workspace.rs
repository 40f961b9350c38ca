//! Workspace directory layout and lifecycle: where a run's artifacts live,
//! how `{timestamp}` templates resolve, and how `--resume`/`--clean-restart`
//! decide what to do with a directory that already exists.

use crate::config::resolve_path;
use chrono::Local;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";
const PREDS_FILENAME: &str = "preds.json";
const EXIT_STATUSES_FILENAME: &str = "run_batch_exit_statuses.yaml";

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("workspace directory already exists: {0} (pass --resume or --clean-restart)")]
    AmbiguousExisting(PathBuf),
    #[error("failed to prepare workspace directory {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// The workspace directory did not exist; it was created.
    Fresh,
    /// `--resume` was passed against an existing directory; iteration
    /// progress is recovered from completion markers.
    Resumed,
    /// `--clean-restart` was passed; the existing directory was removed and
    /// recreated empty.
    CleanRestarted,
}

/// Resolves the project root a config's relative paths are anchored to: the
/// directory two levels above the config file itself.
pub fn project_root_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn now_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn interpolate_timestamp(template: &str, timestamp: &str) -> String {
    template.replace(TIMESTAMP_PLACEHOLDER, timestamp)
}

/// A resolved workspace directory and the paths of its well-known contents.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    pub fn iteration_dir(&self, iteration: u32) -> PathBuf {
        self.root.join(format!("iteration_{iteration}"))
    }

    pub fn pool_path(&self) -> PathBuf {
        self.root.join("traj.pool")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("se_framework.log")
    }

    fn preds_path(&self, iteration: u32) -> PathBuf {
        self.iteration_dir(iteration).join(PREDS_FILENAME)
    }

    fn exit_statuses_path(&self, iteration: u32) -> PathBuf {
        self.iteration_dir(iteration).join(EXIT_STATUSES_FILENAME)
    }

    /// An iteration is complete once its agent-runner subprocess has left
    /// either completion marker behind.
    pub fn iteration_is_complete(&self, iteration: u32) -> bool {
        self.preds_path(iteration).exists() || self.exit_statuses_path(iteration).exists()
    }

    /// The highest-numbered iteration, counting from 1, for which every
    /// preceding iteration (including it) is complete. Iteration gaps are
    /// not tolerated: a missing marker stops the scan even if later
    /// iterations happen to have markers from a previous aborted run.
    pub fn last_completed_iteration(&self, total_iterations: u32) -> u32 {
        let mut last = 0;
        for iteration in 1..=total_iterations {
            if self.iteration_is_complete(iteration) {
                last = iteration;
            } else {
                break;
            }
        }
        last
    }

    pub fn ensure_iteration_dir(&self, iteration: u32) -> Result<PathBuf, WorkspaceError> {
        let dir = self.iteration_dir(iteration);
        std::fs::create_dir_all(&dir).map_err(|e| WorkspaceError::Io(dir.clone(), e))?;
        Ok(dir)
    }
}

/// Resolves `output_dir` against `project_root`, interpolating `{timestamp}`
/// when present, and decides the workspace's lifecycle:
///
/// - A templated `output_dir` (containing `{timestamp}`) always names a new,
///   not-yet-existing directory — it is created fresh regardless of the
///   resume/clean-restart flags.
/// - A literal `output_dir` naming a directory that does not yet exist is
///   also created fresh.
/// - A literal `output_dir` naming an existing directory requires exactly
///   one of `--resume` or `--clean-restart`; passing neither is an error,
///   since continuing or discarding prior progress must be explicit.
pub fn resolve_workspace(
    project_root: &Path,
    output_dir_template: &str,
    resume: bool,
    clean_restart: bool,
) -> Result<(Workspace, ResumeDecision), WorkspaceError> {
    let interpolated = if output_dir_template.contains(TIMESTAMP_PLACEHOLDER) {
        interpolate_timestamp(output_dir_template, &now_timestamp())
    } else {
        output_dir_template.to_string()
    };
    let root = resolve_path(project_root, &interpolated);

    if !root.exists() {
        std::fs::create_dir_all(&root).map_err(|e| WorkspaceError::Io(root.clone(), e))?;
        return Ok((Workspace { root }, ResumeDecision::Fresh));
    }

    if clean_restart {
        std::fs::remove_dir_all(&root).map_err(|e| WorkspaceError::Io(root.clone(), e))?;
        std::fs::create_dir_all(&root).map_err(|e| WorkspaceError::Io(root.clone(), e))?;
        return Ok((Workspace { root }, ResumeDecision::CleanRestarted));
    }

    if resume {
        return Ok((Workspace { root }, ResumeDecision::Resumed));
    }

    Err(WorkspaceError::AmbiguousExisting(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn project_root_is_two_levels_above_config() {
        let config_path = Path::new("/work/run/configs/scheduler.yaml");
        assert_eq!(project_root_for(config_path), PathBuf::from("/work/run"));
    }

    #[test]
    fn templated_output_dir_always_creates_fresh() {
        let project_root = tempdir().unwrap();
        let (workspace, decision) =
            resolve_workspace(project_root.path(), "{timestamp}_run", false, false).unwrap();
        assert_eq!(decision, ResumeDecision::Fresh);
        assert!(workspace.root.exists());
    }

    #[test]
    fn literal_existing_dir_without_flags_is_ambiguous() {
        let project_root = tempdir().unwrap();
        std::fs::create_dir_all(project_root.path().join("run")).unwrap();
        let result = resolve_workspace(project_root.path(), "run", false, false);
        assert!(matches!(result, Err(WorkspaceError::AmbiguousExisting(_))));
    }

    #[test]
    fn resume_keeps_existing_contents() {
        let project_root = tempdir().unwrap();
        let run_dir = project_root.path().join("run");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("marker.txt"), "kept").unwrap();

        let (workspace, decision) =
            resolve_workspace(project_root.path(), "run", true, false).unwrap();
        assert_eq!(decision, ResumeDecision::Resumed);
        assert!(workspace.root.join("marker.txt").exists());
    }

    #[test]
    fn clean_restart_wipes_existing_contents() {
        let project_root = tempdir().unwrap();
        let run_dir = project_root.path().join("run");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("marker.txt"), "discarded").unwrap();

        let (workspace, decision) =
            resolve_workspace(project_root.path(), "run", false, true).unwrap();
        assert_eq!(decision, ResumeDecision::CleanRestarted);
        assert!(!workspace.root.join("marker.txt").exists());
    }

    #[test]
    fn last_completed_iteration_stops_at_first_gap() {
        let project_root = tempdir().unwrap();
        let workspace = Workspace {
            root: project_root.path().to_path_buf(),
        };
        std::fs::create_dir_all(workspace.iteration_dir(1)).unwrap();
        std::fs::write(workspace.iteration_dir(1).join(PREDS_FILENAME), "{}").unwrap();
        std::fs::create_dir_all(workspace.iteration_dir(3)).unwrap();
        std::fs::write(workspace.iteration_dir(3).join(PREDS_FILENAME), "{}").unwrap();

        assert_eq!(workspace.last_completed_iteration(3), 1);
    }
}
