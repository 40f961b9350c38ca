//! Drives the configured iterations in sequence: runs this iteration's
//! operator (if any) against the previous iteration's artifacts, launches
//! the agent-runner subprocess, then folds the results into the trajectory
//! pool before moving on.

use crate::compressor;
use crate::config::{resolve_path, Config};
use crate::data;
use crate::llm::{LlmClient, OpenAiClient};
use crate::operators::{self, OperatorRegistry, OperatorResult};
use crate::pool::{self, TrajectoryPool};
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const AGENT_RUNNER_BINARY: &str = "agent-runner";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exercises discovery, operators, compression, and pool updates without
    /// spawning the agent-runner subprocess — synthetic trajectories stand
    /// in for real ones.
    Demo,
    Execute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub completed_iterations: u32,
    pub total_iterations: u32,
    pub failed_at_iteration: Option<u32>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed_at_iteration.is_none()
    }
}

/// Runs every iteration from `start_iteration` (1-based, inclusive) through
/// the end of the strategy plan. `start_iteration` is `1` for a fresh or
/// clean-restarted workspace, or `last_completed_iteration + 1` when
/// resuming.
pub async fn run(
    config: &Config,
    project_root: &Path,
    workspace: &Workspace,
    start_iteration: u32,
    mode: RunMode,
    registry: &OperatorRegistry,
) -> Result<RunOutcome> {
    let pool = TrajectoryPool::new(
        workspace.pool_path(),
        Some(build_llm_client(&config.model)?),
    );
    pool.initialize().context("failed to initialize trajectory pool")?;

    let operator_llm = build_llm_client(config.operator_models.as_ref().unwrap_or(&config.model))?;

    let instances_path = resolve_path(project_root, &config.instances.json_file);
    let instance_ids = read_instance_ids(&instances_path, &config.instances.key);

    let total = config.strategy.len() as u32;

    for (idx, step) in config.strategy.iterations.iter().enumerate() {
        let iteration = (idx + 1) as u32;
        if iteration < start_iteration {
            info!(iteration, "skipping already-completed iteration");
            continue;
        }

        info!(iteration, total, "starting iteration");
        let iteration_dir = workspace
            .ensure_iteration_dir(iteration)
            .with_context(|| format!("failed to create iteration {iteration} directory"))?;

        let operator_result = run_iteration_operator(
            config,
            workspace,
            &pool,
            registry,
            Arc::clone(&operator_llm),
            iteration,
            step.operator.as_deref(),
        )
        .await;

        let merged_config_path = write_merged_config(
            project_root,
            &iteration_dir,
            config,
            &step.base_config,
            operator_result.as_ref(),
        )
        .with_context(|| format!("failed to prepare config for iteration {iteration}"))?;

        let success = match mode {
            RunMode::Demo => run_demo_iteration(&iteration_dir, &instance_ids)?,
            RunMode::Execute => run_agent_subprocess(project_root, &merged_config_path).await?,
        };

        if !success {
            error!(iteration, "agent-runner subprocess did not succeed; stopping");
            return Ok(RunOutcome {
                completed_iterations: iteration.saturating_sub(1),
                total_iterations: total,
                failed_at_iteration: Some(iteration),
            });
        }

        update_pool_for_iteration(&pool, &iteration_dir, iteration).await;
    }

    Ok(RunOutcome {
        completed_iterations: total,
        total_iterations: total,
        failed_at_iteration: None,
    })
}

fn build_llm_client(params: &crate::config::ModelParameters) -> Result<Arc<dyn LlmClient>> {
    Ok(Arc::new(OpenAiClient::new(params)?))
}

async fn run_iteration_operator(
    config: &Config,
    workspace: &Workspace,
    pool: &TrajectoryPool,
    registry: &OperatorRegistry,
    llm: Arc<dyn LlmClient>,
    iteration: u32,
    operator_name: Option<&str>,
) -> Option<OperatorResult> {
    let operator_name = operator_name?;
    if iteration == 1 {
        warn!(
            operator = operator_name,
            "operator configured on iteration 1 has no prior iteration to draw on, skipping"
        );
        return None;
    }
    let Some(operator) = registry.get(operator_name) else {
        warn!(operator = operator_name, "unknown operator, skipping");
        return None;
    };

    let snapshot = match pool.load() {
        Ok(value) => Arc::new(value),
        Err(e) => {
            warn!(error = %e, "failed to load trajectory pool for operator, skipping");
            return None;
        }
    };

    operators::run_operator(
        operator,
        &workspace.root,
        iteration,
        config.num_workers,
        snapshot,
        llm,
    )
    .await
}

/// Loads the iteration's base agent-runner config and overlays the run-wide
/// `model`/`instances`/`num_workers`/`output_dir` settings plus, if an
/// operator ran, its output path under the key its family specifies.
fn write_merged_config(
    project_root: &Path,
    iteration_dir: &Path,
    config: &Config,
    base_config_rel: &str,
    operator_result: Option<&OperatorResult>,
) -> Result<PathBuf> {
    let base_path = resolve_path(project_root, base_config_rel);
    let raw = std::fs::read_to_string(&base_path)
        .with_context(|| format!("failed to read base config: {}", base_path.display()))?;
    let mut value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse base config: {}", base_path.display()))?;

    {
        let mapping = value
            .as_mapping_mut()
            .context("base agent-runner config must be a YAML mapping")?;
        mapping.insert(
            serde_yaml::Value::String("model".to_string()),
            serde_yaml::to_value(&config.model)?,
        );
        mapping.insert(
            serde_yaml::Value::String("instances".to_string()),
            serde_yaml::to_value(&config.instances)?,
        );
        mapping.insert(
            serde_yaml::Value::String("num_workers".to_string()),
            serde_yaml::to_value(config.num_workers)?,
        );
        mapping.insert(
            serde_yaml::Value::String("output_dir".to_string()),
            serde_yaml::Value::String(iteration_dir.display().to_string()),
        );
        if let Some(result) = operator_result {
            mapping.insert(
                serde_yaml::Value::String(result.config_key().to_string()),
                serde_yaml::Value::String(result.path().display().to_string()),
            );
        }
    }

    let merged_path = iteration_dir.join("config.yaml");
    let rendered = serde_yaml::to_string(&value)?;
    std::fs::write(&merged_path, rendered)
        .with_context(|| format!("failed to write merged config: {}", merged_path.display()))?;
    Ok(merged_path)
}

async fn run_agent_subprocess(project_root: &Path, config_path: &Path) -> Result<bool> {
    let status = tokio::process::Command::new(AGENT_RUNNER_BINARY)
        .arg(config_path)
        .current_dir(project_root)
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("failed to launch {AGENT_RUNNER_BINARY}"))?;
    Ok(status.success())
}

/// Demo-mode stand-in for the agent-runner subprocess: writes a minimal
/// synthetic trajectory and patch per known instance so the rest of the
/// pipeline (compression, pool updates, the next iteration's operators) runs
/// exactly as it would against real output.
fn run_demo_iteration(iteration_dir: &Path, instance_ids: &[String]) -> Result<bool> {
    for id in instance_ids {
        let instance_dir = iteration_dir.join(id);
        std::fs::create_dir_all(&instance_dir)?;

        let traj = json!({"history": [
            {"role": "system", "content": "demo run"},
            {"role": "user", "content": format!("<pr_description>demo problem for {id}</pr_description>")},
            {"role": "assistant", "thought": "demo reasoning", "action": "echo demo"},
        ]});
        std::fs::write(
            instance_dir.join(format!("{id}.traj")),
            serde_json::to_string_pretty(&traj)?,
        )?;
        std::fs::write(
            instance_dir.join(format!("{id}.patch")),
            "diff --git a/demo b/demo\n",
        )?;
    }
    std::fs::write(iteration_dir.join("preds.json"), "{}")?;
    Ok(true)
}

/// Compresses each instance's raw trace into its `.tra` form and records the
/// iteration's summary in the pool. A pool-update failure for one instance
/// is logged and does not abort the others or the run.
async fn update_pool_for_iteration(pool: &TrajectoryPool, iteration_dir: &Path, iteration: u32) {
    for instance_dir in data::get_iteration_instances(iteration_dir) {
        let instance_id = instance_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let artifacts = data::get_instance_data(&instance_dir, true);

        if let Some(traj_raw) = &artifacts.traj {
            if let Ok(traj_value) = serde_json::from_str::<Value>(traj_raw) {
                let (tra_doc, _stats) = compressor::compress_trajectory(&traj_value);
                if let Ok(rendered) = serde_json::to_string_pretty(&tra_doc) {
                    if let Err(e) =
                        std::fs::write(instance_dir.join(format!("{instance_id}.tra")), rendered)
                    {
                        warn!(instance = %instance_id, error = %e, "failed to write compressed trajectory");
                    }
                }
            }
        }

        let traj_content = artifacts.traj.as_deref().unwrap_or("");
        let patch_content = artifacts.patch.as_deref().unwrap_or(pool::FAILED_NO_PATCH);

        if let Err(e) = pool
            .add_iteration_summary(
                &instance_id,
                iteration,
                traj_content,
                patch_content,
                artifacts.problem.as_deref(),
            )
            .await
        {
            warn!(instance = %instance_id, error = %e, "failed to record iteration summary, continuing");
        }
    }
}

fn read_instance_ids(path: &Path, key: &str) -> Vec<String> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        warn!(path = %path.display(), "failed to read instances file");
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<Value>(&raw) else {
        warn!(path = %path.display(), "failed to parse instances file as JSON");
        return Vec::new();
    };
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(key).and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
