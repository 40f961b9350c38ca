//! The operator framework: registry, base discovery/parallel-execution
//! pipeline, and the shared Template-family YAML serialization.

pub mod alternative;
pub mod crossover;
pub mod risk_summary;
pub mod trajectory_analyzer;

use crate::data::{self, InstanceArtifactSet};
use crate::llm::LlmClient;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorFamily {
    Template,
    Enhance,
}

/// Output of a successful `process` call, merged into the next iteration's
/// agent-runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorResult {
    TemplatesDir(PathBuf),
    EnhanceHistoryFilterJson(PathBuf),
}

impl OperatorResult {
    /// The config key this result is merged under (§4.5's two recognized keys).
    pub fn config_key(&self) -> &'static str {
        match self {
            OperatorResult::TemplatesDir(_) => "instance_templates_dir",
            OperatorResult::EnhanceHistoryFilterJson(_) => "enhance_history_filter_json",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            OperatorResult::TemplatesDir(p) => p,
            OperatorResult::EnhanceHistoryFilterJson(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub instance_dir: PathBuf,
}

/// A pluggable per-instance strategy generator.
///
/// All four concrete operators are Template family: their `generate_content`
/// output is wrapped into a `system_template` YAML file (see
/// [`render_template`]). The shared discovery → parallel generation →
/// serialization pipeline lives once in [`run_operator`]; implementations
/// only supply identity, discovery overrides where needed, and content
/// generation.
#[async_trait]
pub trait Operator: Send + Sync {
    fn name(&self) -> &'static str;
    fn family(&self) -> OperatorFamily;
    fn strategy_prefix(&self) -> &'static str;

    /// Finds candidate instances. Default: direct subdirectories of the
    /// previous iteration directory containing at least one `.tra` file.
    /// `risk-summary` overrides this to iterate the pool directly, since its
    /// content only depends on pool history, not the previous iteration's
    /// raw trace.
    fn discover(&self, prev_iteration_dir: &Path, pool: &Value) -> Vec<InstanceInfo> {
        let _ = pool;
        data::get_iteration_instances(prev_iteration_dir)
            .into_iter()
            .filter(|dir| {
                let id = instance_id_of(dir);
                dir.join(format!("{id}.tra")).exists()
            })
            .map(|dir| InstanceInfo {
                instance_id: instance_id_of(&dir),
                instance_dir: dir,
            })
            .collect()
    }

    /// Resolves the problem statement fed to `generate_content`. Default:
    /// the instance's own `.problem`/`.traj`-embedded statement, skipping
    /// the instance if empty. `risk-summary` overrides this since its
    /// candidates come from pool history rather than a previous iteration's
    /// directory, and may have none of these files on disk (e.g. the
    /// instance set changed between iterations).
    fn resolve_problem(&self, _info: &InstanceInfo, artifacts: &InstanceArtifactSet) -> Option<String> {
        artifacts.problem.clone().filter(|p| !p.is_empty())
    }

    /// Produces the per-instance strategy text, or `None` to skip (logged,
    /// not fatal). `pool` is the whole trajectory pool snapshot; operators
    /// that need another instance's history must look it up by
    /// `info.instance_id` rather than assuming pool iteration order.
    async fn generate_content(
        &self,
        info: &InstanceInfo,
        problem: &str,
        tra: &Value,
        pool: &Value,
        llm: &dyn LlmClient,
    ) -> Option<String>;
}

fn instance_id_of(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Truncates `content` to at most `max_words` whitespace-separated words.
/// Used by the three LLM-backed operators to enforce their prompt-specified
/// word budgets even if the model overruns them.
pub(crate) fn enforce_word_budget(content: &str, max_words: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.len() <= max_words {
        content.trim().to_string()
    } else {
        words[..max_words].join(" ")
    }
}

/// Returns `(iteration, summary)` pairs from one pool entry, sorted
/// ascending by iteration number. The `"problem"` key is metadata, never an
/// iteration, and is excluded.
pub(crate) fn sorted_iterations(entry: &Value) -> Vec<(u32, &Value)> {
    let Some(obj) = entry.as_object() else {
        return Vec::new();
    };
    let mut pairs: Vec<(u32, &Value)> = obj
        .iter()
        .filter_map(|(key, value)| key.parse::<u32>().ok().map(|n| (n, value)))
        .collect();
    pairs.sort_by_key(|(n, _)| *n);
    pairs
}

/// Registry of known operators, populated with the four canonical
/// implementations via `Default` — the same pattern the teacher's tool
/// registry uses to pre-register its built-ins.
pub struct OperatorRegistry {
    operators: HashMap<&'static str, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    pub fn register(&mut self, operator: Arc<dyn Operator>) {
        self.operators.insert(operator.name(), operator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.operators.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(risk_summary::RiskSummaryOperator));
        registry.register(Arc::new(alternative::AlternativeOperator));
        registry.register(Arc::new(crossover::CrossoverOperator));
        registry.register(Arc::new(trajectory_analyzer::TrajectoryAnalyzerOperator));
        registry
    }
}

/// Wraps generated content in the fixed Template-family preamble and writes
/// it as a YAML literal block scalar, indenting every line of the body so
/// multi-line generated content stays part of the block.
fn render_template(strategy_prefix: &str, content: &str) -> String {
    let body = format!(
        "You are a helpful assistant that can interact with a terminal to solve software engineering tasks.\n\n{strategy_prefix}:\n\n{content}"
    );
    let indented = indent_block(&body, "      ");
    format!("agent:\n  templates:\n    system_template: |\n{indented}\n")
}

fn indent_block(text: &str, indent: &str) -> String {
    text.split('\n')
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs the shared discovery → bounded-worker-pool generation →
/// serialization pipeline for one operator.
///
/// Per-instance work is independent: each worker writes to its own
/// `<instance_id>.yaml`, so `num_workers=1` and `num_workers=W>1` always
/// produce the same *set* of files (worker-count neutrality, §8).
pub async fn run_operator(
    operator: Arc<dyn Operator>,
    workspace_dir: &Path,
    current_iteration: u32,
    num_workers: usize,
    pool: Arc<Value>,
    llm: Arc<dyn LlmClient>,
) -> Option<OperatorResult> {
    let prev_dir = workspace_dir.join(format!("iteration_{}", current_iteration - 1));
    let candidates = operator.discover(&prev_dir, &pool);
    if candidates.is_empty() {
        warn!(operator = operator.name(), "no candidate instances discovered");
        return None;
    }

    let system_prompt_dir = workspace_dir
        .join(format!("iteration_{current_iteration}"))
        .join("system_prompt");
    if std::fs::create_dir_all(&system_prompt_dir).is_err() {
        warn!(operator = operator.name(), "failed to create system_prompt directory");
        return None;
    }

    let queue_len = candidates.len();
    let (tx, rx) = mpsc::channel::<InstanceInfo>(queue_len.max(1));
    for info in candidates {
        if tx.send(info).await.is_err() {
            break;
        }
    }
    drop(tx);
    let rx = Arc::new(Mutex::new(rx));

    let worker_count = num_workers.max(1);
    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let rx = Arc::clone(&rx);
        let operator = Arc::clone(&operator);
        let pool = Arc::clone(&pool);
        let llm = Arc::clone(&llm);
        let dir = system_prompt_dir.clone();

        handles.push(tokio::spawn(async move {
            let mut written = 0usize;
            loop {
                let info = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                let Some(info) = info else {
                    break;
                };

                let artifacts = data::get_instance_data(&info.instance_dir, true);
                let Some(problem) = operator.resolve_problem(&info, &artifacts) else {
                    warn!(instance = %info.instance_id, "skipping: empty problem statement");
                    continue;
                };

                let tra_value: Value = artifacts
                    .tra
                    .as_deref()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or(Value::Null);

                let Some(content) = operator
                    .generate_content(&info, &problem, &tra_value, &pool, llm.as_ref())
                    .await
                else {
                    warn!(instance = %info.instance_id, "skipping: empty generated content");
                    continue;
                };
                if content.trim().is_empty() {
                    continue;
                }

                let yaml = render_template(operator.strategy_prefix(), &content);
                let path = dir.join(format!("{}.yaml", info.instance_id));
                match std::fs::write(&path, yaml) {
                    Ok(()) => written += 1,
                    Err(e) => warn!(instance = %info.instance_id, error = %e, "failed to write template"),
                }
            }
            written
        }));
    }

    let mut total_written = 0usize;
    for handle in handles {
        total_written += handle.await.unwrap_or(0);
    }

    if total_written == 0 {
        None
    } else {
        Some(match operator.family() {
            OperatorFamily::Template => OperatorResult::TemplatesDir(system_prompt_dir),
            OperatorFamily::Enhance => OperatorResult::EnhanceHistoryFilterJson(system_prompt_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_template_contains_fixed_preamble_and_prefix() {
        let yaml = render_template("ALTERNATIVE SOLUTION STRATEGY", "do the thing\ndifferently");
        assert!(yaml.starts_with("agent:\n  templates:\n    system_template: |\n"));
        assert!(yaml.contains("You are a helpful assistant that can interact with a terminal"));
        assert!(yaml.contains("ALTERNATIVE SOLUTION STRATEGY:"));
        assert!(yaml.contains("do the thing"));
        assert!(yaml.contains("differently"));
    }

    #[test]
    fn default_registry_has_all_four_operators() {
        let registry = OperatorRegistry::default();
        let mut names = registry.names();
        names.sort_unstable();
        assert_eq!(
            names,
            vec!["alternative", "crossover", "risk-summary", "trajectory-analyzer"]
        );
    }
}
