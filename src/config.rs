use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Connection and sampling parameters for a single LLM backend.
///
/// Mirrors the top-level `model` / `operator_models` block of the scheduler
/// configuration. `name`, `api_base` and `api_key` are mandatory; an absent
/// field is a construction-time error rather than a silently-defaulted one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    pub name: String,
    pub api_base: String,
    pub api_key: String,
    #[serde(default)]
    pub max_input_tokens: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ModelParameters {
    /// Construction-time validation: missing any of {name, api_base, api_key} is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("model.name"));
        }
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::MissingField("model.api_base"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("model.api_key"));
        }
        Ok(())
    }
}

/// Describes how instances are sourced for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesConfig {
    pub json_file: String,
    pub key: String,
    #[serde(default)]
    pub subset: Option<usize>,
    #[serde(default)]
    pub split: Option<String>,
    #[serde(default)]
    pub shuffle: Option<bool>,
    #[serde(default)]
    pub evaluate: Option<bool>,
}

/// One step of the strategy plan: the agent-runner config to use for this
/// iteration, plus an optional operator name run beforehand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationPlan {
    pub base_config: String,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub iterations: Vec<IterationPlan>,
}

impl StrategyPlan {
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }
}

fn default_num_workers() -> usize {
    1
}

/// Top-level scheduler configuration, loaded from a single YAML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub base_config: String,
    pub model: ModelParameters,
    #[serde(default)]
    pub operator_models: Option<ModelParameters>,
    pub instances: InstancesConfig,
    pub output_dir: String,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    pub strategy: StrategyPlan,
}

/// Fatal, pre-flight configuration errors. Reported before any iteration starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("referenced file does not exist: {0}")]
    MissingFile(PathBuf),
    #[error("num_workers must be a positive integer, got {0}")]
    InvalidWorkerCount(usize),
    #[error("strategy.iterations must contain at least one iteration")]
    EmptyStrategy,
    #[error("unknown operator '{0}' referenced at iteration {1}")]
    UnknownOperator(String, usize),
}

impl Config {
    /// Loads and deserializes a scheduler configuration from a YAML file.
    ///
    /// Does not validate referenced paths or operator names; call
    /// [`Config::validate`] once the project root and operator registry are
    /// known.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config YAML: {}", path.display()))?;
        Ok(config)
    }

    /// Validates field presence, referenced files, and operator names.
    ///
    /// `known_operators` is the set of operator names registered with the
    /// scheduler; an iteration referencing an unknown name is a `ConfigError`
    /// rather than a silent skip, since an unrecognized operator almost
    /// certainly indicates a typo in the strategy plan.
    pub fn validate(&self, project_root: &Path, known_operators: &[&str]) -> Result<(), ConfigError> {
        self.model.validate()?;
        if let Some(operator_models) = &self.operator_models {
            operator_models.validate()?;
        }

        if self.num_workers == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.num_workers));
        }

        if self.strategy.is_empty() {
            return Err(ConfigError::EmptyStrategy);
        }

        let base = resolve_path(project_root, &self.base_config);
        if !base.exists() {
            return Err(ConfigError::MissingFile(base));
        }

        let instances_file = resolve_path(project_root, &self.instances.json_file);
        if !instances_file.exists() {
            return Err(ConfigError::MissingFile(instances_file));
        }

        for (idx, step) in self.strategy.iterations.iter().enumerate() {
            let step_config = resolve_path(project_root, &step.base_config);
            if !step_config.exists() {
                return Err(ConfigError::MissingFile(step_config));
            }
            if let Some(operator) = &step.operator {
                if !known_operators.contains(&operator.as_str()) {
                    return Err(ConfigError::UnknownOperator(operator.clone(), idx + 1));
                }
            }
        }

        Ok(())
    }
}

/// Resolves a possibly-relative path against the project root.
///
/// Per the external-interface contract, relative paths in the configuration
/// resolve against a project root two directories above the driver; callers
/// compute that root once (see [`crate::workspace::project_root_for`]) and
/// pass it in here.
pub fn resolve_path(root: &Path, raw: &str) -> PathBuf {
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    }
}
