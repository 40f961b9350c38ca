//! The trajectory pool: an append-only, mutex-guarded JSON map persisted at
//! `<workspace>/traj.pool`.

mod summarizer;

use crate::llm::LlmClient;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Sentinel passed as `patch_content` when an instance produced no
/// patch/prediction for an iteration.
pub const FAILED_NO_PATCH: &str = "FAILED_NO_PATCH";

const FAILURE_REASON: &str =
    "No patch/prediction generated (likely due to cost limit or early termination)";

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to read pool file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse pool file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("failed to write pool file {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolStats {
    pub total_instances: usize,
    pub total_iterations: usize,
    pub instances: Vec<String>,
}

/// Append-only persistent record of per-instance, per-iteration trajectory
/// summaries. All mutation goes through [`TrajectoryPool::add_iteration_summary`],
/// which serializes the whole-file load→mutate→save cycle behind a mutex so
/// that an operator's worker pool can update several instances concurrently
/// without racing on the shared file.
pub struct TrajectoryPool {
    path: PathBuf,
    lock: Mutex<()>,
    llm_client: Option<Arc<dyn LlmClient>>,
}

impl TrajectoryPool {
    pub fn new(path: PathBuf, llm_client: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
            llm_client,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent: creates the parent directory and writes `{}` only if the
    /// file is missing.
    pub fn initialize(&self) -> Result<(), PoolError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PoolError::Write(self.path.clone(), e))?;
        }
        if !self.path.exists() {
            self.save(&Value::Object(Map::new()))?;
            info!(path = %self.path.display(), "initialized empty trajectory pool");
        }
        Ok(())
    }

    /// Whole-file read; returns an empty map if the file does not exist.
    pub fn load(&self) -> Result<Value, PoolError> {
        if !self.path.exists() {
            return Ok(Value::Object(Map::new()));
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| PoolError::Read(self.path.clone(), e))?;
        serde_json::from_str(&raw).map_err(|e| PoolError::Parse(self.path.clone(), e))
    }

    /// Whole-file write, UTF-8, pretty-printed, atomic via write-then-rename.
    pub fn save(&self, pool: &Value) -> Result<(), PoolError> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent).map_err(|e| PoolError::Write(self.path.clone(), e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| PoolError::Write(self.path.clone(), e))?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), pool)
            .map_err(|e| PoolError::Parse(self.path.clone(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| PoolError::Write(self.path.clone(), e.error))?;
        Ok(())
    }

    /// Computes the summary to store for one `(instance, iteration)` pair.
    ///
    /// The `FAILED_NO_PATCH` overlay is applied after summarization
    /// completes, regardless of whether the LLM path or the deterministic
    /// fallback produced the base fields — it describes an observed fact
    /// about the instance (no patch was produced), not a property of
    /// whichever summarizer ran.
    async fn summarize(&self, tra_content: &str, patch_content: &str, iteration: u32) -> Value {
        let is_failed = patch_content == FAILED_NO_PATCH;

        let mut summary = match &self.llm_client {
            Some(client) => {
                match summarizer::summarize_with_llm(client.as_ref(), tra_content, patch_content)
                    .await
                {
                    Some(valid) => valid,
                    None => {
                        warn!(iteration, "LLM summarization unavailable or invalid, using fallback");
                        summarizer::fallback_summary(tra_content, patch_content, iteration)
                    }
                }
            }
            None => {
                debug!(iteration, "no LLM client configured, using fallback summary");
                summarizer::fallback_summary(tra_content, patch_content, iteration)
            }
        };

        if is_failed {
            if let Value::Object(map) = &mut summary {
                map.insert("strategy_status".to_string(), Value::String("FAILED".to_string()));
                map.insert(
                    "failure_reason".to_string(),
                    Value::String(FAILURE_REASON.to_string()),
                );
            }
        }

        summary
    }

    /// Loads the pool, inserts `problem` under `instance` if this is the
    /// first observation, computes and appends the iteration summary, and
    /// saves — all under the pool's mutex so concurrent per-instance updates
    /// from an operator's worker pool cannot drop each other's writes.
    pub async fn add_iteration_summary(
        &self,
        instance: &str,
        iteration: u32,
        tra_content: &str,
        patch_content: &str,
        problem: Option<&str>,
    ) -> Result<(), PoolError> {
        let _guard = self.lock.lock().await;

        let mut pool = self.load()?;
        let pool_obj = pool.as_object_mut().expect("pool root is always an object");

        let instance_entry = pool_obj
            .entry(instance.to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .expect("instance entries are always objects");

        if !instance_entry.contains_key("problem") {
            if let Some(problem) = problem {
                instance_entry.insert("problem".to_string(), Value::String(problem.to_string()));
            }
        }

        let summary = self.summarize(tra_content, patch_content, iteration).await;
        instance_entry.insert(iteration.to_string(), summary);

        self.save(&pool)?;
        info!(instance, iteration, "recorded iteration summary in trajectory pool");
        Ok(())
    }

    /// `total_iterations` counts only numeric iteration keys per instance —
    /// the `"problem"` key is metadata, not an iteration, and must not
    /// inflate the count.
    pub fn get_pool_stats(&self) -> Result<PoolStats, PoolError> {
        let pool = self.load()?;
        let pool_obj = pool.as_object().expect("pool root is always an object");

        let total_instances = pool_obj.len();
        let total_iterations = pool_obj
            .values()
            .map(|entry| {
                entry
                    .as_object()
                    .map(|fields| {
                        fields
                            .keys()
                            .filter(|key| key.as_str() != "problem")
                            .count()
                    })
                    .unwrap_or(0)
            })
            .sum();
        let instances = pool_obj.keys().cloned().collect();

        Ok(PoolStats {
            total_instances,
            total_iterations,
            instances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool_at(dir: &Path) -> TrajectoryPool {
        TrajectoryPool::new(dir.join("traj.pool"), None)
    }

    #[test]
    fn initialize_creates_empty_pool() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path());
        pool.initialize().unwrap();
        let loaded = pool.load().unwrap();
        assert_eq!(loaded, Value::Object(Map::new()));
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path());
        pool.initialize().unwrap();
        let mut seeded = Map::new();
        seeded.insert("a".to_string(), Value::Object(Map::new()));
        pool.save(&Value::Object(seeded.clone())).unwrap();
        pool.initialize().unwrap();
        assert_eq!(pool.load().unwrap(), Value::Object(seeded));
    }

    #[tokio::test]
    async fn add_iteration_summary_writes_problem_once() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path());
        pool.initialize().unwrap();

        pool.add_iteration_summary("a", 1, "{\"history\":[]}", "diff-1", Some("fix the bug"))
            .await
            .unwrap();
        pool.add_iteration_summary("a", 2, "{\"history\":[]}", "diff-2", Some("a different problem"))
            .await
            .unwrap();

        let loaded = pool.load().unwrap();
        assert_eq!(loaded["a"]["problem"], "fix the bug");
        assert!(loaded["a"]["1"].is_object());
        assert!(loaded["a"]["2"].is_object());
    }

    #[tokio::test]
    async fn failed_no_patch_marks_strategy_status() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path());
        pool.initialize().unwrap();

        pool.add_iteration_summary("a", 1, "{\"history\":[]}", FAILED_NO_PATCH, Some("p"))
            .await
            .unwrap();

        let loaded = pool.load().unwrap();
        assert_eq!(loaded["a"]["1"]["strategy_status"], "FAILED");
        assert!(loaded["a"]["1"]["failure_reason"].as_str().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn pool_stats_excludes_problem_key_from_iteration_count() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path());
        pool.initialize().unwrap();
        pool.add_iteration_summary("a", 1, "{}", "diff", Some("p"))
            .await
            .unwrap();
        pool.add_iteration_summary("a", 2, "{}", "diff", None)
            .await
            .unwrap();
        pool.add_iteration_summary("b", 1, "{}", "diff", Some("q"))
            .await
            .unwrap();

        let stats = pool.get_pool_stats().unwrap();
        assert_eq!(stats.total_instances, 2);
        assert_eq!(stats.total_iterations, 3);
    }

    #[tokio::test]
    async fn existing_summaries_are_never_mutated_by_later_writes() {
        let dir = tempdir().unwrap();
        let pool = pool_at(dir.path());
        pool.initialize().unwrap();
        pool.add_iteration_summary("a", 1, "{}", "diff-1", Some("p"))
            .await
            .unwrap();
        let first_snapshot = pool.load().unwrap()["a"]["1"].clone();

        pool.add_iteration_summary("a", 2, "{}", "diff-2", Some("p"))
            .await
            .unwrap();
        let after_second = pool.load().unwrap()["a"]["1"].clone();

        assert_eq!(first_snapshot, after_second, "pool monotonicity");
    }
}
