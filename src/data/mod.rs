//! Unified read access to the four per-instance artifacts an iteration
//! directory can hold: `.problem`, `.tra`, `.traj`, and `.patch`/`.pred`.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

const MAX_READ_BYTES: usize = 50_000;
const PR_DESCRIPTION_OPEN: &str = "<pr_description>";
const PR_DESCRIPTION_CLOSE: &str = "</pr_description>";

/// The unified view of one instance's artifacts for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceArtifactSet {
    pub instance_id: String,
    pub problem: Option<String>,
    pub tra: Option<String>,
    /// Populated only when `get_instance_data` was called with `load_all = true`.
    pub traj: Option<String>,
    pub patch: Option<String>,
}

/// Result of scoring an [`InstanceArtifactSet`] against the three
/// score-bearing artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletenessReport {
    pub score: f64,
    pub missing: Vec<&'static str>,
}

/// Reads `path` into a `String`, truncating to [`MAX_READ_BYTES`] bytes.
///
/// Per §4.3, large files are truncated on read and callers cannot
/// distinguish a truncated read from a complete one — this is a deliberate
/// bound on how much context an operator's LLM prompt can absorb from a
/// single artifact.
fn read_bounded(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.len() <= MAX_READ_BYTES {
        return Some(String::from_utf8_lossy(&bytes).into_owned());
    }
    let mut end = MAX_READ_BYTES;
    while end > 0 && !bytes.is_char_boundary_safe(end) {
        end -= 1;
    }
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Tiny local shim: `[u8]` has no `is_char_boundary`, only `str` does, and we
/// do not want to allocate a full lossy string before deciding where to cut.
trait ByteBoundary {
    fn is_char_boundary_safe(&self, idx: usize) -> bool;
}

impl ByteBoundary for [u8] {
    fn is_char_boundary_safe(&self, idx: usize) -> bool {
        // A byte is not a UTF-8 continuation byte (0b10xxxxxx) iff it starts
        // a new code point (or idx is at the end of the slice).
        idx == self.len() || (self[idx] & 0b1100_0000) != 0b1000_0000
    }
}

/// Extracts a PR description embedded in the second history turn of a raw
/// `.traj` document, per §4.3 resolution step (b).
fn extract_pr_description(traj_raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(traj_raw).ok()?;
    let history = value.get("history")?.as_array()?;
    let second_turn = history.get(1)?;
    let text = second_turn.get("content").and_then(Value::as_str)?;

    let start = text.find(PR_DESCRIPTION_OPEN)? + PR_DESCRIPTION_OPEN.len();
    let end = text[start..].find(PR_DESCRIPTION_CLOSE)? + start;
    Some(text[start..end].trim().to_string())
}

/// Step (c) of the problem-resolution order: pulling a problem statement
/// from an external dataset config. Left as an explicit unimplemented hook
/// (see SPEC_FULL.md §4.3's resolved Open Question) rather than guessing an
/// unspecified dataset schema.
fn problem_from_json_config(_instance_id: &str) -> Option<String> {
    None
}

/// Loads the unified artifact set for the instance directory at `dir`.
///
/// `dir`'s basename is taken as the instance id. When `load_all` is `false`,
/// nothing is read from disk beyond what's needed to report which artifacts
/// exist — `problem`/`tra`/`traj`/`patch` are all left `None`. Callers that
/// only need to know what's available (without paying the read cost) pass
/// `false`; everything else passes `true`.
pub fn get_instance_data(dir: &Path, load_all: bool) -> InstanceArtifactSet {
    let instance_id = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !load_all {
        return InstanceArtifactSet {
            instance_id,
            ..Default::default()
        };
    }

    let traj_content = read_bounded(&dir.join(format!("{instance_id}.traj")));
    let tra_content = read_bounded(&dir.join(format!("{instance_id}.tra")));

    let problem = read_bounded(&dir.join(format!("{instance_id}.problem")))
        .or_else(|| traj_content.as_deref().and_then(extract_pr_description))
        .or_else(|| problem_from_json_config(&instance_id));

    let patch_path = dir.join(format!("{instance_id}.patch"));
    let pred_path = dir.join(format!("{instance_id}.pred"));
    let patch = if patch_path.exists() {
        read_bounded(&patch_path)
    } else if pred_path.exists() {
        read_bounded(&pred_path)
    } else {
        None
    };

    InstanceArtifactSet {
        instance_id,
        problem,
        tra: tra_content,
        traj: traj_content,
        patch,
    }
}

/// Lists direct subdirectories of an iteration directory, each a candidate
/// instance directory. No recursion. A missing `iteration_dir` logs a
/// warning and returns an empty list rather than erroring, since "no
/// instances produced yet" is a normal state while an agent-runner
/// subprocess is still starting up.
pub fn get_iteration_instances(iteration_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(iteration_dir) else {
        warn!(dir = %iteration_dir.display(), "iteration directory does not exist");
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect()
}

/// Scores an artifact set over `{problem, tra, patch}`; `traj` is
/// informational only and never affects the score.
pub fn validate_completeness(set: &InstanceArtifactSet) -> CompletenessReport {
    let checks: [(&'static str, bool); 3] = [
        ("problem", set.problem.is_some()),
        ("tra", set.tra.is_some()),
        ("patch", set.patch.is_some()),
    ];

    let present = checks.iter().filter(|(_, ok)| *ok).count();
    let missing = checks
        .iter()
        .filter(|(_, ok)| !*ok)
        .map(|(name, _)| *name)
        .collect();

    CompletenessReport {
        score: (present as f64 / 3.0) * 100.0,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_instance(dir: &Path, id: &str, files: &[(&str, &str)]) -> PathBuf {
        let instance_dir = dir.join(id);
        std::fs::create_dir_all(&instance_dir).unwrap();
        for (ext, content) in files {
            std::fs::write(instance_dir.join(format!("{id}.{ext}")), content).unwrap();
        }
        instance_dir
    }

    #[test]
    fn patch_takes_priority_over_pred() {
        let dir = tempdir().unwrap();
        let instance_dir = write_instance(
            dir.path(),
            "django__django-1",
            &[("patch", "patch content"), ("pred", "pred content")],
        );
        let data = get_instance_data(&instance_dir, true);
        assert_eq!(data.patch.as_deref(), Some("patch content"));
    }

    #[test]
    fn falls_back_to_pred_when_patch_absent() {
        let dir = tempdir().unwrap();
        let instance_dir = write_instance(dir.path(), "inst", &[("pred", "pred content")]);
        let data = get_instance_data(&instance_dir, true);
        assert_eq!(data.patch.as_deref(), Some("pred content"));
    }

    #[test]
    fn problem_file_takes_priority_over_traj_extraction() {
        let dir = tempdir().unwrap();
        let traj = serde_json::json!({"history": [
            {"role": "system", "content": "setup"},
            {"role": "user", "content": "<pr_description>fix the bug</pr_description>"}
        ]})
        .to_string();
        let instance_dir = write_instance(
            dir.path(),
            "inst",
            &[("problem", "authoritative problem text"), ("traj", &traj)],
        );
        let data = get_instance_data(&instance_dir, true);
        assert_eq!(data.problem.as_deref(), Some("authoritative problem text"));
    }

    #[test]
    fn extracts_problem_from_traj_when_problem_file_missing() {
        let dir = tempdir().unwrap();
        let traj = serde_json::json!({"history": [
            {"role": "system", "content": "setup"},
            {"role": "user", "content": "<pr_description>fix the bug</pr_description>"}
        ]})
        .to_string();
        let instance_dir = write_instance(dir.path(), "inst", &[("traj", &traj)]);
        let data = get_instance_data(&instance_dir, true);
        assert_eq!(data.problem.as_deref(), Some("fix the bug"));
    }

    #[test]
    fn load_all_false_loads_nothing_but_the_instance_id() {
        let dir = tempdir().unwrap();
        let instance_dir = write_instance(
            dir.path(),
            "inst",
            &[
                ("traj", "{\"history\":[]}"),
                ("problem", "fix the bug"),
                ("patch", "diff --git a/x b/x"),
            ],
        );
        let data = get_instance_data(&instance_dir, false);
        assert_eq!(data.instance_id, "inst");
        assert!(data.traj.is_none());
        assert!(data.problem.is_none());
        assert!(data.tra.is_none());
        assert!(data.patch.is_none());
    }

    #[test]
    fn missing_iteration_dir_returns_empty_list() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does_not_exist");
        assert!(get_iteration_instances(&missing).is_empty());
    }

    #[test]
    fn completeness_score_ignores_traj() {
        let set = InstanceArtifactSet {
            instance_id: "x".to_string(),
            problem: Some("p".to_string()),
            tra: Some("t".to_string()),
            traj: None,
            patch: None,
        };
        let report = validate_completeness(&set);
        assert!((report.score - (2.0 / 3.0 * 100.0)).abs() < 1e-9);
        assert_eq!(report.missing, vec!["patch"]);
    }
}
