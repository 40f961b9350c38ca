//! Identifies blind spots across an instance's accumulated iteration
//! history, independent of the current iteration's raw trace.

use super::{enforce_word_budget, InstanceInfo, Operator, OperatorFamily};
use crate::data::InstanceArtifactSet;
use crate::llm::LlmClient;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

const STRATEGY_PREFIX: &str = "RISK-AWARE PROBLEM SOLVING GUIDANCE";
const MAX_WORDS: usize = 200;
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 400;

const FALLBACK: &str = "Consider potential blind spots before proceeding: verify edge cases the current approach may have skipped, check whether similar issues exist elsewhere in the codebase, and confirm that any fix does not introduce regressions in adjacent functionality.";

pub struct RiskSummaryOperator;

fn has_iteration_history(entry: &Value) -> bool {
    entry
        .as_object()
        .map(|obj| obj.keys().any(|key| key != "problem"))
        .unwrap_or(false)
}

#[async_trait]
impl Operator for RiskSummaryOperator {
    fn name(&self) -> &'static str {
        "risk-summary"
    }

    fn family(&self) -> OperatorFamily {
        OperatorFamily::Template
    }

    fn strategy_prefix(&self) -> &'static str {
        STRATEGY_PREFIX
    }

    /// Candidates come from the pool, not the filesystem: any instance with
    /// at least one recorded iteration has history worth scrutinizing for
    /// risks, whether or not it participated in the immediately preceding
    /// iteration.
    fn discover(&self, prev_iteration_dir: &Path, pool: &Value) -> Vec<InstanceInfo> {
        let Some(pool_obj) = pool.as_object() else {
            return Vec::new();
        };
        pool_obj
            .iter()
            .filter(|(_, entry)| has_iteration_history(entry))
            .map(|(id, _)| InstanceInfo {
                instance_id: id.clone(),
                instance_dir: prev_iteration_dir.join(id),
            })
            .collect()
    }

    /// This operator's content depends only on pool history, not on any
    /// file under the instance's (possibly nonexistent) previous-iteration
    /// directory, so it never skips for want of a `.problem`/`.traj` file.
    fn resolve_problem(&self, info: &InstanceInfo, _artifacts: &InstanceArtifactSet) -> Option<String> {
        Some(format!("Instance {} software engineering problem", info.instance_id))
    }

    async fn generate_content(
        &self,
        info: &InstanceInfo,
        problem: &str,
        _tra: &Value,
        pool: &Value,
        llm: &dyn LlmClient,
    ) -> Option<String> {
        let entry = pool.get(&info.instance_id)?;
        let history = super::sorted_iterations(entry);
        if history.is_empty() {
            return None;
        }

        let approaches: Vec<String> = history
            .iter()
            .map(|(n, summary)| {
                let approach = summary
                    .get("approach_summary")
                    .and_then(Value::as_str)
                    .unwrap_or("(no summary recorded)");
                format!("Iteration {n}: {approach}")
            })
            .collect();

        let system = "You are an AI assistant specialized in risk analysis for software engineering solutions. Given a problem statement and a history of attempted solution approaches, identify blind spots, untested assumptions, or divergent approaches worth considering. Respond with plain prose, no markdown headers, under 200 words.";
        let user = format!(
            "Problem:\n{problem}\n\nPrior approaches attempted:\n{}\n\nIdentify 2-3 specific blind spots, risks, or a divergent approach not yet tried.",
            approaches.join("\n")
        );

        let content = match llm.complete(system, &user, TEMPERATURE, MAX_TOKENS).await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => FALLBACK.to_string(),
        };

        Some(enforce_word_budget(&content, MAX_WORDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discover_skips_entries_with_only_problem_key() {
        let op = RiskSummaryOperator;
        let pool = json!({
            "a": {"problem": "p"},
            "b": {"problem": "p", "1": {"approach_summary": "x"}},
        });
        let found = op.discover(Path::new("/tmp/prev"), &pool);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instance_id, "b");
    }

    #[test]
    fn resolve_problem_ignores_filesystem_presence() {
        let op = RiskSummaryOperator;
        let info = InstanceInfo {
            instance_id: "b".to_string(),
            instance_dir: "/nonexistent/iteration_0/b".into(),
        };
        let artifacts = InstanceArtifactSet::default();
        let problem = op.resolve_problem(&info, &artifacts).unwrap();
        assert_eq!(problem, "Instance b software engineering problem");
    }
}
