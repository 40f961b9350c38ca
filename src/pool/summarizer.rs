//! Prompt construction, response parsing, and the deterministic fallback for
//! the per-iteration trajectory summary stored in the pool.

use crate::llm::LlmClient;
use serde_json::{json, Value};

/// Temperature and token budget used for every summarization call,
/// regardless of the caller's own model defaults — summarization favors
/// consistency over creativity.
const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 2000;

const REQUIRED_FIELDS: [&str; 9] = [
    "approach_summary",
    "modified_files",
    "key_changes",
    "strategy",
    "specific_techniques",
    "tools_used",
    "reasoning_pattern",
    "assumptions_made",
    "components_touched",
];

fn system_prompt() -> &'static str {
    "You are an AI assistant specialized in analyzing software engineering trajectories. Your task is to analyze execution trajectories from SWE-agent runs and provide structured insights about the solution approach.\n\n\
You will be provided with:\n\
1. A trajectory file (.tra) in JSON format containing the agent's step-by-step execution\n\
2. A prediction file (.pred) containing the final result\n\n\
Your goal is to extract and summarize the core solution strategy, techniques, and approaches used in this trajectory.\n\n\
Return your analysis in JSON format with the following fields:\n\
- approach_summary: A concise summary of the main approach used in this solution\n\
- modified_files: List of files that were modified during execution\n\
- key_changes: Description of the most important code changes made\n\
- strategy: The core solution strategy at an abstract level\n\
- specific_techniques: Specific techniques or methods used in this solution\n\
- tools_used: Tools and commands heavily utilized during execution\n\
- reasoning_pattern: The problem-solving pattern observed in the trajectory\n\
- assumptions_made: Key assumptions made during the solution process\n\
- components_touched: Main components, functions, or modules that were modified\n\n\
Focus on extracting actionable insights about the solution methodology rather than implementation details."
}

fn user_prompt(trajectory_content: &str, patch_content: &str) -> String {
    format!(
        "Please analyze the following SWE-agent trajectory and provide insights about the solution approach.\n\n\
Trajectory Data (.tra file):\n{trajectory_content}\n\n\
Prediction Result (.patch/.pred file):\n{patch_content}\n\n\
Please provide your analysis in the JSON format specified in the system prompt."
    )
}

/// Extracts a JSON object from `raw`, tolerating surrounding prose: if the
/// trimmed response isn't itself valid JSON, the substring between the first
/// `{` and the last `}` is parsed instead.
fn parse_response(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return Some(value);
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

/// A response is valid only if it parsed with no `error` field and carries
/// all nine required summary fields.
fn is_valid_summary(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.contains_key("error") {
        return false;
    }
    REQUIRED_FIELDS.iter().all(|field| obj.contains_key(*field))
}

/// Calls the LLM and returns a validated summary, or `None` if the call
/// failed, the response wasn't parseable JSON, or required fields were
/// missing — any of which sends the caller to [`fallback_summary`].
pub async fn summarize_with_llm(
    client: &dyn LlmClient,
    trajectory_content: &str,
    patch_content: &str,
) -> Option<Value> {
    let response = client
        .complete(
            system_prompt(),
            &user_prompt(trajectory_content, patch_content),
            SUMMARY_TEMPERATURE,
            SUMMARY_MAX_TOKENS,
        )
        .await
        .ok()?;
    let parsed = parse_response(&response)?;
    is_valid_summary(&parsed).then_some(parsed)
}

/// Deterministic stub used when no LLM client is configured, or the LLM
/// call/parse failed. Derived only from line counts and the iteration
/// number, so it is reproducible and requires no network access.
pub fn fallback_summary(trajectory_content: &str, patch_content: &str, iteration: u32) -> Value {
    let trajectory_length = if trajectory_content.is_empty() {
        0
    } else {
        trajectory_content.split('\n').count()
    };
    let patch_length = patch_content.len();

    json!({
        "approach_summary": format!("Iteration {iteration} execution with {trajectory_length} trajectory steps"),
        "modified_files": ["unknown"],
        "key_changes": "Unable to analyze - LLM summarization failed",
        "strategy": format!("iteration_{iteration}_strategy"),
        "specific_techniques": ["automated_execution"],
        "tools_used": ["swe_agent"],
        "reasoning_pattern": "step_by_step_execution",
        "assumptions_made": ["standard_swe_agent_assumptions"],
        "components_touched": ["unknown_components"],
        "meta": {
            "is_fallback": true,
            "trajectory_length": trajectory_length,
            "patch_length": patch_length,
            "iteration": iteration,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direct_json() {
        let raw = r#"{"approach_summary": "x"}"#;
        assert_eq!(parse_response(raw).unwrap()["approach_summary"], "x");
    }

    #[test]
    fn extracts_json_surrounded_by_prose() {
        let raw = "Sure, here you go:\n{\"approach_summary\": \"x\"}\nHope that helps!";
        assert_eq!(parse_response(raw).unwrap()["approach_summary"], "x");
    }

    #[test]
    fn rejects_response_with_error_field() {
        let value = json!({"error": "no json found"});
        assert!(!is_valid_summary(&value));
    }

    #[test]
    fn rejects_response_missing_required_fields() {
        let value = json!({"approach_summary": "x"});
        assert!(!is_valid_summary(&value));
    }

    #[test]
    fn accepts_response_with_all_required_fields() {
        let value = json!({
            "approach_summary": "a", "modified_files": [], "key_changes": "a",
            "strategy": "a", "specific_techniques": [], "tools_used": [],
            "reasoning_pattern": "a", "assumptions_made": [], "components_touched": [],
        });
        assert!(is_valid_summary(&value));
    }

    #[test]
    fn fallback_summary_is_deterministic() {
        let a = fallback_summary("line1\nline2\nline3", "diff content", 2);
        let b = fallback_summary("line1\nline2\nline3", "diff content", 2);
        assert_eq!(a, b);
        assert_eq!(a["meta"]["is_fallback"], true);
        assert_eq!(a["meta"]["trajectory_length"], 3);
        assert_eq!(a["strategy"], "iteration_2_strategy");
    }
}
