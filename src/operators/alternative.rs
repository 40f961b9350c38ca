//! Proposes a different solution strategy from the instance's own most
//! recent recorded iteration summary.

use super::{enforce_word_budget, InstanceInfo, Operator, OperatorFamily};
use crate::llm::LlmClient;
use async_trait::async_trait;
use serde_json::Value;

const STRATEGY_PREFIX: &str = "ALTERNATIVE SOLUTION STRATEGY";
const MAX_WORDS: usize = 200;
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 400;

const FALLBACK: &str = "Try a more direct approach: focus on the specific error message, search for similar issues in the codebase, and make minimal targeted changes rather than broad modifications.";

pub struct AlternativeOperator;

#[async_trait]
impl Operator for AlternativeOperator {
    fn name(&self) -> &'static str {
        "alternative"
    }

    fn family(&self) -> OperatorFamily {
        OperatorFamily::Template
    }

    fn strategy_prefix(&self) -> &'static str {
        STRATEGY_PREFIX
    }

    async fn generate_content(
        &self,
        info: &InstanceInfo,
        problem: &str,
        _tra: &Value,
        pool: &Value,
        llm: &dyn LlmClient,
    ) -> Option<String> {
        // Keyed lookup into this instance's own entry, not the pool's
        // iteration order over all instances.
        let entry = pool.get(&info.instance_id)?;
        let history = super::sorted_iterations(entry);
        let (_, latest) = history.last()?;

        let strategy = latest
            .get("strategy")
            .and_then(Value::as_str)
            .unwrap_or("(no strategy recorded)");
        let mut approach = format!("Strategy: {strategy}");
        let failed = latest.get("strategy_status").and_then(Value::as_str) == Some("FAILED");
        if failed {
            let reason = latest
                .get("failure_reason")
                .and_then(Value::as_str)
                .unwrap_or("Unknown failure");
            approach.push_str(&format!("\nSTATUS: FAILED - {reason}"));
        }
        if let Some(summary) = latest.get("approach_summary").and_then(Value::as_str) {
            approach.push_str(&format!("\nApproach: {summary}"));
        }

        let mut system = "You are an expert software engineering strategist specializing in breakthrough problem-solving. Given a problem and a previously attempted approach, propose a genuinely different, architecturally dissimilar strategy rather than a minor variation.".to_string();
        if failed {
            system.push_str(" SPECIAL FOCUS: the previous approach failed, possibly due to cost limits or early termination, so prioritize more focused, direct approaches, faster problem identification, incremental validation, and minimal viable change strategies.");
        }
        system.push_str(" Respond with plain prose, no markdown headers, under 200 words.");
        let user = format!(
            "Problem:\n{problem}\n\nPreviously attempted approach:\n{approach}\n\nPropose an alternative solution strategy."
        );

        let content = match llm.complete(&system, &user, TEMPERATURE, MAX_TOKENS).await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => FALLBACK.to_string(),
        };

        Some(enforce_word_budget(&content, MAX_WORDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use serde_json::json;

    struct FailingClient;
    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _: &str, _: &str, _: f32, _: u32) -> Result<String, LlmError> {
            Err(LlmError::Api("boom".to_string()))
        }
    }

    struct RecordingClient {
        system_prompt: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl LlmClient for RecordingClient {
        async fn complete(
            &self,
            system: &str,
            _user: &str,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            *self.system_prompt.lock().unwrap() = Some(system.to_string());
            Ok("a fundamentally different, focused approach".to_string())
        }
    }

    #[tokio::test]
    async fn failed_status_still_calls_llm_with_failed_context() {
        let op = AlternativeOperator;
        let info = InstanceInfo {
            instance_id: "a".to_string(),
            instance_dir: "/tmp/irrelevant".into(),
        };
        let pool = json!({"a": {"problem": "p", "1": {
            "strategy_status": "FAILED",
            "failure_reason": "cost limit exceeded",
        }}});
        let client = RecordingClient {
            system_prompt: std::sync::Mutex::new(None),
        };
        let result = op
            .generate_content(&info, "p", &Value::Null, &pool, &client)
            .await
            .unwrap();
        assert_eq!(result, "a fundamentally different, focused approach");
        let system_prompt = client.system_prompt.lock().unwrap().clone().unwrap();
        assert!(system_prompt.contains("SPECIAL FOCUS"));
    }

    #[tokio::test]
    async fn failed_status_falls_back_only_if_llm_call_fails() {
        let op = AlternativeOperator;
        let info = InstanceInfo {
            instance_id: "a".to_string(),
            instance_dir: "/tmp/irrelevant".into(),
        };
        let pool = json!({"a": {"problem": "p", "1": {"strategy_status": "FAILED"}}});
        let result = op
            .generate_content(&info, "p", &Value::Null, &pool, &FailingClient)
            .await
            .unwrap();
        assert!(result.contains("more direct approach"));
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_fixed_string() {
        let op = AlternativeOperator;
        let info = InstanceInfo {
            instance_id: "a".to_string(),
            instance_dir: "/tmp/irrelevant".into(),
        };
        let pool = json!({"a": {"problem": "p", "1": {"approach_summary": "x", "strategy": "y"}}});
        let result = op
            .generate_content(&info, "p", &Value::Null, &pool, &FailingClient)
            .await
            .unwrap();
        assert_eq!(result, FALLBACK);
    }

    #[tokio::test]
    async fn missing_pool_entry_yields_none() {
        let op = AlternativeOperator;
        let info = InstanceInfo {
            instance_id: "missing".to_string(),
            instance_dir: "/tmp/irrelevant".into(),
        };
        let pool = json!({"a": {"problem": "p"}});
        assert!(op
            .generate_content(&info, "p", &Value::Null, &pool, &FailingClient)
            .await
            .is_none());
    }
}
