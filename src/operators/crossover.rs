//! Synthesizes a combined strategy from an instance's two most recent
//! recorded iteration summaries.

use super::{enforce_word_budget, InstanceInfo, Operator, OperatorFamily};
use crate::llm::LlmClient;
use async_trait::async_trait;
use serde_json::Value;

const STRATEGY_PREFIX: &str = "CROSSOVER STRATEGY";
const MAX_WORDS: usize = 250;
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 500;

const FALLBACK: &str = "Combine the stronger analytical method from the first approach with the more focused implementation technique from the second approach. Start by re-establishing the root cause identified earlier, then apply the more targeted changes from the later attempt, validating behavior after each intermediate step rather than only at the end.";

pub struct CrossoverOperator;

#[async_trait]
impl Operator for CrossoverOperator {
    fn name(&self) -> &'static str {
        "crossover"
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
        let entry = pool.get(&info.instance_id)?;
        let history = super::sorted_iterations(entry);
        if history.len() < 2 {
            return None;
        }
        let (first_n, first) = history[history.len() - 2];
        let (second_n, second) = history[history.len() - 1];

        let describe = |summary: &Value| {
            let approach = summary
                .get("approach_summary")
                .and_then(Value::as_str)
                .unwrap_or("(no summary recorded)");
            let strategy = summary
                .get("strategy")
                .and_then(Value::as_str)
                .unwrap_or("(no strategy recorded)");
            format!("approach: {approach}; strategy: {strategy}")
        };

        let system = "You are an AI assistant specialized in synthesizing software engineering solution strategies. Given a problem and two previously attempted approaches, combine the strongest elements of both into one coherent strategy. Respond with plain prose, no markdown headers, under 250 words.";
        let user = format!(
            "Problem:\n{problem}\n\nFirst approach (iteration {first_n}): {}\nSecond approach (iteration {second_n}): {}\n\nSynthesize a combined strategy drawing on the strengths of both.",
            describe(first),
            describe(second)
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
    use crate::llm::LlmError;
    use serde_json::json;

    struct FailingClient;
    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _: &str, _: &str, _: f32, _: u32) -> Result<String, LlmError> {
            Err(LlmError::Api("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn requires_at_least_two_iterations() {
        let op = CrossoverOperator;
        let info = InstanceInfo {
            instance_id: "a".to_string(),
            instance_dir: "/tmp/irrelevant".into(),
        };
        let pool = json!({"a": {"problem": "p", "1": {"approach_summary": "x"}}});
        assert!(op
            .generate_content(&info, "p", &Value::Null, &pool, &FailingClient)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn selects_last_two_by_numeric_key_not_insertion_order() {
        let op = CrossoverOperator;
        let info = InstanceInfo {
            instance_id: "a".to_string(),
            instance_dir: "/tmp/irrelevant".into(),
        };
        let pool = json!({"a": {
            "problem": "p",
            "10": {"approach_summary": "tenth"},
            "2": {"approach_summary": "second"},
            "3": {"approach_summary": "third"},
        }});
        let result = op
            .generate_content(&info, "p", &Value::Null, &pool, &FailingClient)
            .await
            .unwrap();
        assert!(result.contains("stronger analytical method"));
    }
}
