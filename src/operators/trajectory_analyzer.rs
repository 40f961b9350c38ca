//! Characterizes the previous iteration's raw trace (step counts, tool
//! usage, tail of the assistant's own reasoning) and feeds that digest to an
//! LLM to synthesize a radically different cognitive framework for the next
//! attempt.

use super::{enforce_word_budget, InstanceInfo, Operator, OperatorFamily};
use crate::llm::LlmClient;
use async_trait::async_trait;
use serde_json::Value;

const STRATEGY_PREFIX: &str = "SOLUTION STRATEGY";
const RESPONSE_TRUNCATE_CHARS: usize = 200;
const TAIL_RESPONSES: usize = 3;
const MAX_WORDS: usize = 250;
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 500;

const FALLBACK: &str = "Adopt a systematic approach that begins with comprehensive problem space mapping rather than immediate code investigation. Start by establishing clear success criteria and testing boundaries, then proceed through iterative hypothesis formation and validation cycles. Focus on understanding the system's behavioral patterns through runtime observation and incremental experimentation rather than static analysis. This methodology emphasizes empirical validation over theoretical assumptions, allowing for rapid course correction when approaches prove ineffective.";

pub struct TrajectoryAnalyzerOperator;

fn role_of(turn: &Value) -> &str {
    turn.get("role").and_then(Value::as_str).unwrap_or("")
}

fn content_of(turn: &Value) -> &str {
    turn.get("content").and_then(Value::as_str).unwrap_or("")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

fn uses_tools(history: &[Value]) -> bool {
    history.iter().any(|turn| {
        turn.get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| !calls.is_empty())
            .unwrap_or(false)
    })
}

#[async_trait]
impl Operator for TrajectoryAnalyzerOperator {
    fn name(&self) -> &'static str {
        "trajectory-analyzer"
    }

    fn family(&self) -> OperatorFamily {
        OperatorFamily::Template
    }

    fn strategy_prefix(&self) -> &'static str {
        STRATEGY_PREFIX
    }

    async fn generate_content(
        &self,
        _info: &InstanceInfo,
        problem: &str,
        tra: &Value,
        _pool: &Value,
        llm: &dyn LlmClient,
    ) -> Option<String> {
        let history = tra.get("history")?.as_array()?;
        if history.is_empty() {
            return None;
        }

        let total = history.len();
        let assistant_steps = history.iter().filter(|t| role_of(t) == "assistant").count();
        let user_steps = history.iter().filter(|t| role_of(t) == "user").count();
        let tool_usage = uses_tools(history);

        let tail: Vec<String> = history
            .iter()
            .filter(|t| role_of(t) == "assistant")
            .rev()
            .take(TAIL_RESPONSES)
            .map(|t| truncate_chars(content_of(t), RESPONSE_TRUNCATE_CHARS))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let mut analysis = format!(
            "This trajectory contained {total} total steps ({assistant_steps} assistant actions, {user_steps} user/observation steps). Tool usage was {} during execution.\n\nLast assistant reasoning steps:\n",
            if tool_usage { "observed" } else { "not observed" }
        );
        for (i, response) in tail.iter().enumerate() {
            analysis.push_str(&format!("{}. {response}\n", i + 1));
        }
        let analysis = analysis.trim_end();

        let system = "You are an expert software engineering strategy consultant specializing in innovative problem-solving. Given a problem and a trajectory analysis from a previous attempt, generate a fundamentally different strategy that leverages novel investigation paradigms, approaches the problem from an unconventional angle, and follows a distinct logical progression. Your strategy must be architecturally dissimilar to avoid the same limitations and blind spots. Respond with plain prose, no markdown headers or bullet points, under 250 words, emphasizing the cognitive framework rather than code specifics.";
        let user = format!(
            "PROBLEM:\n{problem}\n\nTRAJECTORY ANALYSIS:\n{analysis}\n\nGenerate a radically divergent solution strategy."
        );

        let content = match llm.complete(system, &user, TEMPERATURE, MAX_TOKENS).await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => FALLBACK.to_string(),
        };

        Some(enforce_word_budget(&content, MAX_WORDS))
    }
}
