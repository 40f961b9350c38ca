//! Transforms a raw `.traj` trace into the compressed `.tra` form operators
//! and the pool summarizer consume, plus token-count metadata for the
//! original trace.

use serde::Serialize;
use serde_json::{Map, Value};

const TRUNCATION_MARKER: &str = "... [TRUNCATED] ...";
const TRUNCATION_TRIGGER_LEN: usize = 350;
const MIN_TRUNCATABLE_LEN: usize = 300;
const MIN_SAVINGS_RATIO: f64 = 0.2;

/// The compressed trajectory document, serialized to `<id>.tra`.
#[derive(Debug, Serialize, PartialEq)]
pub struct TraDocument {
    #[serde(rename = "Trajectory")]
    pub trajectory: Vec<Value>,
}

/// Per-file statistics computed alongside compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraStats {
    pub total_tokens: usize,
    pub history_items: usize,
}

/// Compresses a `.traj` document (`{"history": [...]}`) into its `.tra` form.
///
/// Entries without a `role` are dropped entirely (rule 1); an entry that
/// retains nothing beyond `role` after field filtering is dropped too (rule
/// 6), so the result can be shorter than the input even before truncation is
/// considered.
pub fn compress_trajectory(traj: &Value) -> (TraDocument, TraStats) {
    let history = traj
        .get("history")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let history_items = history.len();
    let mut total_tokens = 0usize;
    let mut trajectory = Vec::with_capacity(history.len());

    for entry in &history {
        let Some(role) = entry.get("role").and_then(Value::as_str) else {
            continue;
        };

        let mut retained = Map::new();
        retained.insert("role".to_string(), Value::String(role.to_string()));

        if role == "assistant" {
            for field in ["thought", "action"] {
                if let Some(text) = non_empty_string(entry.get(field)) {
                    let text = truncate_field(&text);
                    total_tokens += count_tokens(&text);
                    retained.insert(field.to_string(), Value::String(text));
                }
            }
        } else {
            let content = extract_content(entry, role);
            if let Some(text) = content {
                if !text.is_empty() {
                    let text = truncate_field(&text);
                    total_tokens += count_tokens(&text);
                    retained.insert("content".to_string(), Value::String(text));
                }
            }
        }

        // rule 6: drop entries that retain nothing beyond `role`.
        if retained.len() > 1 {
            trajectory.push(Value::Object(retained));
        }
    }

    (
        TraDocument { trajectory },
        TraStats {
            total_tokens,
            history_items,
        },
    )
}

/// Flattens `role=tool` list-shaped content (`[{"type":"text","text":...}]`)
/// into a plain string; other roles read `content` directly as a string.
fn extract_content(entry: &Value, role: &str) -> Option<String> {
    let content = entry.get("content")?;
    if role == "tool" {
        if let Some(items) = content.as_array() {
            return items
                .iter()
                .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .and_then(|item| item.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }
    content.as_str().map(str::to_string)
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn count_tokens(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Applies rule 5's truncation: strings containing `str_replace_editor` or
/// longer than 350 bytes are candidates; the first/last caps are computed as
/// percentages of the original length, clamped to `[30, 150]` and `[30,
/// 100]` respectively, and truncation is applied only when it saves more
/// than 20% of bytes and the original is at least 300 bytes — otherwise the
/// original string passes through unchanged.
fn truncate_field(s: &str) -> String {
    let len = s.len();
    let is_candidate = s.contains("str_replace_editor") || len > TRUNCATION_TRIGGER_LEN;
    if !is_candidate || len < MIN_TRUNCATABLE_LEN {
        return s.to_string();
    }

    let first_cap = (len as f64 * 0.2).round() as usize;
    let first_cap = first_cap.clamp(30, 150);
    let last_cap = (len as f64 * 0.1).round() as usize;
    let last_cap = last_cap.clamp(30, 100);

    let truncated_len = first_cap + last_cap + TRUNCATION_MARKER.len();
    if truncated_len >= len {
        return s.to_string();
    }
    let savings = len - truncated_len;
    if (savings as f64) <= (len as f64) * MIN_SAVINGS_RATIO {
        return s.to_string();
    }

    let prefix = take_prefix_bytes(s, first_cap);
    let suffix = take_suffix_bytes(s, last_cap);
    format!("{prefix}{TRUNCATION_MARKER}{suffix}")
}

fn take_prefix_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn take_suffix_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_entries_without_role() {
        let traj = json!({"history": [{"content": "no role here"}]});
        let (doc, stats) = compress_trajectory(&traj);
        assert!(doc.trajectory.is_empty());
        assert_eq!(stats.history_items, 1);
    }

    #[test]
    fn keeps_only_thought_and_action_for_assistant() {
        let traj = json!({"history": [
            {"role": "assistant", "thought": "let's look", "action": "cat file.py", "content": "ignored"}
        ]});
        let (doc, _stats) = compress_trajectory(&traj);
        assert_eq!(doc.trajectory.len(), 1);
        let entry = doc.trajectory[0].as_object().unwrap();
        assert!(!entry.contains_key("content"));
        assert_eq!(entry["thought"], "let's look");
        assert_eq!(entry["action"], "cat file.py");
    }

    #[test]
    fn empty_thought_and_action_drop_the_entry() {
        let traj = json!({"history": [
            {"role": "assistant", "thought": "", "action": ""}
        ]});
        let (doc, _) = compress_trajectory(&traj);
        assert!(doc.trajectory.is_empty(), "compression monotonicity property");
    }

    #[test]
    fn flattens_tool_list_content() {
        let traj = json!({"history": [
            {"role": "tool", "content": [{"type": "text", "text": "file contents here"}]}
        ]});
        let (doc, _) = compress_trajectory(&traj);
        let entry = doc.trajectory[0].as_object().unwrap();
        assert_eq!(entry["content"], "file contents here");
    }

    #[test]
    fn keeps_plain_content_for_user_role() {
        let traj = json!({"history": [
            {"role": "user", "content": "please fix the bug"}
        ]});
        let (doc, _) = compress_trajectory(&traj);
        let entry = doc.trajectory[0].as_object().unwrap();
        assert_eq!(entry["content"], "please fix the bug");
    }

    #[test]
    fn truncates_long_strings_within_bounds() {
        let long = "x".repeat(1000);
        let truncated = truncate_field(&long);
        assert!(truncated.len() <= 150 + 100 + 19);
        assert!(truncated.contains("[TRUNCATED]"));
    }

    #[test]
    fn leaves_short_strings_untouched() {
        let short = "a short string under the threshold";
        assert_eq!(truncate_field(short), short);
    }

    #[test]
    fn does_not_truncate_when_under_300_bytes_even_if_marker_present() {
        let s = format!("uses str_replace_editor {}", "a".repeat(50));
        assert!(s.len() < 300);
        assert_eq!(truncate_field(&s), s);
    }

    #[test]
    fn token_counting_is_whitespace_based() {
        assert_eq!(count_tokens("one two  three"), 3);
    }
}
