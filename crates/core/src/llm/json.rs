use crate::domain::contract::LlmDirectionReply;
use crate::domain::outcome::DirectionCall;
use anyhow::Context;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.split_once('\n').map(|(_, rest)| rest) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Parses an extraction reply into a validated direction call for `stage_id`.
pub fn parse_direction_call(text: &str, stage_id: &str) -> anyhow::Result<DirectionCall> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmDirectionReply>(&json_str)
        .with_context(|| format!("extraction reply is not valid direction JSON: {json_str}"))?;
    parsed.validate_and_into_call(stage_id)
}
