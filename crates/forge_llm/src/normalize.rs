//! Reply normalization.
//!
//! Stage replies are expected to be one JSON value, sometimes wrapped in a
//! markdown code fence. Fence removal happens here and nowhere else.

use serde_json::Value;

use crate::error::{LlmError, LlmResult};

/// Remove one surrounding markdown code fence, if present.
///
/// The opening fence line may carry a language tag (```` ```json ````).
/// Text without a leading fence is returned trimmed and otherwise untouched.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    let body = match trimmed.find('\n') {
        Some(newline) => &trimmed[newline + 1..],
        None => &trimmed[3..],
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim()
}

/// Strip a fence and parse the remainder as JSON. An empty reply is `{}`.
pub fn parse_json_reply(text: &str) -> LlmResult<Value> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(body).map_err(|e| LlmError::MalformedJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json_untouched() {
        assert_eq!(strip_code_fence("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn test_fence_with_language_tag() {
        let reply = "```json\n{\"options\": []}\n```";
        assert_eq!(strip_code_fence(reply), "{\"options\": []}");
    }

    #[test]
    fn test_fence_without_closing_marker() {
        let reply = "```\n[1, 2, 3]";
        assert_eq!(parse_json_reply(reply).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_single_line_fence() {
        assert_eq!(strip_code_fence("```{\"x\":true}```"), "{\"x\":true}");
    }

    #[test]
    fn test_empty_reply_is_empty_object() {
        assert_eq!(parse_json_reply("   ").unwrap(), json!({}));
    }

    #[test]
    fn test_prose_is_malformed() {
        let err = parse_json_reply("Sure! Here are your options.").unwrap_err();
        assert!(matches!(err, LlmError::MalformedJson(_)));
        assert!(!err.is_transport());
    }
}
