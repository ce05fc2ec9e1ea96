pub mod anthropic;
pub mod perplexity;

pub use anthropic::AnthropicClient;
pub use perplexity::PerplexityClient;

use serde_json::Value;

/// Extract a JSON object from model output that may wrap it in prose or
/// code fences. Returns None when no parseable object is found.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_direct_json() {
        let value = extract_json(r#"{"signal": true, "reason": "breakout"}"#).unwrap();
        assert_eq!(value["signal"], true);
    }

    #[test]
    fn test_extract_wrapped_json() {
        let text = "Here is my answer:\n```json\n{\"action\": \"HOLD\"}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["action"], "HOLD");
    }

    #[test]
    fn test_extract_rejects_no_json() {
        assert!(extract_json("no structured output here").is_none());
        assert!(extract_json("}{").is_none());
    }
}
