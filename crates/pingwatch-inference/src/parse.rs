//! Lenient parsing of model output.
//!
//! Providers are told to return JSON only, but real responses come wrapped
//! in prose, fences, or content-block arrays. Be permissive on input,
//! strict on the typed result.

use serde_json::{Map, Value};

/// Typed verdict extracted from a clip-analysis response.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub label: String,
    pub summary: String,
    pub confidence: f64,
    pub provider: String,
    pub model: Option<String>,
    pub should_notify: bool,
    pub alert_reason: String,
    pub matched_rules: Vec<String>,
    pub detected_entities: Vec<String>,
    pub detected_actions: Vec<String>,
    pub raw_response: Option<String>,
}

/// Message content can be a plain string or an array of content blocks;
/// collect every text block, falling back to the raw JSON rendering.
pub fn extract_response_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let segments: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            if segments.is_empty() {
                content.to_string()
            } else {
                segments.join("\n")
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Accept pure JSON or JSON embedded in prose (outermost `{...}`).
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Some(map);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Collect non-empty strings from a JSON list; anything else is dropped.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn truncated(text: &str, limit: usize) -> String {
    if text.is_empty() {
        return "No response".to_string();
    }
    text.chars().take(limit).collect()
}

/// Parse a clip-analysis reply.
///
/// Defaults when fields are missing: `notify` follows whether any rule
/// matched; `reason` states the notify decision; unparseable responses
/// degrade to an `unknown` verdict carrying the raw text.
pub fn parse_inference_response(response_text: &str) -> InferenceResult {
    let Some(data) = extract_json_object(response_text) else {
        return InferenceResult {
            label: "unknown".to_string(),
            summary: truncated(response_text, 500),
            confidence: 0.5,
            provider: "unknown".to_string(),
            model: None,
            should_notify: false,
            alert_reason: "No alert criteria matched".to_string(),
            matched_rules: Vec::new(),
            detected_entities: Vec::new(),
            detected_actions: Vec::new(),
            raw_response: Some(response_text.to_string()),
        };
    };

    let matched_rules = string_list(data.get("matched_rules"));
    let detected_entities = string_list(data.get("detected_entities"));
    let detected_actions = string_list(data.get("detected_actions"));

    let should_notify = match data.get("notify") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => !matched_rules.is_empty(),
    };

    let alert_reason = data
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| {
            if should_notify {
                "Matched configured alert criteria".to_string()
            } else {
                "No alert criteria matched".to_string()
            }
        });

    let summary = data
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| truncated(response_text, 500));

    let label = data
        .get("label")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| "unknown".to_string());

    let confidence = match data.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.5),
        _ => 0.5,
    };

    InferenceResult {
        label,
        summary,
        confidence,
        provider: "unknown".to_string(),
        model: None,
        should_notify,
        alert_reason,
        matched_rules,
        detected_entities,
        detected_actions,
        raw_response: Some(response_text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_pure_json() {
        let result = parse_inference_response(
            r#"{"label": "person", "summary": "Someone at the door", "confidence": 0.9,
                "notify": true, "reason": "person detected",
                "matched_rules": ["person near door"]}"#,
        );
        assert_eq!(result.label, "person");
        assert_eq!(result.summary, "Someone at the door");
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert!(result.should_notify);
        assert_eq!(result.alert_reason, "person detected");
        assert_eq!(result.matched_rules, vec!["person near door"]);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let result = parse_inference_response(
            "Sure! Here is the analysis:\n{\"label\": \"animal\", \"summary\": \"A cat\", \
             \"confidence\": 0.7}\nHope this helps.",
        );
        assert_eq!(result.label, "animal");
        assert_eq!(result.summary, "A cat");
    }

    #[test]
    fn invalid_json_degrades_to_unknown() {
        let raw = "the model rambled on without any braces";
        let result = parse_inference_response(raw);
        assert_eq!(result.label, "unknown");
        assert_eq!(result.summary, raw);
        assert!((result.confidence - 0.5).abs() < 1e-9);
        assert!(!result.should_notify);
        assert_eq!(result.raw_response.as_deref(), Some(raw));
    }

    #[test]
    fn empty_response_reads_as_no_response() {
        let result = parse_inference_response("");
        assert_eq!(result.summary, "No response");
        assert_eq!(result.label, "unknown");
    }

    #[test]
    fn missing_notify_follows_matched_rules() {
        let with_rules = parse_inference_response(
            r#"{"label": "person", "summary": "s", "confidence": 0.8,
                "matched_rules": ["rule"]}"#,
        );
        assert!(with_rules.should_notify);
        assert_eq!(with_rules.alert_reason, "Matched configured alert criteria");

        let without = parse_inference_response(
            r#"{"label": "clear", "summary": "s", "confidence": 0.8}"#,
        );
        assert!(!without.should_notify);
        assert_eq!(without.alert_reason, "No alert criteria matched");
    }

    #[test]
    fn numeric_notify_is_truthy() {
        let result =
            parse_inference_response(r#"{"label": "x", "summary": "s", "confidence": 1, "notify": 1}"#);
        assert!(result.should_notify);
        let zero =
            parse_inference_response(r#"{"label": "x", "summary": "s", "confidence": 1, "notify": 0}"#);
        assert!(!zero.should_notify);
    }

    #[test]
    fn list_fields_drop_non_strings() {
        let result = parse_inference_response(
            r#"{"label": "x", "summary": "s", "confidence": 1,
                "detected_entities": ["person", 42, "", "  dog  "]}"#,
        );
        assert_eq!(result.detected_entities, vec!["person", "dog"]);
    }

    #[test]
    fn content_blocks_concatenate_text() {
        let content = json!([
            {"type": "text", "text": "part one"},
            {"type": "image_url", "image_url": {"url": "data:..."}},
            {"type": "text", "text": "part two"},
        ]);
        assert_eq!(extract_response_text(&content), "part one\npart two");
        assert_eq!(extract_response_text(&json!("plain")), "plain");
    }
}
