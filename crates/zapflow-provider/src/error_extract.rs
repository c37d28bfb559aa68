// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Best-effort extraction of a human-readable error message from the
//! provider's heterogeneous error-response shapes.
//!
//! The provider nests its message under several possible keys depending on
//! endpoint and failure mode. Extraction is an ordered chain of small probe
//! functions; the first non-empty result wins.

use serde_json::Value;

type Extractor = fn(&Value) -> Option<String>;

/// Probe order mirrors the provider's observed shapes: top-level `message`
/// string, top-level `message` array, top-level `error` string, then the
/// `response.message` / `response.error` nested variants.
const EXTRACTORS: &[Extractor] = &[
    message_string,
    message_array,
    error_string,
    response_message,
    response_error,
];

/// Extract a provider error message from a JSON error body, if any shape matches.
pub fn extract_provider_error(body: &Value) -> Option<String> {
    EXTRACTORS.iter().find_map(|extract| extract(body))
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn string_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn join_string_array(value: &Value) -> Option<String> {
    let parts: Vec<&str> = value.as_array()?.iter().filter_map(Value::as_str).collect();
    (!parts.is_empty()).then(|| parts.join(" | "))
}

fn message_string(body: &Value) -> Option<String> {
    string_at(body, "message").and_then(non_empty)
}

fn message_array(body: &Value) -> Option<String> {
    body.get("message").and_then(join_string_array)
}

fn error_string(body: &Value) -> Option<String> {
    string_at(body, "error").and_then(non_empty)
}

fn response_message(body: &Value) -> Option<String> {
    let response = body.get("response")?;
    string_at(response, "message")
        .and_then(non_empty)
        .or_else(|| response.get("message").and_then(join_string_array))
}

fn response_error(body: &Value) -> Option<String> {
    string_at(body.get("response")?, "error").and_then(non_empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_message_string_wins() {
        let body = json!({"message": "Instance not found", "error": "other"});
        assert_eq!(
            extract_provider_error(&body).as_deref(),
            Some("Instance not found")
        );
    }

    #[test]
    fn message_array_is_joined() {
        let body = json!({"message": ["name is required", "name is already in use"]});
        assert_eq!(
            extract_provider_error(&body).as_deref(),
            Some("name is required | name is already in use")
        );
    }

    #[test]
    fn blank_message_falls_through_to_error() {
        let body = json!({"message": "  ", "error": "Unauthorized"});
        assert_eq!(extract_provider_error(&body).as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn nested_response_message_is_found() {
        let body = json!({"status": 403, "response": {"message": "Forbidden"}});
        assert_eq!(extract_provider_error(&body).as_deref(), Some("Forbidden"));
    }

    #[test]
    fn nested_response_message_array_is_joined() {
        let body = json!({"response": {"message": ["a", "b"]}});
        assert_eq!(extract_provider_error(&body).as_deref(), Some("a | b"));
    }

    #[test]
    fn nested_response_error_is_last_resort() {
        let body = json!({"response": {"error": "boom"}});
        assert_eq!(extract_provider_error(&body).as_deref(), Some("boom"));
    }

    #[test]
    fn non_string_values_are_ignored() {
        let body = json!({"message": 42, "error": {"deep": true}});
        assert_eq!(extract_provider_error(&body), None);
        assert_eq!(extract_provider_error(&json!(null)), None);
        assert_eq!(extract_provider_error(&json!("plain string")), None);
    }
}
