//! Locates and parses a JSON payload embedded in free-form model output.
//!
//! Models are inconsistent about wrapping structured output in a fenced
//! block, so two strategies are tried in order:
//!   1. every fenced code block (```json … ``` or untagged), trimmed
//!   2. the first balanced top-level `{ … }` in the raw text that parses;
//!      a stray brace in the prose does not hide a later object

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ExtractionError;

fn fenced_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Optional language tag on the opening fence, body is non-greedy.
        Regex::new(r"```[A-Za-z0-9_+\-]*[ \t]*\r?\n?([\s\S]*?)```").unwrap()
    })
}

/// Parse the embedded payload of `raw` into `T`.
pub fn extract<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractionError> {
    for cap in fenced_block_regex().captures_iter(raw) {
        let inner = cap.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        match serde_json::from_str::<T>(inner) {
            Ok(v) => return Ok(v),
            Err(e) => debug!(error = %e, "fenced block did not parse"),
        }
    }

    for (start, _) in raw.match_indices('{') {
        let Some(candidate) = balanced_object_at(raw, start) else {
            continue;
        };
        match serde_json::from_str::<T>(candidate) {
            Ok(v) => return Ok(v),
            Err(e) => debug!(offset = start, error = %e, "embedded object did not parse"),
        }
    }

    Err(ExtractionError { raw: raw.to_string() })
}

/// Untyped form of [`extract`].
pub fn extract_value(raw: &str) -> Result<serde_json::Value, ExtractionError> {
    extract(raw)
}

/// Slice from the `{` at `start` to its matching `}`, ignoring braces inside
/// string literals. `None` if it never closes.
fn balanced_object_at(content: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&content[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Design {
        title: String,
        colors: Vec<String>,
    }

    #[test]
    fn test_fenced_json_block() {
        let raw = "Sure!\n```json\n{\"a\":1}\n```\nAnything else?";
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_untagged_fence() {
        let raw = "```\n  {\"a\": 1}  \n```";
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_bare_object_in_prose() {
        let raw = "Here is data: {\"a\":1} done";
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_no_braces_is_extraction_error() {
        let err = extract_value("I could not analyse that image.").unwrap_err();
        assert_eq!(err.raw, "I could not analyse that image.");
    }

    #[test]
    fn test_unparseable_fence_then_prose_object() {
        let raw = "```json\n{oops\n```\nactually: {\"a\": 2}";
        // `{oops` never closes, so the scan moves on to the next brace.
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 2}));

        let raw = "```text\nnot json\n```\nresult {\"a\": 2} end";
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 2}));
    }

    #[test]
    fn test_later_fence_used_when_first_is_not_json() {
        let raw = "```bash\nls -la\n```\n```json\n{\"a\": 3}\n```";
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 3}));
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let raw = r#"Result: {"title": "use {braces} \"carefully\"", "colors": ["red"]} trailing }"#;
        let design: Design = extract(raw).unwrap();
        assert_eq!(design.title, r#"use {braces} "carefully""#);
        assert_eq!(design.colors, vec!["red".to_string()]);
    }

    #[test]
    fn test_nested_objects_take_outermost_pair() {
        let raw = "x {\"outer\": {\"inner\": {\"v\": true}}} y";
        assert_eq!(
            extract_value(raw).unwrap(),
            json!({"outer": {"inner": {"v": true}}})
        );
    }

    #[test]
    fn test_typed_mismatch_is_extraction_error() {
        let raw = "```json\n{\"title\": 5}\n```";
        assert!(extract::<Design>(raw).is_err());
    }

    #[test]
    fn test_unclosed_brace_in_prose_is_skipped() {
        let raw = "Note: {see below\nHere is data: {\"a\":1} done";
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_balanced_placeholder_before_payload_is_skipped() {
        let raw = "Replace {name} in the template. Result: {\"a\":1}";
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_inner_object_used_when_outer_does_not_parse() {
        let raw = "wrapper {not json {\"a\": 4} tail}";
        assert_eq!(extract_value(raw).unwrap(), json!({"a": 4}));
    }

    #[test]
    fn test_unbalanced_object_is_extraction_error() {
        assert!(extract_value("partial {\"a\": 1").is_err());
    }
}
