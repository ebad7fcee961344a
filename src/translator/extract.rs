//! Pulls a JSON object out of a loosely-formatted LLM completion.
//!
//! Tried in order: the whole response as-is, a ` ```json ` fence, a bare
//! ` ``` ` fence, then a brace/bracket span scan. Each candidate is verified
//! to parse before being accepted.

use serde_json::Value as JsonValue;

/// Returns the first candidate substring of `text` that parses as JSON, or
/// `None` if nothing in it does.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if is_json(trimmed) {
        return Some(trimmed.to_string());
    }

    if let Some(candidate) = extract_fenced(text, "```json") {
        if is_json(&candidate) {
            return Some(candidate);
        }
    }

    if let Some(candidate) = extract_fenced(text, "```") {
        if is_json(&candidate) {
            return Some(candidate);
        }
    }

    if let Some(candidate) = extract_span(text) {
        if is_json(&candidate) {
            return Some(candidate);
        }
    }

    None
}

fn is_json(candidate: &str) -> bool {
    serde_json::from_str::<JsonValue>(candidate).is_ok()
}

fn extract_fenced(text: &str, fence_open: &str) -> Option<String> {
    let start = text.find(fence_open)?;
    let after_open = start + fence_open.len();
    let rest = &text[after_open..];
    let end = rest.find("```")?;
    let body = rest[..end].trim();
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

/// Scans for the first balanced `{...}` or `[...]` span, tracking a bracket
/// stack so mixed nesting (`{"a": [1, {"b": 2}]}`) resolves correctly, and
/// skipping bracket characters that appear inside quoted strings.
fn extract_span(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|&c| c == '{' || c == '[')?;

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &c) in chars.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop().is_none() {
                    return None;
                }
                if stack.is_empty() {
                    return Some(chars[start..=offset].iter().collect());
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

    #[test]
    fn plain_json_passes_through() {
        let input = r#"{"filter": {"city": "Austin"}}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn json_fence_is_extracted() {
        let input = "Here:\n```json\n{\"filter\": {}}\n```\nDone.";
        assert_eq!(extract_json(input).unwrap(), r#"{"filter": {}}"#);
    }

    #[test]
    fn bare_fence_is_extracted() {
        let input = "```\n{\"filter\": {}}\n```";
        assert_eq!(extract_json(input).unwrap(), r#"{"filter": {}}"#);
    }

    #[test]
    fn brace_span_is_scanned_out_of_prose() {
        let input = "The answer you want is {\"filter\": {\"city\": \"Austin\"}} and nothing else.";
        let extracted = extract_json(input).unwrap();
        assert_eq!(extracted, r#"{"filter": {"city": "Austin"}}"#);
    }

    #[test]
    fn nested_mixed_brackets_resolve_correctly() {
        let input = r#"{"filter": {"OR": [{"city": "Austin"}, {"city": "Dallas"}]}}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let input = r#"{"filter": {"name": "contains a } brace"}}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn no_json_anywhere_returns_none() {
        assert!(extract_json("I don't understand the request.").is_none());
    }

    #[test]
    fn empty_input_returns_none() {
        assert!(extract_json("").is_none());
    }
}
