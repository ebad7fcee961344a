//! Contextual JSON parse-error diagnostics, following the line/column
//! snippet shape used elsewhere in the stack for surfacing malformed
//! upstream bodies.

use serde::de::DeserializeOwned;

/// Parses `body` into `T`, attaching a line/column snippet to the error
/// message when parsing fails so operators can see exactly what upstream
/// sent without re-fetching.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> anyhow::Result<T> {
    serde_json::from_str(body).map_err(|err| {
        let line = err.line();
        let column = err.column();
        let snippet = build_error_snippet(body, line, column, 120);
        anyhow::anyhow!("{err} at line {line}, column {column}\nSnippet:\n{snippet}")
    })
}

/// Builds a single-line snippet centered on `(line, column)` with a `^`
/// indicator beneath the offending character, truncated to `max_len`.
pub fn build_error_snippet(body: &str, line: usize, column: usize, max_len: usize) -> String {
    let Some(target_line) = body.lines().nth(line.saturating_sub(1)) else {
        return String::from("<no line available>");
    };

    let col_idx = column.saturating_sub(1).min(target_line.len());
    let half = max_len / 2;
    let start = col_idx.saturating_sub(half);
    let end = (col_idx + half).min(target_line.len());

    let window = &target_line[start..end];
    let caret_offset = col_idx - start;
    let indicator = format!("{}^", " ".repeat(caret_offset));

    format!("{window}\n{indicator}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Simple {
        #[allow(dead_code)]
        a: i32,
    }

    #[test]
    fn parses_valid_json() {
        let result: Simple = parse_json_with_context(r#"{"a": 1}"#).unwrap();
        assert_eq!(result.a, 1);
    }

    #[test]
    fn invalid_json_includes_snippet() {
        let result = parse_json_with_context::<Simple>(r#"{"a": }"#);
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("line"));
        assert!(message.contains("Snippet"));
    }

    #[test]
    fn snippet_indicator_points_at_column() {
        let snippet = build_error_snippet("abcdefg", 1, 4, 20);
        let mut lines = snippet.lines();
        let window = lines.next().unwrap();
        let indicator = lines.next().unwrap();
        assert_eq!(window, "abcdefg");
        assert_eq!(indicator.len(), 4); // 3 spaces + caret, pointing at 'd'
    }
}
