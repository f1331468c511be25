use serde_json::Value;

const FENCE: &str = "```";

/// Pulls a JSON document out of raw model text.
///
/// Order: the whole text, every fenced block (```json or bare), then the
/// outermost `{...}` span, then the outermost `[...]` span. The error carries
/// the strict-parse failure, which is what a caller wants to see.
pub fn extract_structured(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("response was empty".to_string());
    }

    let strict_error = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    for block in fenced_blocks(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Ok(value);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(span) = outermost_span(trimmed, open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(span) {
                return Ok(value);
            }
        }
    }

    Err(format!("response is not valid JSON: {strict_error}"))
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(FENCE) {
        let after_open = &rest[start + FENCE.len()..];
        // Language tag runs to the end of the opening line.
        let body = match after_open.find('\n') {
            Some(newline) => &after_open[newline + 1..],
            None => break,
        };
        match body.find(FENCE) {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + FENCE.len()..];
            }
            None => {
                // Unterminated fence: models sometimes stop mid-block.
                blocks.push(body);
                break;
            }
        }
    }

    blocks
}

fn outermost_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::extract_structured;

    #[test]
    fn strict_json_wins_first() {
        let value = extract_structured("  {\"a\": 1}  ").expect("plain json");
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn fenced_block_with_language_tag_is_extracted() {
        let text = "Here you go:\n```json\n{\"category\": \"billing\", \"urgent\": true}\n```\nThanks!";
        let value = extract_structured(text).expect("fenced json");
        assert_eq!(value, json!({"category": "billing", "urgent": true}));
    }

    #[test]
    fn later_fenced_block_is_tried_when_first_is_not_json() {
        let text = "```text\nnot json\n```\nand\n```\n[1, 2]\n```";
        assert_eq!(extract_structured(text).expect("second block"), json!([1, 2]));
    }

    #[test]
    fn brace_span_inside_prose_is_accepted() {
        let text = "Sure! The answer is {\"ok\": false} as requested.";
        assert_eq!(extract_structured(text).expect("span"), json!({"ok": false}));
    }

    #[test]
    fn unparseable_text_reports_strict_error() {
        let error = extract_structured("I cannot help with that.").expect_err("no json");
        assert!(error.starts_with("response is not valid JSON"), "{error}");

        let error = extract_structured("   ").expect_err("empty");
        assert_eq!(error, "response was empty");
    }
}
