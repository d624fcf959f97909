//! Locating the patch JSON inside a model reply
//!
//! Models wrap their answer in fences, in prose, or both, and prose often
//! carries bracketed fragments of its own (`line [4]`, `{x}`). Every JSON
//! value in the reply is a candidate; the first one shaped like a reply wins.

use serde_json::Value;

/// Best JSON candidate in `text`.
///
/// Prefers the first reply-shaped value (see [`is_reply_shaped`]). Falls
/// back to the first JSON value of any shape, so the caller can say what
/// was wrong with it. `None` when the reply holds no JSON at all.
pub fn reply_json(text: &str) -> Option<Value> {
    let mut fallback = None;
    for value in candidates(text) {
        if is_reply_shaped(&value) {
            return Some(value);
        }
        fallback.get_or_insert(value);
    }
    fallback
}

/// An array of objects, or an object whose values are all objects
pub fn is_reply_shaped(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(Value::is_object),
        Value::Object(map) => !map.is_empty() && map.values().all(Value::is_object),
        _ => false,
    }
}

/// JSON values in reading priority: fenced blocks, the whole reply, then
/// every balanced `[..]` / `{..}` span in order of appearance.
fn candidates(text: &str) -> impl Iterator<Item = Value> + '_ {
    fenced_blocks(text)
        .chain(std::iter::once(text.trim()))
        .filter_map(|block| serde_json::from_str(block).ok())
        .chain(embedded_spans(text).filter_map(|span| serde_json::from_str(span).ok()))
}

/// Bodies of ``` fences, info string dropped. An unclosed fence runs to the
/// end of the text.
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    text.split("```").skip(1).step_by(2).map(|body| {
        let body = body.trim_start_matches([' ', '\t']);
        match body.find('\n') {
            // First line is an info string like `json` unless it already
            // starts the payload
            Some(newline) if !body.starts_with(['[', '{']) => body[newline + 1..].trim(),
            _ => body.trim(),
        }
    })
}

fn embedded_spans(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|(_, c)| matches!(c, '[' | '{'))
        .filter_map(|(start, _)| balanced_span(&text[start..]))
}

/// Shortest prefix of `text` (which starts with a bracket) whose brackets
/// balance, ignoring brackets inside JSON strings
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..idx + c.len_utf8()]);
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
    fn test_bare_array() {
        let json = reply_json(r#"[{"operation": "Delete", "line": 2}]"#).unwrap();
        assert_eq!(json[0]["line"], 2);
    }

    #[test]
    fn test_json_fence_with_prose() {
        let text = "Here is the fix:\n\n```json\n[{\"operation\": \"Replace\", \"line\": 4, \"content\": \"x\"}]\n```\n\nThat should do it.";
        let json = reply_json(text).unwrap();
        assert_eq!(json[0]["operation"], "Replace");
    }

    #[test]
    fn test_unlabelled_and_unclosed_fences() {
        let json = reply_json("```\n{\"calc.py\": {\"changes\": []}}\n```").unwrap();
        assert!(json["calc.py"].is_object());

        let json = reply_json("```json\n[{\"operation\": \"Delete\", \"line\": 1}]").unwrap();
        assert_eq!(json[0]["operation"], "Delete");
    }

    #[test]
    fn test_skips_bracketed_prose_before_payload() {
        let text = r#"The bug is on line [4] of {calc.py}. Fix:
[{"operation": "Replace", "line": 4, "content": "    return a + b"}]"#;
        let json = reply_json(text).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["line"], 4);
    }

    #[test]
    fn test_skips_fence_of_other_shape() {
        let text = "Input was:\n```\n[1, 2]\n```\nPatch:\n```json\n[{\"operation\": \"Delete\", \"line\": 3}]\n```";
        let json = reply_json(text).unwrap();
        assert_eq!(json[0]["line"], 3);
    }

    #[test]
    fn test_brackets_inside_strings() {
        let text = r#"ok: [{"operation": "Replace", "line": 1, "content": "xs = [1, 2]  # }"}]"#;
        let json = reply_json(text).unwrap();
        assert_eq!(json[0]["content"], "xs = [1, 2]  # }");
    }

    #[test]
    fn test_falls_back_to_first_json_of_wrong_shape() {
        let json = reply_json("I would change line [4] but I am not sure").unwrap();
        assert_eq!(json, serde_json::json!([4]));
        assert!(!is_reply_shaped(&json));
    }

    #[test]
    fn test_no_json() {
        assert!(reply_json("This is just plain text with no JSON").is_none());
        assert!(reply_json("unbalanced ] then [ never closed").is_none());
    }

    #[test]
    fn test_reply_shape() {
        assert!(is_reply_shaped(&serde_json::json!([])));
        assert!(is_reply_shaped(&serde_json::json!([{"explanation": "x"}])));
        assert!(is_reply_shaped(&serde_json::json!({"files": {}})));
        assert!(!is_reply_shaped(&serde_json::json!({})));
        assert!(!is_reply_shaped(&serde_json::json!({"operation": "Delete", "line": 1})));
        assert!(!is_reply_shaped(&serde_json::json!(["a.rs"])));
    }
}
