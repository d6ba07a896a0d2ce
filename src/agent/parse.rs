//! Lenient parsing of LLM responses into structured output.
//!
//! Models wrap JSON in code fences, surround it with prose, or leave trailing
//! commas behind. Each repair is tried in turn until one parses.

use serde_json::Value;

use crate::envelope::AgentOutput;

/// Parse `text` into an output map.
///
/// Non-object JSON values are wrapped as `{"result": value}`.
pub fn parse_lenient(text: &str) -> Result<AgentOutput, String> {
    let value = parse_value(text)?;
    Ok(match value {
        Value::Object(map) => map.into_iter().collect(),
        other => {
            let mut out = AgentOutput::new();
            out.insert("result".to_string(), other);
            out
        }
    })
}

/// Output used when a response cannot be parsed at all.
pub fn unparsed_output(text: &str, error: &str) -> AgentOutput {
    let mut out = AgentOutput::new();
    out.insert("response".to_string(), Value::String(text.to_string()));
    out.insert("parse_error".to_string(), Value::String(error.to_string()));
    out
}

fn parse_value(text: &str) -> Result<Value, String> {
    let trimmed = strip_code_fence(text.trim());
    if trimmed.is_empty() {
        return Err("empty response".to_string());
    }

    let first_err = match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => return Ok(v),
        Err(e) => e.to_string(),
    };

    let candidate = extract_balanced(trimmed, '{', '}')
        .or_else(|| extract_balanced(trimmed, '[', ']'))
        .unwrap_or(trimmed);

    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return Ok(v);
    }
    let repaired = strip_trailing_commas(candidate);
    serde_json::from_str::<Value>(&repaired).map_err(|_| first_err)
}

/// Remove a surrounding ```json ... ``` fence if present.
fn strip_code_fence(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    // Skip the language tag up to end of line.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// First balanced `open..close` span, ignoring delimiters inside strings.
fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop commas that directly precede `}` or `]` (outside strings).
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}
