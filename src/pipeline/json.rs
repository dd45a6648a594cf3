//! Deterministic repair of JSON returned by the LLM.
//!
//! Models asked for "ONLY a JSON array" still wrap it in ```json fences, add a
//! sentence before it, use typographic quotes, or leave a trailing comma.
//! [`parse_json`] first parses the fence-stripped value as is, and only runs
//! [`repair_json`] when that fails. The raw response is kept in the
//! [`ParseError`] when the repaired text still does not parse.

use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\n?(.*?)\n?[ \t]*```").unwrap());

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[\]}])").unwrap());

/// Apply all repair rules in order.
///
/// 1. Take the body of the first code fence, if any
/// 2. Cut to the outermost `[...]` or `{...}`
/// 3. Turn typographic quotes used as string delimiters into ASCII quotes
/// 4. Drop trailing commas before `]` / `}`
pub fn repair_json(raw: &str) -> String {
    let s = extract_value(raw);
    let s = normalise_quotes(&s);
    RE_TRAILING_COMMA.replace_all(&s, "$1").into_owned()
}

/// Deserialize `raw`, repairing it only if the extracted value does not
/// parse as it stands.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    if let Ok(value) = serde_json::from_str(&extract_value(raw)) {
        return Ok(value);
    }
    let repaired = repair_json(raw);
    serde_json::from_str(&repaired).map_err(|e| ParseError {
        detail: e.to_string(),
        raw: raw.to_string(),
    })
}

fn extract_value(raw: &str) -> String {
    outermost_value(&strip_fences(raw)).to_string()
}

fn strip_fences(input: &str) -> String {
    match RE_FENCE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

const OPEN_QUOTE: char = '\u{201C}';
const CLOSE_QUOTE: char = '\u{201D}';

/// Replace typographic quotes that open or close a string. Typographic
/// quotes inside an ASCII-delimited string are content and stay as they are.
fn normalise_quotes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    // Delimiter of the string being scanned, if inside one.
    let mut open: Option<char> = None;
    let mut escaped = false;
    for ch in input.chars() {
        let Some(delim) = open else {
            match ch {
                '"' => open = Some('"'),
                OPEN_QUOTE | CLOSE_QUOTE => open = Some(OPEN_QUOTE),
                _ => {}
            }
            out.push(if ch == OPEN_QUOTE || ch == CLOSE_QUOTE { '"' } else { ch });
            continue;
        };
        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }
        match ch {
            '\\' => {
                escaped = true;
                out.push(ch);
            }
            '"' if delim == '"' => {
                open = None;
                out.push('"');
            }
            // A bare ASCII quote inside a typographic string is content.
            '"' => out.push_str("\\\""),
            OPEN_QUOTE | CLOSE_QUOTE if delim == OPEN_QUOTE => {
                open = None;
                out.push('"');
            }
            _ => out.push(ch),
        }
    }
    out
}

/// The span from the first `[` or `{` to the last matching closer.
fn outermost_value(input: &str) -> &str {
    let Some(start) = input.find(['[', '{']) else {
        return input.trim();
    };
    let closer = if input[start..].starts_with('[') { ']' } else { '}' };
    match input.rfind(closer) {
        Some(end) if end > start => &input[start..=end],
        _ => input[start..].trim(),
    }
}
