//! Response Parser
//!
//! Turns raw model text into JSON: strip a code-fence wrapper, try a strict
//! parse, fall back to `repair_json`, and if both fail log where the text
//! broke and return the strict parser's error.

use std::sync::OnceLock;

use regex::Regex;

use super::repair::repair_json;
use crate::utils::error::{AppError, AppResult};

/// Characters of context logged on each side of a parse error
const ERROR_WINDOW: usize = 60;

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```$").ok())
        .as_ref()
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    match fence_regex()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
    {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Narrow prose-wrapped output to its outermost JSON object or array.
fn json_candidate(text: &str) -> &str {
    if text.starts_with('{') || text.starts_with('[') {
        return text;
    }
    let start = text.find(|c: char| c == '{' || c == '[');
    let end = text.rfind(|c: char| c == '}' || c == ']');
    match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        (Some(start), _) => &text[start..],
        _ => text,
    }
}

/// Parse model output as JSON, repairing it if the strict parse fails.
pub fn parse_json_response(raw: &str) -> AppResult<serde_json::Value> {
    parse_with_repair(raw, repair_json)
}

fn parse_with_repair<F>(raw: &str, repair: F) -> AppResult<serde_json::Value>
where
    F: FnOnce(&str) -> String,
{
    let stripped = strip_code_fences(raw);

    let original_err = match serde_json::from_str(stripped) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let candidate = json_candidate(stripped);
    let repaired = repair(candidate);
    match serde_json::from_str(&repaired) {
        Ok(value) => {
            tracing::debug!(
                error = %original_err,
                "Model output parsed after JSON repair"
            );
            Ok(value)
        }
        Err(repair_err) => {
            tracing::warn!(
                error = %original_err,
                repair_error = %repair_err,
                context = %error_window(stripped, original_err.line(), original_err.column()),
                "Model output is not valid JSON"
            );
            Err(AppError::Serialization(original_err))
        }
    }
}

/// Text around a 1-based line/column position, for diagnostics.
pub fn error_window(text: &str, line: usize, column: usize) -> String {
    let mut offset = 0;
    for (i, l) in text.split('\n').enumerate() {
        if i + 1 == line {
            offset += column.saturating_sub(1).min(l.len());
            break;
        }
        offset += l.len() + 1;
    }
    let offset = offset.min(text.len());

    let mut start = offset.saturating_sub(ERROR_WINDOW);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + ERROR_WINDOW).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    format!("...{}...", &text[start..end])
}
