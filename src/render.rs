//! Template rendering and variable extraction.
//!
//! Templates use a small placeholder syntax, parsed standalone so the
//! serving path never depends on a full template engine:
//!
//! - `{{ name }}` substitutes the HTML-escaped value of `name`.
//! - `{{ name|safe }}` substitutes the value raw.
//! - `{% if name %}` / `{% if not name %}` / `{% endif %}` tags are
//!   recognized by the variable extractor; the renderer strips the tags and
//!   keeps their body (conditionals are evaluated client-side).
//!
//! Rendering is a pure function of (template code, data): no I/O, no state.
//! Unknown placeholders render as the empty string.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Placeholder names the serving layer injects itself; never materialized
/// as template variable records.
pub const RESERVED_VARIABLES: [&str; 1] = ["snippet_id"];

static EXPR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\|\s*([A-Za-z_][A-Za-z0-9_]*)\s*)?\}\}")
        .unwrap()
});

static TAG_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%\s*(?:if|elif)\s+(?:not\s+)?([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{%.*?%\}").unwrap());

/// Escape a value for interpolation into HTML text content.
pub fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Extract the placeholder names referenced by template code.
///
/// Covers both `{{ name }}` expressions and `{% if name %}` tags, in order
/// of first appearance, deduplicated, with reserved names excluded.
pub fn extract_variables(code: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let expressions = EXPR_RE
        .captures_iter(code)
        .map(|cap| (cap.get(1).unwrap().start(), cap[1].to_string()));
    let tags = TAG_VAR_RE
        .captures_iter(code)
        .map(|cap| (cap.get(1).unwrap().start(), cap[1].to_string()));

    let mut references: Vec<(usize, String)> = expressions.chain(tags).collect();
    references.sort_by_key(|(pos, _)| *pos);

    for (_, name) in references {
        if RESERVED_VARIABLES.contains(&name.as_str()) {
            continue;
        }
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Render a single value for substitution. Strings pass through, numbers
/// and booleans use their display form, everything else is empty.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Expand template code with values from `data`.
///
/// Deterministic and side-effect free. Values are HTML-escaped unless the
/// placeholder carries the `safe` filter; placeholders with no matching key
/// render as the empty string.
pub fn render(code: &str, data: &Map<String, Value>) -> String {
    let stripped = TAG_RE.replace_all(code, "");
    EXPR_RE
        .replace_all(&stripped, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let raw = caps.get(2).is_some_and(|f| f.as_str() == "safe");
            match data.get(name) {
                Some(value) => {
                    let text = value_text(value);
                    if raw { text } else { html_escape(&text) }
                }
                None => String::new(),
            }
        })
        .into_owned()
}

/// Parse a data payload for rendering. Fails on unparseable JSON or a
/// non-object payload; this is the explicit error the preview path surfaces
/// as a 400, distinguishable from a successful-but-empty render.
pub fn parse_data(payload: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(err) => Err(err.to_string()),
    }
}
