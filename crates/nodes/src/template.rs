//! Context lookups and `{{path}}` placeholder rendering.
//!
//! Paths are dot-separated; a segment that parses as an integer indexes
//! into an array.  A string that consists of a single placeholder is
//! replaced by the referenced JSON value itself, so numbers and objects keep
//! their type.  Placeholders inside longer strings are spliced in as text,
//! and missing values render as the empty string.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex"))
}

/// Resolve a dotted path against the execution context.
pub fn lookup<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render every string inside `value`, recursively.
pub fn render(value: &Value, context: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => render_str(s, context),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// The path of `s` when `s` is exactly one placeholder and nothing else.
fn whole_placeholder(s: &str) -> Option<&str> {
    let caps = placeholder().captures(s)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 || whole.end() != s.len() {
        return None;
    }
    caps.get(1).map(|m| m.as_str())
}

/// True when `s` will be replaced by a context value of any JSON type.
pub fn is_whole_placeholder(s: &str) -> bool {
    whole_placeholder(s).is_some()
}

fn render_str(s: &str, context: &Map<String, Value>) -> Value {
    if let Some(path) = whole_placeholder(s) {
        return lookup(context, path).cloned().unwrap_or(Value::Null);
    }

    let re = placeholder();

    let rendered = re.replace_all(s, |caps: &regex::Captures<'_>| {
        match lookup(context, &caps[1]) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    });
    Value::String(rendered.into_owned())
}
