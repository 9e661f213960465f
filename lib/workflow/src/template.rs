//! `{{path}}` placeholder substitution for action parameters.

use crate::condition;
use serde_json::{Map, Value as JsonValue};

/// Replaces `{{trigger.x}}` and `{{context.x}}` placeholders in a string.
///
/// Single pass: substituted text is not scanned again. Placeholders that
/// do not resolve are left as written. Strings are inserted bare; other
/// values as JSON.
#[must_use]
pub fn render(template: &str, scope: &JsonValue) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };

        let path = after_open[..close].trim();
        match lookup(scope, path) {
            Some(JsonValue::String(s)) => out.push_str(s),
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(scope: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let root = path.split('.').next()?;
    if root != "trigger" && root != "context" {
        return None;
    }
    condition::resolve(scope, path).filter(|value| !value.is_null())
}

/// Renders every string inside a parameter map, recursing into arrays and
/// objects.
#[must_use]
pub fn render_parameters(parameters: &Map<String, JsonValue>, scope: &JsonValue) -> Map<String, JsonValue> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), render_value(value, scope)))
        .collect()
}

fn render_value(value: &JsonValue, scope: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(render(s, scope)),
        JsonValue::Array(items) => items.iter().map(|item| render_value(item, scope)).collect(),
        JsonValue::Object(map) => JsonValue::Object(render_parameters(map, scope)),
        other => other.clone(),
    }
}
