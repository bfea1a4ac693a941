use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::path::resolve;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Replaces every `{{dotted.path}}` in `template` with the value found in
/// `payload`. Unresolved placeholders are left untouched.
pub fn render(template: &str, payload: &Value) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| {
            let path = &caps[1];
            match resolve(payload, path) {
                Some(value) if !path.is_empty() => stringify(value),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Display form of a resolved value.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}
