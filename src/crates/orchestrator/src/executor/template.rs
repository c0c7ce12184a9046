//! `{taskId.output}` references in prompts and tool params.

use super::result::{unavailable_placeholder, TaskResult};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static OUTPUT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_\-]+)\.output\}").unwrap());

/// Task ids referenced by a template, in order of appearance
pub fn referenced_ids(template: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in OUTPUT_REF.captures_iter(template) {
        let id = caps[1].to_string();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Substitute every reference with the referenced result's rendered text
///
/// Failed or unknown tasks render as the unavailable placeholder.
pub fn render_template(template: &str, completed: &HashMap<String, TaskResult>) -> String {
    OUTPUT_REF
        .replace_all(template, |caps: &Captures| match completed.get(&caps[1]) {
            Some(result) => result.rendered(),
            None => unavailable_placeholder(&caps[1]),
        })
        .into_owned()
}

/// Apply [`render_template`] to every string inside a JSON value
pub fn render_params(params: &Value, completed: &HashMap<String, TaskResult>) -> Value {
    match params {
        Value::String(s) => Value::String(render_template(s, completed)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_params(v, completed)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_params(v, completed)))
                .collect(),
        ),
        other => other.clone(),
    }
}
