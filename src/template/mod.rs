//! `{{{N}}}` / `{{{N[key.path]}}}` placeholders referencing earlier steps.
//!
//! Resolution never fails: anything that cannot be substituted stays in the
//! text exactly as written.

pub mod parser;

use serde_json::Value;

use crate::models::ChainStep;
use parser::{parse, PathSegment, Placeholder, Segment};

/// Replaces every placeholder that refers to a step strictly before
/// `current_step_index` which already has a response.
pub fn resolve(text: &str, current_step_index: usize, steps: &[ChainStep]) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in parse(text) {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Placeholder(p) => match substitute(&p, current_step_index, steps) {
                Some(value) => out.push_str(&value),
                None => out.push_str(p.raw),
            },
        }
    }
    out
}

/// Step numbers (1-based, as written) referenced by a prompt, in order of
/// first appearance.
pub fn references(text: &str) -> Vec<usize> {
    let mut out = Vec::new();
    for segment in parse(text) {
        if let Segment::Placeholder(p) = segment {
            if !out.contains(&p.step_number) {
                out.push(p.step_number);
            }
        }
    }
    out
}

/// References to the step itself or to later steps. These never resolve.
pub fn forward_references(text: &str, current_step_index: usize) -> Vec<usize> {
    references(text)
        .into_iter()
        .filter(|n| *n == 0 || n - 1 >= current_step_index)
        .collect()
}

fn substitute(p: &Placeholder<'_>, current_step_index: usize, steps: &[ChainStep]) -> Option<String> {
    let step_index = p.step_number.checked_sub(1)?;
    if step_index >= current_step_index {
        return None;
    }
    let step = steps.get(step_index).filter(|s| s.has_response())?;
    let response = step.assistant_response.as_ref()?;

    match &p.key_path {
        None => render(response, true, p),
        Some(path) => {
            let Some(value) = lookup(response, path) else {
                tracing::debug!(placeholder = p.raw, "key path not found in step response");
                return None;
            };
            render(value, false, p)
        }
    }
}

/// Plain member/index access. `null` anywhere along the path is a miss.
fn lookup<'a>(root: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut value = root;
    for segment in path {
        value = match (segment, value) {
            (PathSegment::Key(k), Value::Object(map)) => map.get(k),
            (PathSegment::Key(k), Value::Array(items)) => {
                k.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
            (PathSegment::Index(i), Value::Object(map)) => map.get(&i.to_string()),
            _ => None,
        }
        .filter(|v| !v.is_null())?;
    }
    Some(value)
}

fn render(value: &Value, whole_response: bool, p: &Placeholder<'_>) -> Option<String> {
    let rendered = match value {
        Value::String(s) => Ok(s.clone()),
        Value::Object(_) | Value::Array(_) if whole_response => serde_json::to_string_pretty(value),
        Value::Object(_) | Value::Array(_) => serde_json::to_string(value),
        other => Ok(other.to_string()),
    };
    rendered
        .map_err(|e| tracing::debug!(placeholder = p.raw, error = %e, "failed to render step response"))
        .ok()
}
