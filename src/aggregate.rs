use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::ChainStep;

/// Chain-level totals. Always computed from scratch from the step list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    /// Seconds.
    pub total_latency: f64,
    /// `total_latency` formatted as `"{:.2}s"`.
    pub latency: String,
    pub providers: Vec<String>,
    pub models: Vec<String>,
    pub event_count: usize,
}

impl ChainMetadata {
    /// Writes the aggregate into an API metadata object, overwriting the
    /// derived keys and leaving every other key alone.
    pub fn merge_into(&self, out: &mut Map<String, Value>) {
        out.insert(
            "total_tokens".into(),
            json!({ "input": self.total_input_tokens, "output": self.total_output_tokens }),
        );
        out.insert("input_tokens".into(), json!(self.total_input_tokens));
        out.insert("output_tokens".into(), json!(self.total_output_tokens));
        out.insert("total_cost_usd".into(), json!(self.total_cost));
        out.insert("total_cost".into(), json!(self.total_cost));
        out.insert("latency".into(), json!(self.latency));
        out.insert("total_latency".into(), json!(self.total_latency));
        out.insert("providers".into(), json!(self.providers));
        out.insert("models".into(), json!(self.models));
        out.insert("event_count".into(), json!(self.event_count));
    }
}

/// Maps a model id onto the provider that serves it, by substring.
pub fn infer_provider(model: &str) -> Option<&'static str> {
    if model.contains("gpt") {
        Some("openai")
    } else if model.contains("claude") {
        Some("anthropic")
    } else if model.contains("gemini") {
        Some("gemini")
    } else {
        None
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

pub fn aggregate(steps: &[ChainStep]) -> ChainMetadata {
    let mut out = ChainMetadata {
        event_count: steps.len(),
        ..Default::default()
    };

    // Steps without metrics have not been generated and contribute nothing.
    for (step, metrics) in steps.iter().filter_map(|s| s.metrics.as_ref().map(|m| (s, m))) {
        out.total_input_tokens += metrics.input_tokens;
        out.total_output_tokens += metrics.output_tokens;
        out.total_cost += metrics.cost_usd;
        out.total_latency += metrics.latency.unwrap_or(0.0);

        if let Some(model) = step.model.as_deref().filter(|m| !m.is_empty()) {
            push_unique(&mut out.models, model);
            if let Some(provider) = infer_provider(model) {
                push_unique(&mut out.providers, provider);
            }
        }
        if let Some(provider) = metrics.provider.as_deref() {
            push_unique(&mut out.providers, provider);
        }
    }

    out.latency = format!("{:.2}s", out.total_latency);
    out
}

/// Mean overall score across steps that have one.
pub fn average_rating(steps: &[ChainStep]) -> Option<f64> {
    let scores: Vec<f64> = steps
        .iter()
        .filter_map(|s| s.rating.as_ref()?.overall)
        .map(f64::from)
        .collect();
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

pub fn rated_steps(steps: &[ChainStep]) -> usize {
    steps.iter().filter(|s| s.rating.is_some()).count()
}
