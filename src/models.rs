use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::aggregate::{aggregate, infer_provider, ChainMetadata};
use crate::normalize;
use crate::validation::ValidationError;

pub type ID = String;

pub const MIN_SCORE: i64 = 1;
pub const MAX_SCORE: i64 = 10;

/// Per-step rating. Every field is optional; a rating with nothing filled in
/// is treated as "no rating" and never stored.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Rating {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub overall: Option<u8>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub parameters: BTreeMap<String, u8>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub review: Option<String>,
}

impl Rating {
  /// Builds a rating from user input, rejecting scores outside 1-10.
  /// Returns `Ok(None)` when no field carries a value.
  pub fn from_input(
    overall: Option<i64>,
    parameters: impl IntoIterator<Item = (String, i64)>,
    review: Option<&str>,
  ) -> Result<Option<Rating>, ValidationError> {
    let overall = overall.map(|v| check_score("overall", v)).transpose()?;

    let mut params = BTreeMap::new();
    for (name, value) in parameters {
      let name = name.trim().to_string();
      if name.is_empty() {
        continue;
      }
      let score = check_score(&name, value)?;
      params.insert(name, score);
    }

    let review = review
      .map(str::trim)
      .filter(|r| !r.is_empty())
      .map(str::to_string);

    let rating = Rating { overall, parameters: params, review };
    Ok(if rating.is_empty() { None } else { Some(rating) })
  }

  pub fn is_empty(&self) -> bool {
    self.overall.is_none() && self.parameters.is_empty() && self.review.is_none()
  }

  /// Re-checks scores on a rating built directly rather than via `from_input`.
  pub fn check(&self) -> Result<(), ValidationError> {
    if let Some(overall) = self.overall {
      check_score("overall", i64::from(overall))?;
    }
    for (name, score) in &self.parameters {
      check_score(name, i64::from(*score))?;
    }
    Ok(())
  }
}

fn check_score(field: &str, value: i64) -> Result<u8, ValidationError> {
  if (MIN_SCORE..=MAX_SCORE).contains(&value) {
    Ok(value as u8)
  } else {
    Err(ValidationError::RatingOutOfRange { field: field.to_string(), value })
  }
}

/// Canonical metrics for one step. Built from whatever shape the producer
/// sent (see `normalize`), serialized back in the flat shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepMetrics {
  pub input_tokens: u64,
  pub output_tokens: u64,
  pub cost_usd: f64,
  /// Seconds.
  pub latency: Option<f64>,
  pub provider: Option<String>,
  pub model: Option<String>,
  /// Keys we don't interpret (timestamps, event ids, ...). Carried through.
  pub extra: Map<String, Value>,
}

/// One prompt/response pair. A step's index is its position in
/// `WorkingChain::steps`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ChainStep {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default)]
  pub user_prompt: String,
  #[serde(default, rename = "user_images", deserialize_with = "normalize::null_as_default")]
  pub images: Vec<String>,
  #[serde(default)]
  pub assistant_response: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metrics: Option<StepMetrics>,
  #[serde(
    default,
    deserialize_with = "normalize::deserialize_rating",
    skip_serializing_if = "Option::is_none"
  )]
  pub rating: Option<Rating>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl ChainStep {
  /// Empty generation step, used when a regeneration run produces a step the
  /// working copy did not have yet.
  pub fn generation(index: usize) -> Self {
    let mut extra = Map::new();
    extra.insert("type".into(), Value::String("generation".into()));
    ChainStep {
      name: Some(format!("prompt_{}", index + 1)),
      extra,
      ..Default::default()
    }
  }

  /// `null`, a missing value and an empty string all count as "not generated".
  pub fn has_response(&self) -> bool {
    match &self.assistant_response {
      None | Some(Value::Null) => false,
      Some(Value::String(s)) => !s.is_empty(),
      Some(_) => true,
    }
  }

  pub fn display_name(&self, index: usize) -> String {
    self.name.clone().unwrap_or_else(|| format!("prompt_{}", index + 1))
  }
}

/// Persisted, immutable snapshot of a chain.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChainVersion {
  pub version_id: ID,
  pub trace_id: ID,
  #[serde(default)]
  pub chain_name: Option<String>,
  #[serde(default, rename = "chain_events", deserialize_with = "normalize::null_as_default")]
  pub steps: Vec<ChainStep>,
  #[serde(default)]
  pub total_tokens_input: Option<u64>,
  #[serde(default)]
  pub total_tokens_output: Option<u64>,
  #[serde(default)]
  pub total_cost: Option<f64>,
  #[serde(default, deserialize_with = "normalize::deserialize_rating")]
  pub rating: Option<Rating>,
  #[serde(default, deserialize_with = "normalize::null_as_default")]
  pub metadata: Map<String, Value>,
  #[serde(default)]
  pub created_at: Option<String>,
}

impl ChainVersion {
  pub fn created_at_parsed(&self) -> Option<OffsetDateTime> {
    self.created_at.as_deref().and_then(parse_timestamp)
  }
}

/// The in-memory chain a session edits. `metadata` is derived from `steps`
/// and refreshed after every mutation that touches metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingChain {
  pub trace_id: ID,
  pub chain_name: Option<String>,
  pub steps: Vec<ChainStep>,
  pub metadata: ChainMetadata,
  /// Free-form metadata received with the chain (timestamps, names, ...).
  pub source_metadata: Map<String, Value>,
}

impl WorkingChain {
  pub fn new(trace_id: impl Into<ID>, chain_name: Option<String>, steps: Vec<ChainStep>) -> Self {
    let mut chain = WorkingChain {
      trace_id: trace_id.into(),
      chain_name,
      steps,
      metadata: ChainMetadata::default(),
      source_metadata: Map::new(),
    };
    chain.refresh_metadata();
    chain
  }

  pub fn from_version(version: &ChainVersion) -> Self {
    let mut chain = WorkingChain::new(
      version.trace_id.clone(),
      version.chain_name.clone(),
      version.steps.clone(),
    );
    chain.source_metadata = version.metadata.clone();
    chain
  }

  pub fn refresh_metadata(&mut self) {
    self.metadata = aggregate(&self.steps);
  }

  /// Metadata object as the API stores it: source keys, overwritten by the
  /// fresh aggregate, with identity fields filled in when absent.
  pub fn metadata_value(&self) -> Value {
    let mut out = self.source_metadata.clone();
    self.metadata.merge_into(&mut out);
    out.entry("trace_id").or_insert_with(|| Value::String(self.trace_id.clone()));
    if let Some(name) = &self.chain_name {
      out.entry("chain_name").or_insert_with(|| Value::String(name.clone()));
    }
    out.entry("timestamp").or_insert_with(|| Value::String(now_iso()));
    Value::Object(out)
  }
}

/// Edit state for one step of a regeneration run.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct StepEdit {
  pub prompt: String,
  pub provider: String,
  pub model: String,
  #[serde(default)]
  pub images: Vec<String>,
  #[serde(default)]
  pub response_schema: Option<String>,
}

impl StepEdit {
  /// Edit state reproducing a step as it currently is.
  pub fn from_step(step: &ChainStep) -> Self {
    let model = step.model.clone().unwrap_or_default();
    let provider = step
      .provider
      .clone()
      .or_else(|| step.metrics.as_ref().and_then(|m| m.provider.clone()))
      .or_else(|| infer_provider(&model).map(str::to_string))
      .unwrap_or_default();
    StepEdit {
      prompt: step.user_prompt.clone(),
      provider,
      model,
      images: step.images.clone(),
      response_schema: None,
    }
  }

  /// Model pickers hand back `provider:model`; everything after the first
  /// colon is the model id (which may itself contain colons).
  pub fn from_selection(prompt: impl Into<String>, provider: &str, model_value: &str) -> Self {
    let model = match model_value.split_once(':') {
      Some((_, model)) => model,
      None => model_value,
    };
    StepEdit {
      prompt: prompt.into(),
      provider: provider.to_string(),
      model: model.to_string(),
      ..Default::default()
    }
  }
}

pub fn now_iso() -> String {
  let t = OffsetDateTime::now_utc();
  t.format(&time::format_description::well_known::Rfc3339)
    .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn unix_millis() -> i128 {
  OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

/// Accepts RFC 3339 and SQLite's `CURRENT_TIMESTAMP` shape (UTC).
pub fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
  let s = s.trim();
  if let Ok(t) = OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339) {
    return Some(t);
  }
  PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
    .or_else(|_| {
      PrimitiveDateTime::parse(s, format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"))
    })
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}

pub fn new_id() -> ID {
  uuid::Uuid::new_v4().to_string()
}
