//! Ingestion adapters. Upstream producers disagree on field names and value
//! types for metrics and ratings; everything is mapped onto one canonical
//! shape here so the rest of the crate never sniffs payloads.

use serde::de::{Deserialize, DeserializeOwned, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use crate::models::{Rating, StepMetrics, MAX_SCORE, MIN_SCORE};

// Flat key, then `tokens.{input,output}`, then the OpenAI-style spelling.
const INPUT_TOKEN_KEYS: (&str, &str, &str) = ("input_tokens", "input", "prompt_tokens");
const OUTPUT_TOKEN_KEYS: (&str, &str, &str) = ("output_tokens", "output", "completion_tokens");
const COST_KEYS: &[&str] = &["total_cost_usd", "cost"];

impl StepMetrics {
    pub fn from_value(value: &Value) -> StepMetrics {
        let Some(obj) = value.as_object() else {
            return StepMetrics::default();
        };

        let input_tokens = token_count(obj, INPUT_TOKEN_KEYS);
        let output_tokens = token_count(obj, OUTPUT_TOKEN_KEYS);
        let cost_usd = first_present(obj, COST_KEYS).map(parse_float).unwrap_or(0.0);
        let latency = obj.get("latency").and_then(parse_latency);

        let provider = non_empty_str(obj.get("provider"));
        let model = non_empty_str(obj.get("model"));

        let mut extra = Map::new();
        for (key, val) in obj {
            if !is_canonical_key(key) {
                extra.insert(key.clone(), val.clone());
            }
        }

        StepMetrics { input_tokens, output_tokens, cost_usd, latency, provider, model, extra }
    }

    pub fn to_value(&self) -> Value {
        let mut out = self.extra.clone();
        out.insert("input_tokens".into(), Value::from(self.input_tokens));
        out.insert("output_tokens".into(), Value::from(self.output_tokens));
        out.insert(
            "total_cost_usd".into(),
            Number::from_f64(self.cost_usd).map(Value::Number).unwrap_or(Value::from(0)),
        );
        if let Some(latency) = self.latency.and_then(Number::from_f64) {
            out.insert("latency".into(), Value::Number(latency));
        }
        if let Some(provider) = &self.provider {
            out.insert("provider".into(), Value::String(provider.clone()));
        }
        if let Some(model) = &self.model {
            out.insert("model".into(), Value::String(model.clone()));
        }
        Value::Object(out)
    }
}

impl Serialize for StepMetrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StepMetrics {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(StepMetrics::from_value(&value))
    }
}

fn is_canonical_key(key: &str) -> bool {
    COST_KEYS.contains(&key)
        || matches!(
            key,
            "input_tokens"
                | "prompt_tokens"
                | "output_tokens"
                | "completion_tokens"
                | "tokens"
                | "latency"
                | "provider"
                | "model"
        )
}

/// First non-zero count among the spellings; zero only when all are.
fn token_count(obj: &Map<String, Value>, (flat, nested_key, alias): (&str, &str, &str)) -> u64 {
    [
        first_present(obj, &[flat]),
        nested(obj, "tokens", nested_key),
        first_present(obj, &[alias]),
    ]
    .into_iter()
    .flatten()
    .map(parse_count)
    .find(|&n| n > 0)
    .unwrap_or(0)
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| !v.is_null())
}

fn nested<'a>(obj: &'a Map<String, Value>, outer: &str, inner: &str) -> Option<&'a Value> {
    obj.get(outer)?.get(inner).filter(|v| !v.is_null())
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_float(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite()).unwrap_or(0.0)
}

/// Token counts: unparseable or negative values count as zero, fractions are
/// truncated.
fn parse_count(value: &Value) -> u64 {
    if let Some(n) = value.as_u64() {
        return n;
    }
    let f = parse_float(value);
    if f > 0.0 {
        f.trunc() as u64
    } else {
        0
    }
}

/// Latency in seconds: a number, or a string carrying a trailing `s` unit.
pub fn parse_latency(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('s').trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Ratings arrive as objects, bare integers (legacy rows) or JSON-encoded
/// strings of either. Anything that yields no usable field is `None`.
pub fn rating_from_value(value: &Value) -> Option<Rating> {
    match value {
        Value::Null => None,
        Value::Number(_) => score(value).map(|overall| Rating {
            overall: Some(overall),
            ..Default::default()
        }),
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s.trim()).ok()?;
            if parsed.is_string() {
                return None;
            }
            rating_from_value(&parsed)
        }
        Value::Object(obj) => {
            let overall = obj.get("overall").and_then(score);
            let parameters: BTreeMap<String, u8> = obj
                .get("parameters")
                .and_then(Value::as_object)
                .map(|params| {
                    params
                        .iter()
                        .filter_map(|(name, v)| score(v).map(|s| (name.clone(), s)))
                        .collect()
                })
                .unwrap_or_default();
            let review = non_empty_str(obj.get("review"));
            let rating = Rating { overall, parameters, review };
            if rating.is_empty() {
                None
            } else {
                Some(rating)
            }
        }
        _ => None,
    }
}

fn score(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (MIN_SCORE..=MAX_SCORE).contains(&n).then_some(n as u8)
}

pub fn deserialize_rating<'de, D>(deserializer: D) -> Result<Option<Rating>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(rating_from_value))
}

/// Treats an explicit `null` the same as a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metrics_flat_and_nested_tokens() {
        let flat = StepMetrics::from_value(&json!({"input_tokens": 3, "output_tokens": "2"}));
        assert_eq!((flat.input_tokens, flat.output_tokens), (3, 2));

        let nested = StepMetrics::from_value(&json!({"tokens": {"input": 10, "output": 5}}));
        assert_eq!((nested.input_tokens, nested.output_tokens), (10, 5));

        let openai = StepMetrics::from_value(&json!({"prompt_tokens": 7, "completion_tokens": 1}));
        assert_eq!((openai.input_tokens, openai.output_tokens), (7, 1));

        let both = StepMetrics::from_value(&json!({"tokens": {"input": 4}, "prompt_tokens": 9}));
        assert_eq!(both.input_tokens, 4);
    }

    #[test]
    fn test_zero_flat_tokens_fall_through() {
        let m = StepMetrics::from_value(&json!({
            "input_tokens": 0,
            "output_tokens": 0,
            "tokens": {"input": 12},
            "completion_tokens": 6
        }));
        assert_eq!((m.input_tokens, m.output_tokens), (12, 6));

        let m = StepMetrics::from_value(&json!({"input_tokens": 0, "tokens": {"input": 0}}));
        assert_eq!(m.input_tokens, 0);
    }

    #[test]
    fn test_metrics_cost_spellings() {
        assert_eq!(StepMetrics::from_value(&json!({"total_cost_usd": 0.25})).cost_usd, 0.25);
        assert_eq!(StepMetrics::from_value(&json!({"cost": "0.5"})).cost_usd, 0.5);
        assert_eq!(StepMetrics::from_value(&json!({"cost": "free"})).cost_usd, 0.0);
    }

    #[test]
    fn test_metrics_unparseable_tokens_are_zero() {
        let m = StepMetrics::from_value(&json!({"input_tokens": "lots", "output_tokens": -4}));
        assert_eq!((m.input_tokens, m.output_tokens), (0, 0));
    }

    #[test]
    fn test_latency_forms() {
        assert_eq!(parse_latency(&json!("1.5s")), Some(1.5));
        assert_eq!(parse_latency(&json!(2.25)), Some(2.25));
        assert_eq!(parse_latency(&json!(" 3 s ")), Some(3.0));
        assert_eq!(parse_latency(&json!("fast")), None);
    }

    #[test]
    fn test_metrics_extra_keys_survive_round_trip() {
        let m = StepMetrics::from_value(&json!({
            "input_tokens": 1,
            "timestamp": "2025-01-01 00:00:00",
            "event_id": "e1"
        }));
        let v = m.to_value();
        assert_eq!(v["timestamp"], json!("2025-01-01 00:00:00"));
        assert_eq!(v["event_id"], json!("e1"));
        assert_eq!(v["input_tokens"], json!(1));
    }

    #[test]
    fn test_rating_shapes() {
        assert_eq!(rating_from_value(&json!(8)).unwrap().overall, Some(8));
        assert_eq!(rating_from_value(&json!("6")).unwrap().overall, Some(6));
        let r = rating_from_value(&json!("{\"overall\": 9, \"review\": \"ok\"}")).unwrap();
        assert_eq!(r.overall, Some(9));
        assert_eq!(r.review.as_deref(), Some("ok"));
        assert!(rating_from_value(&json!({})).is_none());
        assert!(rating_from_value(&json!("not json")).is_none());
    }

    #[test]
    fn test_rating_drops_out_of_range_scores() {
        let r = rating_from_value(&json!({"overall": 42, "parameters": {"a": 5, "b": 0}})).unwrap();
        assert_eq!(r.overall, None);
        assert_eq!(r.parameters.len(), 1);
        assert_eq!(r.parameters.get("a"), Some(&5));
    }
}
