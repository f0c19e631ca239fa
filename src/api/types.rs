use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{ChainStep, ChainVersion, Rating, StepMetrics};
use crate::normalize;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessInputRequest<'a> {
    pub input: &'a str,
}

/// Chain payload from the live source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveChain {
    #[serde(default)]
    pub is_chain: bool,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub chain_name: Option<String>,
    #[serde(default, deserialize_with = "normalize::null_as_default")]
    pub events: Vec<ChainStep>,
    #[serde(default, deserialize_with = "normalize::null_as_default")]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub image_urls: Vec<String>,
    pub response_schema: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegenerateResponse {
    #[serde(default)]
    pub version_id: Option<String>,
    #[serde(default, alias = "response")]
    pub assistant_response: Option<Value>,
    #[serde(default)]
    pub metadata: Option<StepMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveChainVersionRequest {
    pub version_id: String,
    pub trace_id: String,
    pub chain_name: String,
    pub chain_events: Vec<ChainStep>,
    pub total_tokens_input: u64,
    pub total_tokens_output: u64,
    pub total_cost: f64,
    /// Chain-level ratings are retired; ratings live on steps.
    pub rating: Option<Rating>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateChainStepRatingRequest<'a> {
    pub version_id: &'a str,
    pub step_index: usize,
    pub rating: Option<&'a Rating>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainVersionsResponse {
    #[serde(default, deserialize_with = "normalize::null_as_default")]
    pub versions: Vec<ChainVersion>,
}

/// Models the server has credentials for, grouped by provider in the
/// order the server lists them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct ModelCatalog {
    pub providers: Vec<ProviderModels>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderModels {
    pub provider: String,
    pub models: Vec<String>,
}

impl From<Map<String, Value>> for ModelCatalog {
    fn from(map: Map<String, Value>) -> Self {
        let providers = map
            .into_iter()
            .map(|(provider, models)| ProviderModels {
                provider,
                models: match models {
                    Value::Array(items) => items
                        .into_iter()
                        .filter_map(|m| m.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                },
            })
            .collect();
        ModelCatalog { providers }
    }
}

impl ModelCatalog {
    pub fn is_empty(&self) -> bool {
        self.providers.iter().all(|p| p.models.is_empty())
    }

    pub fn models_for(&self, provider: &str) -> &[String] {
        self.providers
            .iter()
            .find(|p| p.provider == provider)
            .map(|p| p.models.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, provider: &str, model: &str) -> bool {
        self.models_for(provider).iter().any(|m| m == model)
    }

    /// `provider:model` picker values, the format `StepEdit::from_selection` reads.
    pub fn selections(&self) -> Vec<String> {
        self.providers
            .iter()
            .flat_map(|p| p.models.iter().map(move |m| format!("{}:{}", p.provider, m)))
            .collect()
    }
}

/// One row of the saved-chain listing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChainSummary {
    pub trace_id: String,
    #[serde(default)]
    pub chain_name: Option<String>,
    #[serde(default)]
    pub version_count: u64,
    /// Best overall score across the chain's versions.
    #[serde(default)]
    pub max_rating: Option<u8>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl ChainSummary {
    pub fn display_name(&self) -> &str {
        self.chain_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("Unnamed Chain")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainsResponse {
    #[serde(default, deserialize_with = "normalize::null_as_default")]
    pub chains: Vec<ChainSummary>,
}

/// `{success, message}` acknowledgement returned by write endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool { true }

/// Error body. FastAPI puts a string (or a list of validation errors) in
/// `detail`; write endpoints use `message`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        let detail = self.detail.and_then(|d| match d {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        });
        detail.or(self.message).filter(|m| !m.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Rate limited")]
    RateLimited,
}
