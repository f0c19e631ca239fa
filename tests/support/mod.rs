#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use chainlab::api::*;
use chainlab::models::*;

/// In-memory stand-in for the chain API. Records every call; regenerate
/// responses can be scripted, otherwise the prompt is echoed back.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

#[derive(Default)]
pub struct State {
    pub live: Option<LiveChain>,
    pub live_error: Option<ApiError>,
    pub responses: VecDeque<Result<Value, ApiError>>,
    pub regenerate_calls: Vec<RegenerateRequest>,
    pub saved: Vec<SaveChainVersionRequest>,
    pub versions: Vec<ChainVersion>,
    pub versions_error: Option<ApiError>,
    pub rating_updates: Vec<(String, usize, Option<Rating>)>,
    /// Regenerate responses come back without usage metadata.
    pub omit_metadata: bool,
    pub models: ModelCatalog,
    pub deleted: Vec<String>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_live(chain: LiveChain) -> Self {
        let backend = Self::new();
        backend.state().live = Some(chain);
        backend
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn script(&self, responses: Vec<Result<Value, ApiError>>) {
        self.state().responses.extend(responses);
    }

    pub fn regenerate_calls(&self) -> Vec<RegenerateRequest> {
        self.state().regenerate_calls.clone()
    }
}

#[async_trait]
impl ChainBackend for FakeBackend {
    async fn process_input(&self, _input: &str) -> Result<LiveChain, ApiError> {
        let state = self.state();
        if let Some(error) = &state.live_error {
            return Err(error.clone());
        }
        state.live.clone().ok_or_else(|| ApiError::Api {
            status: 404,
            message: "Trace not found".to_string(),
        })
    }

    async fn regenerate(&self, request: &RegenerateRequest) -> Result<RegenerateResponse, ApiError> {
        let mut state = self.state();
        state.regenerate_calls.push(request.clone());
        let response = state
            .responses
            .pop_front()
            .unwrap_or_else(|| Ok(json!(format!("re: {}", request.prompt))))?;
        Ok(RegenerateResponse {
            version_id: None,
            assistant_response: Some(response),
            metadata: (!state.omit_metadata).then(|| StepMetrics {
                input_tokens: 10,
                output_tokens: 5,
                cost_usd: 0.001,
                latency: Some(1.25),
                ..Default::default()
            }),
        })
    }

    async fn save_chain_version(&self, request: &SaveChainVersionRequest) -> Result<(), ApiError> {
        let mut state = self.state();
        let created_at = format!("2030-01-01 00:00:{:02}", state.versions.len());
        state.versions.push(ChainVersion {
            version_id: request.version_id.clone(),
            trace_id: request.trace_id.clone(),
            chain_name: Some(request.chain_name.clone()),
            steps: request.chain_events.clone(),
            total_tokens_input: Some(request.total_tokens_input),
            total_tokens_output: Some(request.total_tokens_output),
            total_cost: Some(request.total_cost),
            rating: None,
            metadata: match &request.metadata {
                Some(Value::Object(map)) => map.clone(),
                _ => Default::default(),
            },
            created_at: Some(created_at),
        });
        state.saved.push(request.clone());
        Ok(())
    }

    async fn get_chain_versions(&self, trace_id: &str) -> Result<Vec<ChainVersion>, ApiError> {
        let state = self.state();
        if let Some(error) = &state.versions_error {
            return Err(error.clone());
        }
        Ok(state
            .versions
            .iter()
            .filter(|v| v.trace_id == trace_id)
            .cloned()
            .collect())
    }

    async fn update_chain_step_rating(
        &self,
        version_id: &str,
        step_index: usize,
        rating: Option<&Rating>,
    ) -> Result<(), ApiError> {
        let mut state = self.state();
        state
            .rating_updates
            .push((version_id.to_string(), step_index, rating.cloned()));
        let version = state
            .versions
            .iter_mut()
            .find(|v| v.version_id == version_id)
            .ok_or_else(|| ApiError::Api {
                status: 404,
                message: "Version not found".to_string(),
            })?;
        match version.steps.get_mut(step_index) {
            Some(step) => {
                step.rating = rating.cloned();
                Ok(())
            }
            None => Err(ApiError::Api {
                status: 400,
                message: "Invalid step index".to_string(),
            }),
        }
    }

    async fn get_models(&self) -> Result<ModelCatalog, ApiError> {
        Ok(self.state().models.clone())
    }

    async fn get_chains(&self) -> Result<Vec<ChainSummary>, ApiError> {
        let state = self.state();
        let mut chains: Vec<ChainSummary> = Vec::new();
        for version in &state.versions {
            let overall = version.steps.iter().filter_map(|s| s.rating.as_ref()?.overall).max();
            match chains.iter_mut().find(|c| c.trace_id == version.trace_id) {
                Some(chain) => {
                    chain.version_count += 1;
                    chain.max_rating = chain.max_rating.max(overall);
                    chain.last_updated = chain.last_updated.clone().max(version.created_at.clone());
                }
                None => chains.push(ChainSummary {
                    trace_id: version.trace_id.clone(),
                    chain_name: version.chain_name.clone(),
                    version_count: 1,
                    max_rating: overall,
                    last_updated: version.created_at.clone(),
                }),
            }
        }
        chains.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(chains)
    }

    async fn delete_chain(&self, trace_id: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        let before = state.versions.len();
        state.versions.retain(|v| v.trace_id != trace_id);
        if state.versions.len() == before {
            return Err(ApiError::Api {
                status: 404,
                message: "Chain not found".to_string(),
            });
        }
        state.deleted.push(trace_id.to_string());
        Ok(())
    }
}

pub fn step(prompt: &str, response: Value) -> ChainStep {
    ChainStep {
        user_prompt: prompt.to_string(),
        assistant_response: Some(response),
        model: Some("gpt-4o".to_string()),
        provider: Some("openai".to_string()),
        ..Default::default()
    }
}

pub fn edit(prompt: &str) -> StepEdit {
    StepEdit {
        prompt: prompt.to_string(),
        provider: "openai".to_string(),
        model: "gpt-4o-mini".to_string(),
        ..Default::default()
    }
}

pub fn live_chain(trace_id: &str, steps: Vec<ChainStep>) -> LiveChain {
    LiveChain {
        is_chain: true,
        trace_id: Some(trace_id.to_string()),
        chain_name: Some("demo chain".to_string()),
        events: steps,
        metadata: Default::default(),
    }
}

pub fn saved_version(trace_id: &str, version_id: &str, created_at: &str, steps: Vec<ChainStep>) -> ChainVersion {
    ChainVersion {
        version_id: version_id.to_string(),
        trace_id: trace_id.to_string(),
        chain_name: Some("demo chain".to_string()),
        steps,
        total_tokens_input: Some(0),
        total_tokens_output: Some(0),
        total_cost: Some(0.0),
        rating: None,
        metadata: Default::default(),
        created_at: Some(created_at.to_string()),
    }
}

pub fn rating(overall: u8) -> Rating {
    Rating {
        overall: Some(overall),
        ..Default::default()
    }
}
