use async_trait::async_trait;
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};
use reqwest::{Client, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::api::backend::ChainBackend;
use crate::api::types::*;
use crate::config::ApiConfig;
use crate::models::{ChainVersion, Rating};

/// HTTP implementation of [`ChainBackend`].
///
/// Only reads are retried. Regeneration costs money and saves are not
/// idempotent, so those surface their first failure.
pub struct ApiClient {
    http: Client,
    config: ApiConfig,
    base: Url,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(config.base_url.clone()));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| ApiError::Http(e.to_string()))?;

        Ok(Self { http, config, base })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// `segments` are appended one by one, so a trace id containing `/` or
    /// `?` stays a single path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_json<B, T>(&self, url: Url, body: &B, fallback: &str) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned + Send,
    {
        tracing::debug!(url = %url, "POST");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| ApiError::InvalidResponse(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body, fallback))
        }
    }

    async fn post_ack<B>(&self, url: Url, body: &B, fallback: &str) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let ack: Ack = self.post_json(url, body, fallback).await?;
        if ack.success {
            Ok(())
        } else {
            Err(ApiError::Rejected(
                ack.message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| fallback.to_string()),
            ))
        }
    }

    async fn delete(&self, url: Url, fallback: &str) -> Result<(), ApiError> {
        tracing::debug!(url = %url, "DELETE");
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(status_error(status, &body, fallback));
        }
        // Bodies other than an ack are accepted as-is.
        match serde_json::from_str::<Ack>(&body) {
            Ok(Ack { success: false, message }) => Err(ApiError::Rejected(
                message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| fallback.to_string()),
            )),
            _ => Ok(()),
        }
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, url: Url, fallback: &str) -> Result<T, ApiError> {
        let operation = || async {
            tracing::debug!(url = %url, "GET");
            let response = self
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| BackoffError::transient(ApiError::Http(e.to_string())))?;

            let status = response.status();
            if status.is_success() {
                response
                    .json::<T>()
                    .await
                    .map_err(|e| BackoffError::permanent(ApiError::InvalidResponse(e.to_string())))
            } else {
                let body = response.text().await.unwrap_or_default();
                let error = status_error(status, &body, fallback);
                if is_transient(status) {
                    tracing::warn!(status = status.as_u16(), "retrying request");
                    Err(BackoffError::transient(error))
                } else {
                    Err(BackoffError::permanent(error))
                }
            }
        };

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(4),
            max_elapsed_time: Some(self.config.retry_max_elapsed),
            ..Default::default()
        };

        retry(backoff, operation).await
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn status_error(status: StatusCode, body: &str, fallback: &str) -> ApiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ApiError::RateLimited;
    }
    ApiError::Api {
        status: status.as_u16(),
        message: error_message(body, fallback),
    }
}

/// Server-supplied `detail` or `message`, else the operation's fallback.
pub fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| fallback.to_string())
}

#[async_trait]
impl ChainBackend for ApiClient {
    async fn process_input(&self, input: &str) -> Result<LiveChain, ApiError> {
        let url = self.endpoint(&["api", "process-input"])?;
        self.post_json(url, &ProcessInputRequest { input }, "Failed to process input").await
    }

    async fn regenerate(&self, request: &RegenerateRequest) -> Result<RegenerateResponse, ApiError> {
        let url = self.endpoint(&["api", "regenerate"])?;
        self.post_json(url, request, "Failed to regenerate").await
    }

    async fn save_chain_version(&self, request: &SaveChainVersionRequest) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "save-chain-version"])?;
        self.post_ack(url, request, "Failed to save chain version").await
    }

    async fn get_chain_versions(&self, trace_id: &str) -> Result<Vec<ChainVersion>, ApiError> {
        let url = self.endpoint(&["api", "chain-versions", trace_id])?;
        let response: ChainVersionsResponse =
            self.get_json(url, "Failed to load chain versions").await?;
        Ok(response.versions)
    }

    async fn update_chain_step_rating(
        &self,
        version_id: &str,
        step_index: usize,
        rating: Option<&Rating>,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "update-chain-step-rating"])?;
        let body = UpdateChainStepRatingRequest { version_id, step_index, rating };
        self.post_ack(url, &body, "Failed to update step rating").await
    }

    async fn get_models(&self) -> Result<ModelCatalog, ApiError> {
        let url = self.endpoint(&["api", "models"])?;
        self.get_json(url, "Failed to load models").await
    }

    async fn get_chains(&self) -> Result<Vec<ChainSummary>, ApiError> {
        let url = self.endpoint(&["api", "chains"])?;
        let response: ChainsResponse = self.get_json(url, "Failed to load chains").await?;
        Ok(response.chains)
    }

    async fn delete_chain(&self, trace_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "chains", trace_id])?;
        self.delete(url, "Failed to delete chain").await
    }
}
