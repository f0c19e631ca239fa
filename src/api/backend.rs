use async_trait::async_trait;

use crate::api::types::*;
use crate::models::{ChainVersion, Rating};

/// The JSON API the chain client talks to. Generation and version storage
/// both live behind it.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Fetches a chain from the live trace source.
    async fn process_input(&self, input: &str) -> Result<LiveChain, ApiError>;

    async fn regenerate(&self, request: &RegenerateRequest) -> Result<RegenerateResponse, ApiError>;

    async fn save_chain_version(&self, request: &SaveChainVersionRequest) -> Result<(), ApiError>;

    /// Saved versions of a trace, in no particular order.
    async fn get_chain_versions(&self, trace_id: &str) -> Result<Vec<ChainVersion>, ApiError>;

    /// `None` clears the step's rating.
    async fn update_chain_step_rating(
        &self,
        version_id: &str,
        step_index: usize,
        rating: Option<&Rating>,
    ) -> Result<(), ApiError>;

    /// Providers and models the server can generate with.
    async fn get_models(&self) -> Result<ModelCatalog, ApiError>;

    /// Saved chains, most recently updated first.
    async fn get_chains(&self) -> Result<Vec<ChainSummary>, ApiError>;

    /// Removes every saved version of a trace.
    async fn delete_chain(&self, trace_id: &str) -> Result<(), ApiError>;
}
