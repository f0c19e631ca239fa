use std::collections::BTreeMap;

use crate::api::{ApiError, ChainBackend, SaveChainVersionRequest};
use crate::models::*;
use crate::template::{self, resolve};
use crate::validation::ValidationError;
use crate::workflows::{self, ComparisonTable, RegenerateError, RegenerationReport, RunObserver};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Not a valid chain trace ID")]
    NotAChain,
    #[error("No chain data available")]
    NoChain,
    #[error("Cannot update rating for \"Current Version\". Please save a version first.")]
    NoSavedVersion,
    #[error("Version {0} not found")]
    VersionNotFound(String),
    #[error("Prompt {} does not exist", .0 + 1)]
    StepOutOfRange(usize),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Regenerate(#[from] RegenerateError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// One user's view of one chain: the working copy, the saved versions of
/// its trace, and ratings not yet saved.
pub struct ChainSession<B> {
    backend: B,
    chain: Option<WorkingChain>,
    versions: Vec<ChainVersion>,
    /// Saved version the working copy came from. `None` means the live or
    /// edited "current version".
    selected_version: Option<ID>,
    pending_ratings: BTreeMap<usize, Rating>,
    last_version_millis: i128,
}

impl<B: ChainBackend> ChainSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            chain: None,
            versions: Vec::new(),
            selected_version: None,
            pending_ratings: BTreeMap::new(),
            last_version_millis: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn chain(&self) -> Option<&WorkingChain> {
        self.chain.as_ref()
    }

    /// Cached saved versions, oldest first.
    pub fn versions(&self) -> &[ChainVersion] {
        &self.versions
    }

    pub fn selected_version(&self) -> Option<&str> {
        self.selected_version.as_deref()
    }

    /// Loads a trace from the live source. If that fails, the newest saved
    /// version of the trace is used instead; if there is none, the live
    /// error is returned.
    pub async fn load(&mut self, trace_id: &str) -> Result<&WorkingChain, SessionError> {
        let trace_id = trace_id.trim();
        match self.backend.process_input(trace_id).await {
            Ok(live) => {
                if !live.is_chain {
                    return Err(SessionError::NotAChain);
                }
                let id = live
                    .trace_id
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| trace_id.to_string());
                let mut chain = WorkingChain::new(id, live.chain_name, live.events);
                chain.source_metadata = live.metadata;
                tracing::info!(trace_id = %chain.trace_id, steps = chain.steps.len(), "chain loaded");

                self.replace_chain(chain, None);
                if let Err(e) = self.refresh_versions().await {
                    tracing::warn!(error = %e, "failed to load chain versions");
                }
            }
            Err(live_error) => {
                tracing::warn!(trace_id, error = %live_error, "live load failed, trying saved versions");
                let mut versions = match self.backend.get_chain_versions(trace_id).await {
                    Ok(versions) => versions,
                    Err(e) => {
                        tracing::error!(trace_id, error = %e, "saved version lookup failed");
                        return Err(live_error.into());
                    }
                };
                workflows::sort_versions(&mut versions);
                let Some(newest) = versions.last() else {
                    return Err(live_error.into());
                };

                let chain = WorkingChain::from_version(newest);
                let version_id = newest.version_id.clone();
                tracing::info!(trace_id, version_id = %version_id, "loaded saved version");
                self.replace_chain(chain, Some(version_id));
                self.versions = versions;
            }
        }
        self.chain.as_ref().ok_or(SessionError::NoChain)
    }

    /// Switches the working copy to a cached saved version. Unsaved ratings
    /// are dropped.
    pub fn load_version(&mut self, version_id: &str) -> Result<&WorkingChain, SessionError> {
        let version = self
            .versions
            .iter()
            .find(|v| v.version_id == version_id)
            .ok_or_else(|| SessionError::VersionNotFound(version_id.to_string()))?;
        let chain = WorkingChain::from_version(version);
        self.replace_chain(chain, Some(version_id.to_string()));
        self.chain.as_ref().ok_or(SessionError::NoChain)
    }

    /// Re-fetches the saved versions of the loaded trace.
    pub async fn refresh_versions(&mut self) -> Result<&[ChainVersion], SessionError> {
        let trace_id = self.chain.as_ref().ok_or(SessionError::NoChain)?.trace_id.clone();
        let mut versions = self.backend.get_chain_versions(&trace_id).await?;
        workflows::sort_versions(&mut versions);
        tracing::debug!(trace_id = %trace_id, count = versions.len(), "chain versions loaded");

        if let Some(selected) = &self.selected_version {
            if !versions.iter().any(|v| &v.version_id == selected) {
                self.selected_version = None;
            }
        }
        self.versions = versions;
        Ok(&self.versions)
    }

    /// Deletes every saved version of the loaded trace. The working copy
    /// stays loaded but no longer points at a saved version.
    pub async fn delete_saved_versions(&mut self) -> Result<(), SessionError> {
        let trace_id = self.chain.as_ref().ok_or(SessionError::NoChain)?.trace_id.clone();
        self.backend.delete_chain(&trace_id).await?;
        tracing::info!(trace_id = %trace_id, versions = self.versions.len(), "saved chain deleted");
        self.versions.clear();
        self.selected_version = None;
        Ok(())
    }

    pub fn set_prompt(&mut self, index: usize, text: impl Into<String>) -> Result<(), SessionError> {
        self.step_mut(index)?.user_prompt = text.into();
        Ok(())
    }

    /// Prompt text as it would be sent right now.
    pub fn preview_prompt(&self, index: usize) -> Result<String, SessionError> {
        let chain = self.chain.as_ref().ok_or(SessionError::NoChain)?;
        let step = chain.steps.get(index).ok_or(SessionError::StepOutOfRange(index))?;
        Ok(resolve(&step.user_prompt, index, &chain.steps))
    }

    /// Placeholders in a step's prompt that point at the step itself or a
    /// later one. These are sent as literal text.
    pub fn forward_references(&self, index: usize) -> Result<Vec<usize>, SessionError> {
        let step = self.step(index)?;
        Ok(template::forward_references(&step.user_prompt, index))
    }

    /// Edit states reproducing every step as it is.
    pub fn current_edits(&self) -> Vec<StepEdit> {
        self.chain
            .as_ref()
            .map(|c| c.steps.iter().map(StepEdit::from_step).collect())
            .unwrap_or_default()
    }

    /// Holds a rating until the next `save_version`. `None` or an empty
    /// rating discards what was staged for the step.
    pub fn stage_rating(&mut self, index: usize, rating: Option<Rating>) -> Result<(), SessionError> {
        self.step(index)?;
        match rating.filter(|r| !r.is_empty()) {
            Some(rating) => {
                rating.check()?;
                self.pending_ratings.insert(index, rating);
            }
            None => {
                self.pending_ratings.remove(&index);
            }
        }
        Ok(())
    }

    pub fn pending_rating(&self, index: usize) -> Option<&Rating> {
        self.pending_ratings.get(&index)
    }

    /// Saves the working copy, with staged ratings applied, as a new version
    /// and returns its id.
    pub async fn save_version(&mut self) -> Result<ID, SessionError> {
        let millis = self.next_version_millis();
        let chain = self.chain.as_ref().ok_or(SessionError::NoChain)?;

        let mut steps = chain.steps.clone();
        for (index, rating) in &self.pending_ratings {
            if let Some(step) = steps.get_mut(*index) {
                step.rating = Some(rating.clone());
            }
        }

        let version_id = format!("{}_{}", chain.trace_id, millis);
        let request = SaveChainVersionRequest {
            version_id: version_id.clone(),
            trace_id: chain.trace_id.clone(),
            chain_name: chain.chain_name.clone().unwrap_or_default(),
            chain_events: steps,
            total_tokens_input: chain.metadata.total_input_tokens,
            total_tokens_output: chain.metadata.total_output_tokens,
            total_cost: chain.metadata.total_cost,
            rating: None,
            metadata: Some(chain.metadata_value()),
        };

        self.backend.save_chain_version(&request).await?;
        tracing::info!(version_id = %version_id, "chain version saved");

        let pending = std::mem::take(&mut self.pending_ratings);
        if let Some(chain) = self.chain.as_mut() {
            for (index, rating) in pending {
                if let Some(step) = chain.steps.get_mut(index) {
                    step.rating = Some(rating);
                }
            }
        }

        if let Err(e) = self.refresh_versions().await {
            tracing::warn!(error = %e, "failed to reload chain versions after save");
        }
        Ok(version_id)
    }

    /// Rates one step of an already saved version. `None` clears the rating.
    pub async fn update_step_rating(
        &mut self,
        version_id: &str,
        index: usize,
        rating: Option<Rating>,
    ) -> Result<(), SessionError> {
        if version_id.trim().is_empty() {
            return Err(SessionError::NoSavedVersion);
        }
        let version = self
            .versions
            .iter()
            .find(|v| v.version_id == version_id)
            .ok_or_else(|| SessionError::VersionNotFound(version_id.to_string()))?;
        if index >= version.steps.len() {
            return Err(SessionError::StepOutOfRange(index));
        }
        let rating = rating.filter(|r| !r.is_empty());
        if let Some(rating) = &rating {
            rating.check()?;
        }

        self.backend
            .update_chain_step_rating(version_id, index, rating.as_ref())
            .await?;
        tracing::info!(version_id, step = index + 1, cleared = rating.is_none(), "step rating updated");

        if let Some(step) = self
            .versions
            .iter_mut()
            .find(|v| v.version_id == version_id)
            .and_then(|v| v.steps.get_mut(index))
        {
            step.rating = rating.clone();
        }
        // The working copy only mirrors the version it was loaded from.
        if self.selected_version.as_deref() == Some(version_id) {
            if let Some(step) = self.chain.as_mut().and_then(|c| c.steps.get_mut(index)) {
                step.rating = rating;
            }
        }
        if let Err(e) = self.refresh_versions().await {
            tracing::warn!(error = %e, "failed to reload chain versions after rating");
        }
        Ok(())
    }

    /// `update_step_rating` against the version the working copy came from.
    pub async fn rate_selected_version(
        &mut self,
        index: usize,
        rating: Option<Rating>,
    ) -> Result<(), SessionError> {
        let version_id = self.selected_version.clone().ok_or(SessionError::NoSavedVersion)?;
        self.update_step_rating(&version_id, index, rating).await
    }

    /// Runs the sequential driver over the working copy.
    pub async fn regenerate_chain(
        &mut self,
        edits: &[StepEdit],
        observer: &mut (dyn RunObserver + Send),
    ) -> Result<RegenerationReport, SessionError> {
        let chain = self.chain.as_mut().ok_or(SessionError::NoChain)?;
        let report = workflows::regenerate_chain(chain, edits, &self.backend, observer).await?;
        // Edited data no longer matches the saved version.
        self.selected_version = None;
        Ok(report)
    }

    pub async fn regenerate_step(&mut self, index: usize, edit: &StepEdit) -> Result<(), SessionError> {
        let chain = self.chain.as_mut().ok_or(SessionError::NoChain)?;
        workflows::regenerate_step(chain, index, edit, &self.backend).await?;
        self.selected_version = None;
        Ok(())
    }

    pub fn compare(&self) -> ComparisonTable {
        ComparisonTable::build(&self.versions)
    }

    fn replace_chain(&mut self, chain: WorkingChain, selected_version: Option<ID>) {
        self.chain = Some(chain);
        self.selected_version = selected_version;
        self.pending_ratings.clear();
    }

    fn step(&self, index: usize) -> Result<&ChainStep, SessionError> {
        self.chain
            .as_ref()
            .ok_or(SessionError::NoChain)?
            .steps
            .get(index)
            .ok_or(SessionError::StepOutOfRange(index))
    }

    fn step_mut(&mut self, index: usize) -> Result<&mut ChainStep, SessionError> {
        self.chain
            .as_mut()
            .ok_or(SessionError::NoChain)?
            .steps
            .get_mut(index)
            .ok_or(SessionError::StepOutOfRange(index))
    }

    /// Millisecond stamp for version ids, strictly increasing within the
    /// session so two quick saves never collide.
    fn next_version_millis(&mut self) -> i128 {
        let now = unix_millis();
        self.last_version_millis = now.max(self.last_version_millis + 1);
        self.last_version_millis
    }
}
