use serde::Serialize;

use crate::api::{ApiError, ChainBackend, RegenerateRequest, RegenerateResponse};
use crate::models::*;
use crate::template::resolve;
use crate::validation::{validate_edit, validate_edits, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Validating,
    /// Validation failed; nothing was sent.
    Aborted,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded { index: usize },
    Failed { index: usize, error: ApiError },
}

impl StepOutcome {
    pub fn index(&self) -> usize {
        match self {
            StepOutcome::Succeeded { index } | StepOutcome::Failed { index, .. } => *index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationReport {
    pub run_id: String,
    pub phase: RunPhase,
    pub success_count: usize,
    pub error_count: usize,
    pub outcomes: Vec<StepOutcome>,
}

impl RegenerationReport {
    fn from_outcomes(run_id: String, outcomes: Vec<StepOutcome>) -> Self {
        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            run_id,
            phase: RunPhase::Completed,
            success_count,
            error_count: outcomes.len() - success_count,
            outcomes,
        }
    }

    /// User-facing status line for the run.
    pub fn summary(&self) -> String {
        if self.error_count == 0 {
            format!(
                "Chain regenerated successfully! All {} prompts completed.",
                self.success_count
            )
        } else if self.success_count > 0 {
            format!(
                "Completed with errors: {} succeeded, {} failed.",
                self.success_count, self.error_count
            )
        } else {
            "All prompts failed to regenerate.".to_string()
        }
    }

    pub fn failed_steps(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(StepOutcome::index)
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegenerateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No prompts to regenerate")]
    Empty,
    #[error("{}", .report.summary())]
    AllFailed { report: RegenerationReport },
    #[error("Prompt {} does not exist", .index + 1)]
    StepOutOfRange { index: usize },
    #[error("Prompt {} failed: {source}", .index + 1)]
    Step { index: usize, source: ApiError },
}

/// Progress hooks for a regeneration run. Every method defaults to a no-op.
pub trait RunObserver {
    fn phase_changed(&mut self, _phase: RunPhase) {}
    /// `resolved_prompt` is the text actually sent.
    fn step_started(&mut self, _index: usize, _resolved_prompt: &str) {}
    fn step_succeeded(&mut self, _index: usize, _step: &ChainStep) {}
    fn step_failed(&mut self, _index: usize, _error: &ApiError) {}
    /// Resolved text of the next step's prompt, recomputed after the step
    /// before it finished.
    fn preview_updated(&mut self, _index: usize, _preview: &str) {}
}

pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Reports progress through `tracing` at info level.
pub struct TracingObserver {
    total: usize,
}

impl TracingObserver {
    pub fn new(total: usize) -> Self {
        Self { total }
    }
}

impl RunObserver for TracingObserver {
    fn phase_changed(&mut self, phase: RunPhase) {
        tracing::debug!(?phase, "regeneration phase");
    }

    fn step_started(&mut self, index: usize, _resolved_prompt: &str) {
        tracing::info!("Regenerating prompt {}/{}...", index + 1, self.total);
    }

    fn step_succeeded(&mut self, index: usize, _step: &ChainStep) {
        tracing::info!("Prompt {}/{} regenerated", index + 1, self.total);
    }

    fn step_failed(&mut self, index: usize, error: &ApiError) {
        tracing::info!("Prompt {}/{} failed: {}", index + 1, self.total, error);
    }

    fn preview_updated(&mut self, index: usize, preview: &str) {
        tracing::debug!(step = index + 1, chars = preview.len(), "preview updated");
    }
}

/// Regenerates every step in order. Each prompt is resolved against the
/// chain as it stands at that moment, so a step sees the fresh outputs of
/// the steps before it.
///
/// A failed step keeps its previous data and the run moves on. Only a run
/// where every step failed returns `Err`.
pub async fn regenerate_chain<B: ChainBackend + ?Sized>(
    chain: &mut WorkingChain,
    edits: &[StepEdit],
    backend: &B,
    observer: &mut (dyn RunObserver + Send),
) -> Result<RegenerationReport, RegenerateError> {
    if edits.is_empty() {
        return Err(RegenerateError::Empty);
    }

    // 1. Validate everything before sending anything
    observer.phase_changed(RunPhase::Validating);
    if let Err(e) = validate_edits(edits) {
        tracing::warn!(step = ?e.step(), field = e.field(), error = %e, "regeneration aborted");
        observer.phase_changed(RunPhase::Aborted);
        return Err(e.into());
    }

    // 2. Sequential pass
    let run_id = new_id();
    observer.phase_changed(RunPhase::Running);
    tracing::info!(run_id = %run_id, trace_id = %chain.trace_id, steps = edits.len(), "regenerating chain");

    let mut outcomes = Vec::with_capacity(edits.len());
    for (index, edit) in edits.iter().enumerate() {
        let prompt = resolve(edit.prompt.trim(), index, &chain.steps);
        observer.step_started(index, &prompt);
        tracing::debug!(run_id = %run_id, step = index + 1, provider = %edit.provider, model = %edit.model, "regenerating step");

        match backend.regenerate(&build_request(edit, prompt)).await {
            Ok(response) => {
                let step = apply_response(chain, index, edit, response);
                observer.step_succeeded(index, step);
                outcomes.push(StepOutcome::Succeeded { index });
            }
            Err(error) => {
                tracing::warn!(run_id = %run_id, step = index + 1, error = %error, "step regeneration failed");
                observer.step_failed(index, &error);
                outcomes.push(StepOutcome::Failed { index, error });
            }
        }

        if let Some(next) = edits.get(index + 1) {
            let preview = resolve(next.prompt.trim(), index + 1, &chain.steps);
            observer.preview_updated(index + 1, &preview);
        }
    }

    // 3. Totals
    let report = RegenerationReport::from_outcomes(run_id, outcomes);
    observer.phase_changed(RunPhase::Completed);
    tracing::info!(
        run_id = %report.run_id,
        succeeded = report.success_count,
        failed = report.error_count,
        "regeneration finished"
    );

    if report.success_count == 0 {
        return Err(RegenerateError::AllFailed { report });
    }
    chain.refresh_metadata();
    Ok(report)
}

/// Regenerates a single existing step. Placeholders resolve against the
/// steps before it; failures go straight to the caller.
pub async fn regenerate_step<B: ChainBackend + ?Sized>(
    chain: &mut WorkingChain,
    index: usize,
    edit: &StepEdit,
    backend: &B,
) -> Result<(), RegenerateError> {
    if index >= chain.steps.len() {
        return Err(RegenerateError::StepOutOfRange { index });
    }
    validate_edit(index, edit)?;

    let prompt = resolve(edit.prompt.trim(), index, &chain.steps);
    let response = backend
        .regenerate(&build_request(edit, prompt))
        .await
        .map_err(|source| {
            tracing::warn!(step = index + 1, error = %source, "step regeneration failed");
            RegenerateError::Step { index, source }
        })?;

    apply_response(chain, index, edit, response);
    chain.refresh_metadata();
    tracing::info!(trace_id = %chain.trace_id, step = index + 1, "step regenerated");
    Ok(())
}

fn build_request(edit: &StepEdit, prompt: String) -> RegenerateRequest {
    RegenerateRequest {
        event_id: None,
        provider: edit.provider.trim().to_string(),
        model: edit.model.trim().to_string(),
        prompt,
        image_urls: edit.images.clone(),
        // Blank schemas were normalized away by validation.
        response_schema: edit
            .response_schema
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

/// Stores a successful response. The prompt is kept unresolved so its
/// placeholders stay visible.
fn apply_response<'a>(
    chain: &'a mut WorkingChain,
    index: usize,
    edit: &StepEdit,
    response: RegenerateResponse,
) -> &'a ChainStep {
    while chain.steps.len() <= index {
        let next = chain.steps.len();
        chain.steps.push(ChainStep::generation(next));
    }

    let step = &mut chain.steps[index];
    step.user_prompt = edit.prompt.trim().to_string();
    step.images = edit.images.clone();
    step.assistant_response = response.assistant_response;
    step.provider = Some(edit.provider.trim().to_string());
    step.model = Some(edit.model.trim().to_string());
    // A generated step always carries metrics, even when the backend sent none.
    let mut metrics = response.metadata.unwrap_or_default();
    metrics.provider.get_or_insert_with(|| edit.provider.trim().to_string());
    metrics.model.get_or_insert_with(|| edit.model.trim().to_string());
    step.metrics = Some(metrics);
    step
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edit(prompt: &str) -> StepEdit {
        StepEdit {
            prompt: prompt.to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_messages() {
        let ok = RegenerationReport::from_outcomes(
            "r".into(),
            vec![StepOutcome::Succeeded { index: 0 }, StepOutcome::Succeeded { index: 1 }],
        );
        assert_eq!(ok.summary(), "Chain regenerated successfully! All 2 prompts completed.");

        let partial = RegenerationReport::from_outcomes(
            "r".into(),
            vec![
                StepOutcome::Succeeded { index: 0 },
                StepOutcome::Failed { index: 1, error: ApiError::RateLimited },
            ],
        );
        assert_eq!(partial.summary(), "Completed with errors: 1 succeeded, 1 failed.");
        assert_eq!(partial.failed_steps(), vec![1]);

        let none = RegenerationReport::from_outcomes(
            "r".into(),
            vec![StepOutcome::Failed { index: 0, error: ApiError::RateLimited }],
        );
        assert_eq!(none.summary(), "All prompts failed to regenerate.");
    }

    #[test]
    fn test_build_request_trims_and_drops_blank_schema() {
        let mut e = edit("  hi  ");
        e.response_schema = Some("   ".to_string());
        e.images = vec!["https://img.test/a.png".to_string()];
        let req = build_request(&e, "resolved".to_string());
        assert_eq!(req.prompt, "resolved");
        assert_eq!(req.response_schema, None);
        assert_eq!(req.event_id, None);
        assert_eq!(req.image_urls, e.images);
    }

    #[test]
    fn test_apply_response_pads_missing_steps() {
        let mut chain = WorkingChain::new("t", None, vec![]);
        let response = RegenerateResponse {
            assistant_response: Some(json!("out")),
            metadata: Some(StepMetrics { input_tokens: 4, ..Default::default() }),
            ..Default::default()
        };
        apply_response(&mut chain, 1, &edit(" {{{1}}} again "), response);

        assert_eq!(chain.steps.len(), 2);
        assert_eq!(chain.steps[0].name.as_deref(), Some("prompt_1"));
        assert!(!chain.steps[0].has_response());
        assert_eq!(chain.steps[1].user_prompt, "{{{1}}} again");
        let metrics = chain.steps[1].metrics.as_ref().unwrap();
        assert_eq!(metrics.provider.as_deref(), Some("openai"));
        assert_eq!(metrics.model.as_deref(), Some("gpt-4o"));
    }
}
