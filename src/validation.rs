use crate::models::StepEdit;

/// Input errors detected before any request is made. Step numbers are
/// 1-based, the way they are shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please select a provider for Prompt {step}")]
    MissingProvider { step: usize },
    #[error("Please select a model for Prompt {step}")]
    MissingModel { step: usize },
    #[error("Prompt {step} cannot be empty")]
    EmptyPrompt { step: usize },
    #[error("Prompt {step} schema validation failed: Invalid JSON: {message}")]
    InvalidSchema { step: usize, message: String },
    #[error("Rating for {field} must be between 1 and 10, got {value}")]
    RatingOutOfRange { field: String, value: i64 },
}

impl ValidationError {
    pub fn step(&self) -> Option<usize> {
        match self {
            ValidationError::MissingProvider { step }
            | ValidationError::MissingModel { step }
            | ValidationError::EmptyPrompt { step }
            | ValidationError::InvalidSchema { step, .. } => Some(*step),
            ValidationError::RatingOutOfRange { .. } => None,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingProvider { .. } => "provider",
            ValidationError::MissingModel { .. } => "model",
            ValidationError::EmptyPrompt { .. } => "prompt",
            ValidationError::InvalidSchema { .. } => "response_schema",
            ValidationError::RatingOutOfRange { field, .. } => field,
        }
    }
}

/// A blank schema means "no schema". Anything else must be JSON.
pub fn validate_schema(schema: Option<&str>) -> Result<Option<String>, String> {
    let Some(raw) = schema.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    serde_json::from_str::<serde_json::Value>(raw)
        .map(|_| Some(raw.to_string()))
        .map_err(|e| e.to_string())
}

/// Checks one step. `index` is zero-based.
pub fn validate_edit(index: usize, edit: &StepEdit) -> Result<(), ValidationError> {
    let step = index + 1;
    if edit.provider.trim().is_empty() {
        return Err(ValidationError::MissingProvider { step });
    }
    if edit.model.trim().is_empty() {
        return Err(ValidationError::MissingModel { step });
    }
    if edit.prompt.trim().is_empty() {
        return Err(ValidationError::EmptyPrompt { step });
    }
    validate_schema(edit.response_schema.as_deref())
        .map_err(|message| ValidationError::InvalidSchema { step, message })?;
    Ok(())
}

/// Checks every step in order and stops at the first problem.
pub fn validate_edits(edits: &[StepEdit]) -> Result<(), ValidationError> {
    edits
        .iter()
        .enumerate()
        .try_for_each(|(index, edit)| validate_edit(index, edit))
}
