//! Client side of a prompt-chain evaluation tool: load a chain of LLM
//! prompt/response steps, edit and regenerate it step by step with
//! `{{{N}}}` references between steps, rate steps, save versions, and
//! compare saved versions side by side.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod session;
pub mod template;
pub mod validation;
pub mod workflows;

pub use aggregate::{aggregate, ChainMetadata};
pub use api::{ApiClient, ApiError, ChainBackend};
pub use config::{ApiConfig, ConfigError};
pub use models::{ChainStep, ChainVersion, Rating, StepEdit, StepMetrics, WorkingChain};
pub use session::{ChainSession, SessionError};
pub use template::resolve;
pub use validation::ValidationError;
pub use workflows::{ComparisonTable, RegenerateError, RegenerationReport, RunObserver};
