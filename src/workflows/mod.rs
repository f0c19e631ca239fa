pub mod compare;
pub mod regenerate;

pub use compare::{sort_versions, version_badges, ComparisonTable};
pub use regenerate::{
    regenerate_chain, regenerate_step, NoopObserver, RegenerateError, RegenerationReport,
    RunObserver, RunPhase, StepOutcome, TracingObserver,
};
