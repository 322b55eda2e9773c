pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, PipelineFlow, StageTracker};
pub use states::{
    DegradeReason, PipelineStage, RunReport, StageOutcome, StageRecord, TransitionOutcome,
};
