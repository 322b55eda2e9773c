use serde::{Deserialize, Serialize};

use crate::domain::emotion::Emotion;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Emotion,
    Thinking,
    Retrieval,
    Persona,
    Generation,
    Done,
}

impl PipelineStage {
    pub const ORDER: [PipelineStage; 5] = [
        PipelineStage::Emotion,
        PipelineStage::Thinking,
        PipelineStage::Retrieval,
        PipelineStage::Persona,
        PipelineStage::Generation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emotion => "emotion",
            Self::Thinking => "thinking",
            Self::Retrieval => "retrieval",
            Self::Persona => "persona",
            Self::Generation => "generation",
            Self::Done => "done",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradeReason {
    Timeout { after_ms: u64 },
    Failed(String),
}

impl DegradeReason {
    pub fn describe(&self) -> String {
        match self {
            Self::Timeout { after_ms } => format!("timed out after {after_ms}ms"),
            Self::Failed(message) => message.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Completed,
    Degraded(DegradeReason),
}

impl StageOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: PipelineStage,
    pub to: PipelineStage,
    pub outcome: StageOutcome,
}

/// What happened during one pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub stages: Vec<StageRecord>,
    pub emotion: Option<Emotion>,
    pub deadline_exceeded: bool,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn degraded_stages(&self) -> Vec<PipelineStage> {
        self.stages
            .iter()
            .filter(|record| record.outcome.is_degraded())
            .map(|record| record.stage)
            .collect()
    }

    pub fn completed(&self) -> bool {
        !self.deadline_exceeded && self.stages.len() == PipelineStage::ORDER.len()
    }
}
