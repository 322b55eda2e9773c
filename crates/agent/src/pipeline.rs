use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use maimai_core::audit::{AuditContext, AuditSink};
use maimai_core::config::PipelineConfig;
use maimai_core::domain::emotion::{Emotion, EmotionReading};
use maimai_core::domain::knowledge::KnowledgeFact;
use maimai_core::domain::message::PipelineRequest;
use maimai_core::errors::{ApplicationError, BUSY_REPLY};
use maimai_core::flows::{DegradeReason, RunReport, StageOutcome, StageTracker};
use maimai_core::persona::PersonaRegistry;
use maimai_core::storage::KnowledgeLog;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::llm::GatewaySet;
use crate::stages::{
    EmotionStage, GenerationStage, PersonaStage, RetrievalStage, RunContext, Stage, ThinkingStage,
};

/// Result of one dispatch. `reply` is always safe to send.
#[derive(Clone, Debug)]
pub struct PipelineOutcome {
    pub reply: String,
    pub report: RunReport,
    pub emotion: Option<EmotionReading>,
    pub remembered: Option<KnowledgeFact>,
}

impl PipelineOutcome {
    pub fn deadline_exceeded(&self) -> bool {
        self.report.deadline_exceeded
    }
}

struct StagesOutput {
    reply: String,
    emotion: EmotionReading,
    thinking_process: String,
}

/// Runs the fixed stage sequence for one request with a per-stage timeout and
/// an overall deadline.
pub struct Pipeline {
    emotion: EmotionStage,
    thinking: ThinkingStage,
    retrieval: RetrievalStage,
    persona: PersonaStage,
    generation: GenerationStage,
    knowledge: Arc<dyn KnowledgeLog>,
    audit: Arc<dyn AuditSink>,
    stage_timeout: Duration,
    deadline: Duration,
}

impl Pipeline {
    pub fn new(
        gateways: GatewaySet,
        knowledge: Arc<dyn KnowledgeLog>,
        personas: Arc<PersonaRegistry>,
        audit: Arc<dyn AuditSink>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            emotion: EmotionStage::new(gateways.primary.clone()),
            thinking: ThinkingStage::new(gateways.primary.clone()),
            retrieval: RetrievalStage::new(gateways.primary, knowledge.clone()),
            persona: PersonaStage::new(personas),
            generation: GenerationStage::new(gateways.generation),
            knowledge,
            audit,
            stage_timeout: config.stage_timeout(),
            deadline: config.deadline(),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Never fails: degraded stages fall back to their defaults and an
    /// exhausted deadline yields the busy reply.
    pub async fn dispatch(
        &self,
        request: PipelineRequest,
        audit: &AuditContext,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let user_id = request.user_id.clone();
        let raw_text = request.raw_text.clone();
        let mut tracker = StageTracker::new();

        let run = self.run_stages(request, &mut tracker, audit);
        let result = tokio::time::timeout(self.deadline, run).await;
        let elapsed = started.elapsed();

        match result {
            Ok(output) => {
                tracker.set_emotion(output.emotion.emotion);
                let report = tracker.finish(elapsed);
                let remembered = self
                    .remember(&user_id, &raw_text, output.emotion.emotion, &output.thinking_process)
                    .await;
                info!(
                    event_name = "pipeline.run.completed",
                    correlation_id = %audit.correlation_id,
                    degraded = report.degraded_stages().len(),
                    elapsed_ms = report.elapsed_ms,
                    "pipeline run completed"
                );
                PipelineOutcome {
                    reply: output.reply,
                    report,
                    emotion: Some(output.emotion),
                    remembered,
                }
            }
            Err(_) => {
                let report = tracker.abort_on_deadline(elapsed);
                let error = ApplicationError::DeadlineExceeded { elapsed_ms: report.elapsed_ms };
                warn!(
                    event_name = "pipeline.run.deadline_exceeded",
                    correlation_id = %audit.correlation_id,
                    category = error.category().as_str(),
                    finished_stages = report.stages.len(),
                    error = %error,
                    "pipeline deadline exceeded"
                );
                PipelineOutcome {
                    reply: BUSY_REPLY.to_owned(),
                    report,
                    emotion: None,
                    remembered: None,
                }
            }
        }
    }

    async fn run_stages(
        &self,
        request: PipelineRequest,
        tracker: &mut StageTracker,
        audit: &AuditContext,
    ) -> StagesOutput {
        let mut ctx = RunContext::new(request);

        let emotion = self.run_stage(&self.emotion, &ctx, tracker, audit).await;
        tracker.set_emotion(emotion.emotion);
        ctx.emotion = Some(emotion);

        ctx.deliberation = Some(self.run_stage(&self.thinking, &ctx, tracker, audit).await);
        ctx.retrieved = Some(self.run_stage(&self.retrieval, &ctx, tracker, audit).await);
        ctx.persona = Some(self.run_stage(&self.persona, &ctx, tracker, audit).await);
        let reply = self.run_stage(&self.generation, &ctx, tracker, audit).await;

        StagesOutput {
            reply: reply.text,
            emotion: ctx.emotion.unwrap_or_else(EmotionReading::neutral),
            thinking_process: ctx.deliberation.map(|d| d.thinking_process).unwrap_or_default(),
        }
    }

    /// Runs one stage under the stage timeout; failures and timeouts are
    /// replaced by the stage's degraded default.
    async fn run_stage<S>(
        &self,
        stage: &S,
        ctx: &RunContext,
        tracker: &mut StageTracker,
        audit: &AuditContext,
    ) -> S::Output
    where
        S: Stage,
    {
        let started = Instant::now();
        let attempt = tokio::time::timeout(self.stage_timeout, stage.run(ctx)).await;
        let (output, outcome) = match attempt {
            Ok(Ok(output)) => (output, StageOutcome::Completed),
            Ok(Err(error)) => {
                warn!(
                    event_name = "pipeline.stage.failed",
                    stage = stage.kind().as_str(),
                    correlation_id = %audit.correlation_id,
                    category = ApplicationError::from(&error).category().as_str(),
                    error = %error,
                    "stage failed, using degraded default"
                );
                let reason = DegradeReason::Failed(error.to_string());
                (stage.degraded(ctx), StageOutcome::Degraded(reason))
            }
            Err(_) => {
                let after_ms = u64::try_from(self.stage_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    event_name = "pipeline.stage.timed_out",
                    stage = stage.kind().as_str(),
                    correlation_id = %audit.correlation_id,
                    after_ms,
                    "stage timed out, using degraded default"
                );
                (stage.degraded(ctx), StageOutcome::Degraded(DegradeReason::Timeout { after_ms }))
            }
        };

        let elapsed = started.elapsed();
        if let Err(error) =
            tracker.record_with_audit(stage.kind(), outcome, elapsed, self.audit.as_ref(), audit)
        {
            let error = ApplicationError::from(error);
            warn!(
                event_name = "pipeline.stage.out_of_order",
                stage = stage.kind().as_str(),
                category = error.category().as_str(),
                error = %error,
                "stage tracker rejected transition"
            );
        }
        output
    }

    async fn remember(
        &self,
        user_id: &str,
        text: &str,
        emotion: Emotion,
        thinking_process: &str,
    ) -> Option<KnowledgeFact> {
        let fact =
            KnowledgeFact::from_directive(user_id, text, emotion, thinking_process, Utc::now())?;
        match self.knowledge.append(fact.clone()).await {
            Ok(()) => {
                info!(
                    event_name = "pipeline.knowledge.remembered",
                    user_id,
                    emotion = %emotion,
                    "remembered fact"
                );
                Some(fact)
            }
            Err(error) => {
                let error = ApplicationError::from(error);
                warn!(
                    event_name = "pipeline.knowledge.persist_failed",
                    user_id,
                    category = error.category().as_str(),
                    error = %error,
                    "failed to persist remembered fact"
                );
                None
            }
        }
    }
}
