use std::time::Duration;

use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::emotion::Emotion;
use crate::flows::states::{PipelineStage, RunReport, StageOutcome, StageRecord, TransitionOutcome};

/// Fixed stage ordering. Degraded stages advance exactly like completed ones;
/// there is no retry edge.
#[derive(Clone, Debug, Default)]
pub struct PipelineFlow;

impl PipelineFlow {
    pub fn initial_state(&self) -> PipelineStage {
        PipelineStage::Emotion
    }

    pub fn next(&self, current: PipelineStage) -> PipelineStage {
        use PipelineStage::{Done, Emotion, Generation, Persona, Retrieval, Thinking};

        match current {
            Emotion => Thinking,
            Thinking => Retrieval,
            Retrieval => Persona,
            Persona => Generation,
            Generation | Done => Done,
        }
    }

    pub fn transition(
        &self,
        current: PipelineStage,
        finished: PipelineStage,
        outcome: StageOutcome,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        if current == PipelineStage::Done {
            return Err(FlowTransitionError::AlreadyDone { stage: finished });
        }
        if current != finished {
            return Err(FlowTransitionError::OutOfOrder { expected: current, actual: finished });
        }

        Ok(TransitionOutcome { from: current, to: self.next(current), outcome })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("stage {stage:?} finished after the pipeline was done")]
    AlreadyDone { stage: PipelineStage },
    #[error("stage {actual:?} finished while {expected:?} was expected")]
    OutOfOrder { expected: PipelineStage, actual: PipelineStage },
}

/// Walks one run through the stage ordering and accumulates its report.
#[derive(Clone, Debug)]
pub struct StageTracker {
    flow: PipelineFlow,
    state: PipelineStage,
    report: RunReport,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        let flow = PipelineFlow;
        let state = flow.initial_state();
        Self { flow, state, report: RunReport::default() }
    }

    pub fn current(&self) -> PipelineStage {
        self.state
    }

    pub fn set_emotion(&mut self, emotion: Emotion) {
        self.report.emotion = Some(emotion);
    }

    pub fn record(
        &mut self,
        stage: PipelineStage,
        outcome: StageOutcome,
        elapsed: Duration,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let transition = self.flow.transition(self.state, stage, outcome)?;
        self.report.stages.push(StageRecord {
            stage,
            outcome: transition.outcome.clone(),
            elapsed_ms: duration_ms(elapsed),
        });
        self.state = transition.to;
        Ok(transition)
    }

    pub fn record_with_audit<S>(
        &mut self,
        stage: PipelineStage,
        outcome: StageOutcome,
        elapsed: Duration,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.record(stage, outcome, elapsed);
        match &result {
            Ok(TransitionOutcome { outcome: StageOutcome::Degraded(reason), .. }) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "pipeline.stage_degraded",
                        AuditCategory::Pipeline,
                        AuditOutcome::Degraded,
                    )
                    .with_metadata("stage", stage.as_str())
                    .with_metadata("reason", reason.describe()),
                );
            }
            Ok(_) => {}
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "pipeline.transition_rejected",
                        AuditCategory::Pipeline,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    pub fn finish(mut self, elapsed: Duration) -> RunReport {
        self.report.elapsed_ms = duration_ms(elapsed);
        self.report
    }

    /// Closes the report for a run cut short by the deadline.
    pub fn abort_on_deadline(mut self, elapsed: Duration) -> RunReport {
        self.report.deadline_exceeded = true;
        self.finish(elapsed)
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::flows::engine::{FlowTransitionError, PipelineFlow, StageTracker};
    use crate::flows::states::{DegradeReason, PipelineStage, StageOutcome};

    fn audit() -> AuditContext {
        AuditContext::new(Some("u1".to_owned()), None, "msg-1", "pipeline")
    }

    #[test]
    fn stages_advance_in_fixed_order_to_done() {
        let flow = PipelineFlow;
        let mut state = flow.initial_state();
        let mut visited = Vec::new();
        while state != PipelineStage::Done {
            visited.push(state);
            state = flow.next(state);
        }
        assert_eq!(visited, PipelineStage::ORDER.to_vec());
    }

    #[test]
    fn out_of_order_completion_is_rejected() {
        let mut tracker = StageTracker::new();
        let error = tracker.record(
            PipelineStage::Retrieval,
            StageOutcome::Completed,
            Duration::from_millis(1),
        );
        assert_eq!(
            error,
            Err(FlowTransitionError::OutOfOrder {
                expected: PipelineStage::Emotion,
                actual: PipelineStage::Retrieval,
            })
        );
        assert_eq!(tracker.current(), PipelineStage::Emotion);
    }

    #[test]
    fn degraded_stage_advances_and_emits_audit_event() -> Result<(), FlowTransitionError> {
        let sink = InMemoryAuditSink::default();
        let mut tracker = StageTracker::new();

        tracker.record_with_audit(
            PipelineStage::Emotion,
            StageOutcome::Completed,
            Duration::from_millis(5),
            &sink,
            &audit(),
        )?;
        let transition = tracker.record_with_audit(
            PipelineStage::Thinking,
            StageOutcome::Degraded(DegradeReason::Timeout { after_ms: 60_000 }),
            Duration::from_secs(60),
            &sink,
            &audit(),
        )?;

        assert_eq!(transition.to, PipelineStage::Retrieval);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "pipeline.stage_degraded");
        assert_eq!(events[0].metadata.get("stage").map(String::as_str), Some("thinking"));

        let report = tracker.finish(Duration::from_secs(61));
        assert_eq!(report.degraded_stages(), vec![PipelineStage::Thinking]);
        assert!(!report.completed());
        Ok(())
    }

    #[test]
    fn recording_after_done_fails() -> Result<(), FlowTransitionError> {
        let mut tracker = StageTracker::new();
        for stage in PipelineStage::ORDER {
            tracker.record(stage, StageOutcome::Completed, Duration::ZERO)?;
        }
        assert_eq!(tracker.current(), PipelineStage::Done);
        assert_eq!(
            tracker.record(PipelineStage::Generation, StageOutcome::Completed, Duration::ZERO),
            Err(FlowTransitionError::AlreadyDone { stage: PipelineStage::Generation })
        );

        let report = tracker.abort_on_deadline(Duration::from_secs(60));
        assert!(report.deadline_exceeded);
        assert!(!report.completed());
        Ok(())
    }
}
