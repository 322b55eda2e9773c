use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use maimai_core::admission::AdmissionController;
use maimai_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use maimai_core::conversation::ConversationStore;
use maimai_core::domain::message::{InboundMessage, PipelineRequest};
use maimai_core::domain::status::BotStatus;
use maimai_core::domain::user::{EmotionSample, FeedbackEntry, Polarity};
use maimai_core::errors::BUSY_REPLY;
use maimai_core::moderation::FastPathClassifier;
use maimai_core::persona::{PersonaError, PersonaRegistry};
use maimai_core::session::SessionTracker;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::adaptation::StyleAdapter;
use crate::fast_path::FastPathResponder;
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::requests::{Command, RequestKind};

pub const FEEDBACK_ACK: &str = "✅ 已记录反馈";
pub const RESET_ACK: &str = "历史已重置。";
pub const ADAPT_ACK: &str = "已根据你的说话风格调整了麦麦的性格～";
pub const ADAPT_FAILED: &str = "这次没能分析出你的说话风格，性格保持不变。";

/// Everything the runtime composes. Built once at bootstrap.
pub struct RuntimeParts {
    pub sessions: SessionTracker,
    pub admission: AdmissionController,
    pub classifier: FastPathClassifier,
    pub responder: FastPathResponder,
    pub pipeline: Pipeline,
    pub adapter: StyleAdapter,
    pub conversations: ConversationStore,
    pub personas: Arc<PersonaRegistry>,
    pub audit: Arc<dyn AuditSink>,
}

type UserLock = Arc<tokio::sync::Mutex<()>>;

/// End-to-end handling of one inbound message: wake gating, request
/// classification, per-user serialization, admission and the pipeline.
pub struct ConversationRuntime {
    sessions: SessionTracker,
    admission: AdmissionController,
    classifier: FastPathClassifier,
    responder: FastPathResponder,
    pipeline: Pipeline,
    adapter: StyleAdapter,
    conversations: ConversationStore,
    personas: Arc<PersonaRegistry>,
    audit: Arc<dyn AuditSink>,
    status: Mutex<BotStatus>,
    user_locks: Mutex<HashMap<String, UserLock>>,
    started_at: Instant,
}

impl ConversationRuntime {
    pub fn new(parts: RuntimeParts) -> Self {
        Self {
            sessions: parts.sessions,
            admission: parts.admission,
            classifier: parts.classifier,
            responder: parts.responder,
            pipeline: parts.pipeline,
            adapter: parts.adapter,
            conversations: parts.conversations,
            personas: parts.personas,
            audit: parts.audit,
            status: Mutex::new(BotStatus::default()),
            user_locks: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn status(&self) -> BotStatus {
        self.lock_status().clone()
    }

    /// Returns the reply to send, or `None` when the message is not for us.
    /// Never fails; every internal failure is turned into a reply or a log.
    pub async fn handle(&self, message: &InboundMessage) -> Option<String> {
        let user_id = message.author_id.as_str();
        let audit = AuditContext::new(
            Some(user_id.to_owned()),
            Some(message.channel_id.clone()),
            message.message_id.clone(),
            "runtime",
        );
        let text = message.text.trim();

        if let Some(command) = Command::parse(text) {
            return Some(self.handle_command(user_id, command, &audit).await);
        }

        let decision = self.sessions.evaluate_at(
            std::time::Instant::now(),
            user_id,
            text,
            message.is_private(),
            message.is_mentioned,
        );
        if !decision.admit {
            debug!(
                event_name = "dispatch.ignored",
                user_id,
                correlation_id = %audit.correlation_id,
                "message outside wake window"
            );
            return None;
        }

        let body = self.sessions.strip_wake_word(text);
        let kind = RequestKind::parse(&body);
        debug!(
            event_name = "dispatch.admitted",
            user_id,
            action = kind.action_key(),
            triggered = decision.triggered,
            in_window = decision.in_window,
            random_join = decision.random_join,
            "message admitted"
        );

        let reply = match kind {
            RequestKind::Command(command) => self.handle_command(user_id, command, &audit).await,
            RequestKind::Introspect(field) => self.status().describe(field),
            RequestKind::Feedback { polarity, marker } => {
                self.handle_feedback(user_id, polarity, marker, &audit).await
            }
            RequestKind::Chat(body) => self.handle_chat(user_id, body, &audit).await,
        };
        Some(reply)
    }

    async fn handle_command(
        &self,
        user_id: &str,
        command: Command,
        audit: &AuditContext,
    ) -> String {
        let (reply, outcome) = match &command {
            Command::Reset => {
                self.conversations.reset(user_id);
                self.conversations.persist_async();
                (RESET_ACK.to_owned(), AuditOutcome::Success)
            }
            Command::Ping => {
                let uptime = format_uptime(self.uptime().as_secs());
                (format!("🤖 已运行：{uptime}"), AuditOutcome::Success)
            }
            Command::ListPersonas => (self.persona_listing(), AuditOutcome::Success),
            Command::SwitchPersona(template_id) => {
                match self.personas.switch_template(user_id, template_id).await {
                    Ok(template) => (
                        format!("已切换为「{}」：{}", template.name, template.description),
                        AuditOutcome::Success,
                    ),
                    Err(PersonaError::UnknownTemplate(id)) => (
                        format!("没有找到人格「{id}」。\n{}", self.persona_listing()),
                        AuditOutcome::Rejected,
                    ),
                }
            }
            Command::AdaptPersona(sample) => self.adapt_persona(user_id, sample).await,
        };

        self.audit.emit(
            AuditEvent::new(audit, "dispatch.command", AuditCategory::Dispatch, outcome)
                .with_metadata("command", command.action_key()),
        );
        reply
    }

    async fn adapt_persona(&self, user_id: &str, sample: &str) -> (String, AuditOutcome) {
        let user_lock = self.user_lock(user_id);
        let _run = user_lock.lock().await;

        let permit = match self.admission.acquire().await {
            Ok(permit) => permit,
            Err(error) => {
                tracing::warn!(
                    event_name = "dispatch.admission_unavailable",
                    error = %error,
                    "admission closed"
                );
                return (BUSY_REPLY.to_owned(), AuditOutcome::Failed);
            }
        };
        let adapted = self.adapter.adapt(&self.personas, user_id, sample).await;
        permit.release();

        match adapted {
            Some(_) => (ADAPT_ACK.to_owned(), AuditOutcome::Success),
            None => (ADAPT_FAILED.to_owned(), AuditOutcome::Degraded),
        }
    }

    async fn handle_feedback(
        &self,
        user_id: &str,
        polarity: Polarity,
        marker: String,
        audit: &AuditContext,
    ) -> String {
        // Trait updates read then write the profile; a second update for the
        // same user must see the first.
        let user_lock = self.user_lock(user_id);
        let _run = user_lock.lock().await;

        self.conversations.record_feedback(FeedbackEntry {
            user_id: user_id.to_owned(),
            timestamp: Utc::now(),
            polarity,
            raw_marker: marker,
        });
        self.personas.apply_feedback(user_id, polarity).await;
        self.conversations.persist_async();

        self.audit.emit(
            AuditEvent::new(
                audit,
                "dispatch.feedback",
                AuditCategory::Dispatch,
                AuditOutcome::Success,
            )
            .with_metadata("polarity", polarity.marker()),
        );
        FEEDBACK_ACK.to_owned()
    }

    async fn handle_chat(&self, user_id: &str, body: String, audit: &AuditContext) -> String {
        // Same-user runs queue here, before taking an admission slot.
        let user_lock = self.user_lock(user_id);
        let _run = user_lock.lock().await;

        let permit = match self.admission.acquire().await {
            Ok(permit) => permit,
            Err(error) => {
                tracing::warn!(
                    event_name = "dispatch.admission_unavailable",
                    error = %error,
                    "admission closed"
                );
                return BUSY_REPLY.to_owned();
            }
        };

        let classification = self.classifier.classify(&body);
        if classification.is_flagged {
            let reply = self.responder.respond(&body, classification.severity).await;
            permit.release();
            let event = AuditEvent::new(
                audit,
                "dispatch.fast_path",
                AuditCategory::Dispatch,
                AuditOutcome::Success,
            );
            self.audit.emit(event.with_metadata("severity", classification.severity.as_str()));
            return reply;
        }

        self.lock_status().begin_thinking(&body);
        let history = self.conversations.history(user_id);
        let request = PipelineRequest::new(user_id, body.clone(), history);
        let started = Instant::now();
        let outcome = self.pipeline.dispatch(request, audit).await;
        let latency = started.elapsed();
        permit.release();
        self.admission.record(latency);

        self.record_exchange(user_id, &body, &outcome);
        self.lock_status().settle();
        self.audit_outcome(&outcome, audit);
        outcome.reply
    }

    fn record_exchange(&self, user_id: &str, body: &str, outcome: &PipelineOutcome) {
        self.conversations.append_exchange(user_id, body, &outcome.reply);
        if let Some(reading) = &outcome.emotion {
            self.conversations.record_emotion(
                user_id,
                EmotionSample {
                    timestamp: Utc::now(),
                    emotion: reading.emotion,
                    intensity: reading.intensity,
                    text: body.to_owned(),
                },
            );
        }
        self.conversations.persist_async();
    }

    fn audit_outcome(&self, outcome: &PipelineOutcome, audit: &AuditContext) {
        let elapsed_ms = outcome.report.elapsed_ms.to_string();
        if outcome.deadline_exceeded() {
            self.audit.emit(
                AuditEvent::new(
                    audit,
                    "dispatch.deadline_exceeded",
                    AuditCategory::Dispatch,
                    AuditOutcome::Failed,
                )
                .with_metadata("elapsed_ms", elapsed_ms)
                .with_metadata("finished_stages", outcome.report.stages.len().to_string()),
            );
            return;
        }

        let degraded: Vec<&str> =
            outcome.report.degraded_stages().into_iter().map(|stage| stage.as_str()).collect();
        let result =
            if degraded.is_empty() { AuditOutcome::Success } else { AuditOutcome::Degraded };
        self.audit.emit(
            AuditEvent::new(audit, "dispatch.completed", AuditCategory::Dispatch, result)
                .with_metadata("elapsed_ms", elapsed_ms)
                .with_metadata("degraded_stages", degraded.join(",")),
        );
        info!(
            event_name = "dispatch.completed",
            correlation_id = %audit.correlation_id,
            degraded = degraded.len(),
            "reply ready"
        );
    }

    fn persona_listing(&self) -> String {
        let lines: Vec<String> = self
            .personas
            .templates()
            .iter()
            .map(|template| {
                format!("{} - {}：{}", template.id, template.name, template.description)
            })
            .collect();
        format!("可用人格：\n{}", lines.join("\n"))
    }

    fn user_lock(&self, user_id: &str) -> UserLock {
        let mut locks = match self.user_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(user_id.to_owned()).or_default().clone()
    }

    /// Drops run locks nobody holds or waits on. Returns how many were removed.
    pub fn prune_idle_locks(&self) -> usize {
        let mut locks = match self.user_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    fn lock_status(&self) -> MutexGuard<'_, BotStatus> {
        match self.status.lock() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// `H:MM:SS`, prefixed with a day count once the process has run that long.
pub fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    if days > 0 {
        format!("{days}天 {hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours}:{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use maimai_core::admission::AdmissionController;
    use maimai_core::audit::InMemoryAuditSink;
    use maimai_core::config::PipelineConfig;
    use maimai_core::conversation::ConversationStore;
    use maimai_core::domain::message::{ChannelKind, InboundMessage, Role};
    use maimai_core::domain::user::Polarity;
    use maimai_core::errors::BUSY_REPLY;
    use maimai_core::moderation::FastPathClassifier;
    use maimai_core::persona::{PersonaProfile, PersonaRegistry, TraitKind};
    use maimai_core::session::{InMemorySessionStore, SessionTracker};
    use maimai_core::storage::{ProfileStore, StoreError};
    use maimai_db::{InMemoryKnowledgeLog, InMemoryUserStore};
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    use super::{
        format_uptime, ConversationRuntime, RuntimeParts, ADAPT_ACK, ADAPT_FAILED, FEEDBACK_ACK,
        RESET_ACK,
    };
    use crate::adaptation::StyleAdapter;
    use crate::fast_path::FastPathResponder;
    use crate::llm::GatewaySet;
    use crate::pipeline::Pipeline;
    use crate::testing::{happy_answer, PromptKind, ScriptedGateway};

    struct Fixture {
        runtime: ConversationRuntime,
        gateway: Arc<ScriptedGateway>,
        sink: Arc<InMemoryAuditSink>,
        personas: Arc<PersonaRegistry>,
    }

    /// Profile store that yields before every read and write, so concurrent
    /// cache misses interleave.
    #[derive(Default)]
    struct YieldingProfileStore {
        profiles: Mutex<HashMap<String, PersonaProfile>>,
        saved: Mutex<Vec<PersonaProfile>>,
    }

    #[async_trait]
    impl ProfileStore for YieldingProfileStore {
        async fn get(&self, user_id: &str) -> Result<Option<PersonaProfile>, StoreError> {
            tokio::task::yield_now().await;
            Ok(self.profiles.lock().await.get(user_id).cloned())
        }

        async fn save(&self, profile: &PersonaProfile) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.saved.lock().await.push(profile.clone());
            self.profiles.lock().await.insert(profile.user_id.clone(), profile.clone());
            Ok(())
        }
    }

    fn fixture(gateway: ScriptedGateway, deadline_secs: u64) -> Fixture {
        fixture_with_personas(gateway, deadline_secs, Arc::new(PersonaRegistry::default()))
    }

    fn fixture_with_personas(
        gateway: ScriptedGateway,
        deadline_secs: u64,
        personas: Arc<PersonaRegistry>,
    ) -> Fixture {
        let gateway = Arc::new(gateway);
        let sink = Arc::new(InMemoryAuditSink::default());
        let pipeline = Pipeline::new(
            GatewaySet::shared(gateway.clone()),
            Arc::new(InMemoryKnowledgeLog::default()),
            personas.clone(),
            sink.clone(),
            &PipelineConfig { deadline_secs, stage_timeout_secs: 60, max_history: 20 },
        );
        let runtime = ConversationRuntime::new(RuntimeParts {
            sessions: SessionTracker::new(
                InMemorySessionStore::default(),
                Duration::from_secs(180),
                vec!["麦麦".to_owned()],
                0.0,
            ),
            admission: AdmissionController::new(5, 1, 20),
            classifier: FastPathClassifier::new().expect("classifier rules compile"),
            responder: FastPathResponder::canned_only(),
            pipeline,
            adapter: StyleAdapter::new(gateway.clone(), Duration::from_secs(60)),
            conversations: ConversationStore::new(Arc::new(InMemoryUserStore::default()), 20),
            personas: personas.clone(),
            audit: sink.clone(),
        });
        Fixture { runtime, gateway, sink, personas }
    }

    fn group(user: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: format!("{user}-{text}"),
            channel_id: "c1".to_owned(),
            author_id: user.to_owned(),
            text: text.to_owned(),
            channel_kind: ChannelKind::Group,
            is_mentioned: false,
        }
    }

    fn private(user: &str, text: &str) -> InboundMessage {
        InboundMessage { channel_kind: ChannelKind::Private, ..group(user, text) }
    }

    #[tokio::test]
    async fn wake_word_opens_conversation_and_history_records_the_exchange() {
        let fx = fixture(ScriptedGateway::happy(), 60);

        assert_eq!(fx.runtime.handle(&group("u1", "今天天气不错")).await, None);
        assert_eq!(fx.gateway.calls(), 0);

        let reply = fx.runtime.handle(&group("u1", "麦麦 你好")).await;
        assert_eq!(reply.as_deref(), Some(happy_answer(PromptKind::Generation)));

        // Inside the window no wake word is needed.
        assert!(fx.runtime.handle(&group("u1", "再聊聊")).await.is_some());

        let history = fx.runtime.conversations().history("u1");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "你好");
        assert_eq!(history[1].role, Role::Assistant);

        let record = fx.runtime.conversations().record("u1").expect("record");
        assert_eq!(record.emotion_history.len(), 2);
        assert!(fx.sink.event_types().iter().all(|event| event == "dispatch.completed"));
        assert_eq!(fx.runtime.status().doing, "idle");
    }

    #[tokio::test]
    async fn private_messages_need_no_wake_word() {
        let fx = fixture(ScriptedGateway::happy(), 60);
        assert!(fx.runtime.handle(&private("u1", "在吗")).await.is_some());
    }

    #[tokio::test]
    async fn slash_commands_bypass_the_wake_window() {
        let fx = fixture(ScriptedGateway::happy(), 60);

        let ping = fx.runtime.handle(&group("u1", "/ping")).await.expect("ping reply");
        assert!(ping.starts_with("🤖 已运行："));

        fx.runtime.handle(&private("u1", "你好")).await;
        assert_eq!(fx.runtime.conversations().history("u1").len(), 2);
        assert_eq!(fx.runtime.handle(&group("u1", "/reset")).await.as_deref(), Some(RESET_ACK));
        assert!(fx.runtime.conversations().history("u1").is_empty());
        assert_eq!(fx.gateway.calls(), 4);
    }

    #[tokio::test]
    async fn persona_commands_switch_and_reject_unknown_templates() {
        let fx = fixture(ScriptedGateway::happy(), 60);

        let switched = fx.runtime.handle(&group("u1", "/persona caring")).await.expect("reply");
        assert!(switched.contains("暖心麦"));
        assert_eq!(fx.personas.profile("u1").await.template_id, "caring");

        let rejected = fx.runtime.handle(&group("u1", "/persona pirate")).await.expect("reply");
        assert!(rejected.contains("pirate"));
        assert!(rejected.contains("formal"));

        let listing = fx.runtime.handle(&group("u1", "/personas")).await.expect("reply");
        assert_eq!(listing.lines().count(), 1 + fx.personas.templates().len());
    }

    #[tokio::test]
    async fn abusive_message_takes_fast_path_without_inference() {
        let fx = fixture(ScriptedGateway::happy(), 60);

        let reply = fx.runtime.handle(&group("u1", "麦麦 你这个傻逼")).await.expect("reply");

        assert!(!reply.is_empty());
        assert_eq!(fx.gateway.calls(), 0);
        assert!(fx.runtime.conversations().history("u1").is_empty());
        assert_eq!(fx.runtime.admission().snapshot().in_flight, 0);
        assert_eq!(fx.sink.event_types(), vec!["dispatch.fast_path".to_owned()]);
        assert_eq!(
            fx.sink.events()[0].metadata.get("severity").map(String::as_str),
            Some("normal")
        );
    }

    #[tokio::test]
    async fn feedback_is_recorded_without_inference() {
        let fx = fixture(ScriptedGateway::happy(), 60);
        let before = fx.personas.profile("u1").await.traits;

        let reply = fx.runtime.handle(&private("u1", "👍 说得好")).await;

        assert_eq!(reply.as_deref(), Some(FEEDBACK_ACK));
        assert_eq!(fx.gateway.calls(), 0);
        let record = fx.runtime.conversations().record("u1").expect("record");
        assert_eq!(record.feedback.len(), 1);
        assert_eq!(record.feedback[0].polarity, Polarity::Positive);
        assert_eq!(record.feedback[0].raw_marker, "👍 说得好");
        let after = fx.personas.profile("u1").await.traits;
        assert!(after.playfulness >= before.playfulness);
        assert_ne!(after, before);
    }

    #[tokio::test]
    async fn concurrent_feedback_from_one_user_is_not_lost() {
        let store = Arc::new(YieldingProfileStore::default());
        let personas = Arc::new(PersonaRegistry::new(Some(store.clone())));
        let fx = fixture_with_personas(ScriptedGateway::happy(), 60, personas);

        let (first, second) = (private("u1", "👍"), private("u1", "👍 很棒"));
        let (a, b) = tokio::join!(fx.runtime.handle(&first), fx.runtime.handle(&second));
        assert_eq!(a.as_deref(), Some(FEEDBACK_ACK));
        assert_eq!(b.as_deref(), Some(FEEDBACK_ACK));

        let record = fx.runtime.conversations().record("u1").expect("record");
        assert_eq!(record.feedback.len(), 2);

        // The second update builds on the first instead of on the defaults.
        let saved = store.saved.lock().await;
        assert_eq!(saved.len(), 2);
        for kind in TraitKind::ALL {
            let step = saved[1].traits.get(kind) - saved[0].traits.get(kind);
            assert!((0.01 - 1e-9..=0.03 + 1e-9).contains(&step), "{kind:?} moved {step}");
        }
        assert_eq!(fx.personas.profile("u1").await.traits, saved[1].traits);
    }

    #[tokio::test]
    async fn adapt_command_moves_traits_toward_the_sample_style() {
        let fx = fixture(ScriptedGateway::happy(), 60);
        let before = fx.personas.profile("u1").await.traits;

        let reply = fx.runtime.handle(&group("u1", "/adapt 您好，请详细说明一下流程。")).await;

        assert_eq!(reply.as_deref(), Some(ADAPT_ACK));
        assert_eq!(fx.gateway.calls(), 1);
        let after = fx.personas.profile("u1").await.traits;
        assert!(after.formality > before.formality);
        assert!(after.playfulness < before.playfulness);
        assert_eq!(fx.runtime.admission().snapshot().in_flight, 0);
        assert_eq!(
            fx.sink.events()[0].metadata.get("command").map(String::as_str),
            Some("command.adapt_persona")
        );
    }

    #[tokio::test]
    async fn failed_adaptation_keeps_the_profile() {
        let fx = fixture(ScriptedGateway::from_fn(|_, _| Ok("无法判断".to_owned())), 60);
        let before = fx.personas.profile("u1").await.traits;

        let reply = fx.runtime.handle(&private("u1", "/adapt 哈哈哈")).await;

        assert_eq!(reply.as_deref(), Some(ADAPT_FAILED));
        assert_eq!(fx.personas.profile("u1").await.traits, before);
    }

    #[tokio::test]
    async fn introspection_reports_bot_status() {
        let fx = fixture(ScriptedGateway::happy(), 60);
        let reply = fx.runtime.handle(&group("u1", "麦麦 你在做什么")).await;
        assert_eq!(reply.as_deref(), Some("做什么? idle"));
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_yields_busy_reply_and_releases_the_slot() {
        let gateway =
            ScriptedGateway::happy().with_delay(PromptKind::Generation, Duration::from_secs(120));
        let fx = fixture(gateway, 30);

        let reply = fx.runtime.handle(&private("u1", "讲个长故事")).await;

        assert_eq!(reply.as_deref(), Some(BUSY_REPLY));
        assert_eq!(fx.runtime.admission().snapshot().in_flight, 0);
        assert!(fx.sink.event_types().contains(&"dispatch.deadline_exceeded".to_owned()));
        let history = fx.runtime.conversations().history("u1");
        assert_eq!(history.last().map(|m| m.content.as_str()), Some(BUSY_REPLY));
        assert_eq!(fx.runtime.status().doing, "idle");
    }

    #[tokio::test(start_paused = true)]
    async fn same_user_runs_serialize_while_other_users_run_in_parallel() {
        let gateway =
            ScriptedGateway::happy().with_delay(PromptKind::Generation, Duration::from_secs(1));
        let fx = fixture(gateway, 60);

        let (first, second) = (private("u1", "第一条"), private("u1", "第二条"));
        let started = Instant::now();
        let (a, b) = tokio::join!(fx.runtime.handle(&first), fx.runtime.handle(&second));
        assert!(a.is_some() && b.is_some());
        assert!(started.elapsed() >= Duration::from_secs(2));

        let (other, another) = (private("u2", "你好"), private("u3", "你好"));
        let started = Instant::now();
        let (c, d) = tokio::join!(fx.runtime.handle(&other), fx.runtime.handle(&another));
        assert!(c.is_some() && d.is_some());
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(fx.runtime.prune_idle_locks(), 3);
    }

    #[tokio::test]
    async fn fast_runs_grow_the_admission_limit() {
        let fx = fixture(ScriptedGateway::happy(), 60);
        assert_eq!(fx.runtime.admission().current_limit(), 5);

        fx.runtime.handle(&private("u1", "你好")).await;

        assert_eq!(fx.runtime.admission().current_limit(), 6);
    }

    #[test]
    fn uptime_formats_like_a_clock() {
        assert_eq!(format_uptime(0), "0:00:00");
        assert_eq!(format_uptime(3_725), "1:02:05");
        assert_eq!(format_uptime(90_061), "1天 1:01:01");
    }
}
