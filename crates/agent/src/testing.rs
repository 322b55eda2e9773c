use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use maimai_core::domain::message::ChatMessage;

use crate::llm::{GatewayError, InferenceGateway};

/// Which stage produced a request, recognised from its leading system prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PromptKind {
    Emotion,
    Thinking,
    Retrieval,
    Generation,
    FastPath,
    Style,
    Other,
}

impl PromptKind {
    pub(crate) fn of(messages: &[ChatMessage]) -> Self {
        let first = messages.first().map(|message| message.content.as_str()).unwrap_or_default();
        if first.starts_with(crate::stages::EMOTION_PROMPT_PREFIX) {
            Self::Emotion
        } else if first.starts_with(crate::stages::THINKING_PROMPT_PREFIX) {
            Self::Thinking
        } else if first.starts_with(crate::stages::RETRIEVAL_PROMPT_PREFIX) {
            Self::Retrieval
        } else if first.contains(crate::stages::REPLY_GUIDE_HEADER) {
            Self::Generation
        } else if first.starts_with(crate::fast_path::COUNTER_PROMPT_PREFIX) {
            Self::FastPath
        } else if first.starts_with(crate::adaptation::STYLE_PROMPT_PREFIX) {
            Self::Style
        } else {
            Self::Other
        }
    }
}

type Responder = dyn Fn(PromptKind, &[ChatMessage]) -> Result<String, GatewayError> + Send + Sync;

/// Gateway fake that answers from a closure, optionally after a delay.
pub(crate) struct ScriptedGateway {
    responder: Box<Responder>,
    delays: Mutex<Vec<(PromptKind, Duration)>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<PromptKind>>,
}

impl ScriptedGateway {
    pub(crate) fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(PromptKind, &[ChatMessage]) -> Result<String, GatewayError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delays: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Answers every stage with a plausible completion.
    pub(crate) fn happy() -> Self {
        Self::from_fn(|kind, _| Ok(happy_answer(kind).to_owned()))
    }

    pub(crate) fn failing(error: GatewayError) -> Self {
        Self::from_fn(move |_, _| Err(error.clone()))
    }

    pub(crate) fn with_delay(self, kind: PromptKind, delay: Duration) -> Self {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push((kind, delay));
        }
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<PromptKind> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

pub(crate) fn happy_answer(kind: PromptKind) -> &'static str {
    match kind {
        PromptKind::Emotion => "joy",
        PromptKind::Thinking => "思考过程：用户在打招呼。结论：热情回应",
        PromptKind::Retrieval => "打招呼是礼貌的开场",
        PromptKind::Generation => "你好呀！今天过得怎么样？",
        PromptKind::FastPath => "好凶哦，麦麦不跟你计较",
        PromptKind::Style => "{\"formal\": 0.9, \"playful\": 0.1, \"detailed\": 0.8}",
        PromptKind::Other => "ok",
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let kind = PromptKind::of(messages);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(kind);
        }

        let delay = self.delays.lock().ok().and_then(|delays| {
            delays.iter().find(|(delayed, _)| *delayed == kind).map(|(_, delay)| *delay)
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        (self.responder)(kind, messages)
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
