//! The five pipeline stages. Each stage has a fallible `run` and a total
//! `degraded` default; the orchestrator decides which one is used.

use std::sync::Arc;

use async_trait::async_trait;
use maimai_core::domain::emotion::{Emotion, EmotionReading};
use maimai_core::domain::message::{ChatMessage, PipelineRequest};
use maimai_core::errors::ApplicationError;
use maimai_core::flows::PipelineStage;
use maimai_core::persona::{PersonaRegistry, PersonaSelection};
use maimai_core::storage::{KnowledgeLog, StoreError};
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::warn;

use crate::llm::{GatewayError, InferenceGateway};

pub const EMOTION_PROMPT_PREFIX: &str = "分析以下文本的情感";
pub const THINKING_PROMPT_PREFIX: &str = "分析以下用户问题";
pub const RETRIEVAL_PROMPT_PREFIX: &str = "你是知识检索助手";
pub const REPLY_GUIDE_HEADER: &str = "回复指南：";
pub const CONCLUSION_MARKER: &str = "结论：";
pub const GENERATION_FALLBACK_REPLY: &str = "抱歉，我现在有点小问题，稍后再聊吧~ 😅";

/// Remembered facts offered to the model per run.
const MAX_REMEMBERED_FACTS: usize = 5;
const FALLBACK_EXCERPT_CHARS: usize = 30;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{stage} stage received an empty completion")]
    EmptyCompletion { stage: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<&StageError> for ApplicationError {
    fn from(error: &StageError) -> Self {
        match error {
            StageError::Store(_) => Self::Persistence(error.to_string()),
            StageError::Gateway(_) | StageError::EmptyCompletion { .. } => {
                Self::Inference(error.to_string())
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Deliberation {
    pub thinking_process: String,
    pub conclusion: String,
}

impl Deliberation {
    /// Splits a completion on the first conclusion marker.
    pub fn parse(text: &str) -> Self {
        match text.split_once(CONCLUSION_MARKER) {
            Some((process, rest)) => {
                let conclusion = rest.split(CONCLUSION_MARKER).next().unwrap_or_default();
                Self {
                    thinking_process: process.trim().to_owned(),
                    conclusion: conclusion.trim().to_owned(),
                }
            }
            None => Self { thinking_process: text.trim().to_owned(), conclusion: String::new() },
        }
    }

    pub fn fallback(text: &str) -> Self {
        let excerpt: String = text.chars().take(FALLBACK_EXCERPT_CHARS).collect();
        Self {
            thinking_process: format!("思考过程：我需要回答用户关于'{excerpt}...'的问题。"),
            conclusion: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetrievedContext {
    pub contexts: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedReply {
    pub text: String,
}

/// Everything earlier stages have produced for the current run.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub request: PipelineRequest,
    pub emotion: Option<EmotionReading>,
    pub deliberation: Option<Deliberation>,
    pub retrieved: Option<RetrievedContext>,
    pub persona: Option<PersonaSelection>,
}

impl RunContext {
    pub fn new(request: PipelineRequest) -> Self {
        Self { request, emotion: None, deliberation: None, retrieved: None, persona: None }
    }

    pub fn text(&self) -> &str {
        &self.request.raw_text
    }

    pub fn user_id(&self) -> &str {
        &self.request.user_id
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    type Output: Send;

    fn kind(&self) -> PipelineStage;

    async fn run(&self, ctx: &RunContext) -> Result<Self::Output, StageError>;

    /// Total fallback used when `run` fails or times out.
    fn degraded(&self, ctx: &RunContext) -> Self::Output;
}

fn pick_emoji(emotion: Emotion) -> String {
    emotion
        .emoji_pool()
        .choose(&mut rand::thread_rng())
        .map(|emoji| (*emoji).to_owned())
        .unwrap_or_default()
}

fn non_empty(stage: &'static str, completion: String) -> Result<String, StageError> {
    if completion.trim().is_empty() {
        Err(StageError::EmptyCompletion { stage })
    } else {
        Ok(completion)
    }
}

pub struct EmotionStage {
    gateway: Arc<dyn InferenceGateway>,
}

impl EmotionStage {
    pub fn new(gateway: Arc<dyn InferenceGateway>) -> Self {
        Self { gateway }
    }

    fn prompt(text: &str) -> String {
        format!(
            "{EMOTION_PROMPT_PREFIX}，从这些选项中选择最匹配的一个：\n\
             joy(喜悦), sadness(悲伤), anger(愤怒), fear(恐惧), surprise(惊讶),\n\
             disgust(厌恶), love(喜爱), curiosity(好奇), neutral(中性)\n\n\
             文本：\"{text}\"\n\n\
             只回复一个情感类别，不要解释。"
        )
    }
}

#[async_trait]
impl Stage for EmotionStage {
    type Output = EmotionReading;

    fn kind(&self) -> PipelineStage {
        PipelineStage::Emotion
    }

    async fn run(&self, ctx: &RunContext) -> Result<EmotionReading, StageError> {
        let prompt = ChatMessage::system(Self::prompt(ctx.text()));
        let completion = non_empty("emotion", self.gateway.complete(&[prompt]).await?)?;
        let emotion = Emotion::from_label(&completion).unwrap_or(Emotion::Neutral);
        Ok(EmotionReading::new(emotion, pick_emoji(emotion)))
    }

    fn degraded(&self, ctx: &RunContext) -> EmotionReading {
        let emotion = Emotion::detect_by_keywords(ctx.text());
        EmotionReading::new(emotion, pick_emoji(emotion))
    }
}

pub struct ThinkingStage {
    gateway: Arc<dyn InferenceGateway>,
}

impl ThinkingStage {
    pub fn new(gateway: Arc<dyn InferenceGateway>) -> Self {
        Self { gateway }
    }

    fn prompt(text: &str) -> String {
        format!(
            "{THINKING_PROMPT_PREFIX}，展示你的思考过程：\n\
             问题：{text}\n\n\
             请按以下步骤思考：\n\
             1. 问题理解：这个问题的核心是什么？用户真正想知道的是什么？\n\
             2. 相关知识：需要什么知识来回答？有哪些相关概念和信息？\n\
             3. 推理过程：如何一步步推导出答案？\n\
             4. 多角度思考：有哪些不同的观点或方法？\n\
             5. 最终结论：综合以上，最合理的回答是什么？\n\n\
             以\"思考过程：\"开始，以\"结论：\"结束。保持简洁但全面。"
        )
    }
}

#[async_trait]
impl Stage for ThinkingStage {
    type Output = Deliberation;

    fn kind(&self) -> PipelineStage {
        PipelineStage::Thinking
    }

    async fn run(&self, ctx: &RunContext) -> Result<Deliberation, StageError> {
        let prompt = ChatMessage::system(Self::prompt(ctx.text()));
        let completion = non_empty("thinking", self.gateway.complete(&[prompt]).await?)?;
        Ok(Deliberation::parse(&completion))
    }

    fn degraded(&self, ctx: &RunContext) -> Deliberation {
        Deliberation::fallback(ctx.text())
    }
}

/// Combines the user's remembered facts with a model-generated background
/// note.
pub struct RetrievalStage {
    gateway: Arc<dyn InferenceGateway>,
    knowledge: Arc<dyn KnowledgeLog>,
}

impl RetrievalStage {
    pub fn new(gateway: Arc<dyn InferenceGateway>, knowledge: Arc<dyn KnowledgeLog>) -> Self {
        Self { gateway, knowledge }
    }

    async fn remembered_facts(&self, user_id: &str) -> Vec<String> {
        match self.knowledge.all().await {
            Ok(facts) => {
                let mut own: Vec<String> = facts
                    .into_iter()
                    .filter(|fact| fact.user_id == user_id)
                    .map(|fact| format!("用户曾让我记住：{}", fact.fact_text))
                    .collect();
                let skip = own.len().saturating_sub(MAX_REMEMBERED_FACTS);
                own.drain(..skip);
                own
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.retrieval.knowledge_unavailable",
                    user_id,
                    error = %error,
                    "continuing without remembered facts"
                );
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    type Output = RetrievedContext;

    fn kind(&self) -> PipelineStage {
        PipelineStage::Retrieval
    }

    async fn run(&self, ctx: &RunContext) -> Result<RetrievedContext, StageError> {
        let mut contexts = self.remembered_facts(ctx.user_id()).await;

        let prompt = format!("{RETRIEVAL_PROMPT_PREFIX}，用户问题：{}", ctx.text());
        let note = self.gateway.complete(&[ChatMessage::system(prompt)]).await?;
        if !note.trim().is_empty() {
            contexts.push(note.trim().to_owned());
        }

        Ok(RetrievedContext { contexts })
    }

    fn degraded(&self, _ctx: &RunContext) -> RetrievedContext {
        RetrievedContext::default()
    }
}

pub struct PersonaStage {
    registry: Arc<PersonaRegistry>,
}

impl PersonaStage {
    pub fn new(registry: Arc<PersonaRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Stage for PersonaStage {
    type Output = PersonaSelection;

    fn kind(&self) -> PipelineStage {
        PipelineStage::Persona
    }

    async fn run(&self, ctx: &RunContext) -> Result<PersonaSelection, StageError> {
        let emotion = ctx.emotion.as_ref().map(|reading| reading.emotion);
        Ok(self.registry.persona_instruction(ctx.user_id(), emotion).await)
    }

    fn degraded(&self, _ctx: &RunContext) -> PersonaSelection {
        self.registry.default_selection()
    }
}

pub struct GenerationStage {
    gateway: Arc<dyn InferenceGateway>,
}

impl GenerationStage {
    pub fn new(gateway: Arc<dyn InferenceGateway>) -> Self {
        Self { gateway }
    }

    pub fn system_prompt(ctx: &RunContext, fallback_persona: &str) -> String {
        let persona = ctx
            .persona
            .as_ref()
            .map(|selection| selection.persona_instruction.as_str())
            .unwrap_or(fallback_persona);
        let mut prompt = format!("{persona}\n\n");

        if let Some(deliberation) = &ctx.deliberation {
            if !deliberation.thinking_process.is_empty() {
                prompt.push_str(&format!("思考过程：\n{}\n\n", deliberation.thinking_process));
            }
        }

        prompt.push_str("参考信息：\n");
        if let Some(retrieved) = &ctx.retrieved {
            let lines: Vec<String> =
                retrieved.contexts.iter().map(|context| format!("- {context}")).collect();
            prompt.push_str(&lines.join("\n"));
        }
        prompt.push_str("\n\n");

        let (emotion, emoji) = ctx
            .emotion
            .as_ref()
            .map(|reading| (reading.emotion.label(), reading.emoji.as_str()))
            .unwrap_or((Emotion::Neutral.label(), ""));
        prompt.push_str(&format!("用户情绪：{emotion} {emoji}\n"));

        prompt.push_str(&format!(
            "\n{REPLY_GUIDE_HEADER}\n\
             1. 根据思考过程和参考信息，给出有见解但自然的回答\n\
             2. 使用与用户情绪相匹配的语气和表达方式\n\
             3. 保持自然的对话风格，像真人一样说话，避免过于夸张的表达\n\
             4. 适当使用emoji，但每条消息不超过1-2个\n\
             5. 回复长度适中，避免过长或过短\n\
             6. 不要使用特殊格式标记，如Markdown或HTML\n"
        ));
        prompt
    }

    pub fn messages(ctx: &RunContext, fallback_persona: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(ctx.request.history.len() + 2);
        messages.push(ChatMessage::system(Self::system_prompt(ctx, fallback_persona)));
        messages.extend(ctx.request.history.iter().cloned());
        messages.push(ChatMessage::user(ctx.text()));
        messages
    }
}

#[async_trait]
impl Stage for GenerationStage {
    type Output = GeneratedReply;

    fn kind(&self) -> PipelineStage {
        PipelineStage::Generation
    }

    async fn run(&self, ctx: &RunContext) -> Result<GeneratedReply, StageError> {
        let messages = Self::messages(ctx, "");
        let completion = self.gateway.complete(&messages).await?;
        Ok(GeneratedReply { text: non_empty("generation", completion)?.trim().to_owned() })
    }

    fn degraded(&self, _ctx: &RunContext) -> GeneratedReply {
        GeneratedReply { text: GENERATION_FALLBACK_REPLY.to_owned() }
    }
}
