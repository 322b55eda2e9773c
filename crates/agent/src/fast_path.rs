use std::sync::Arc;
use std::time::Duration;

use maimai_core::domain::message::ChatMessage;
use maimai_core::moderation::Severity;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::llm::InferenceGateway;

pub const COUNTER_PROMPT_PREFIX: &str = "你是\"麦麦\"，一个嘴上不饶人但从不说脏话的二次元少女";

const NORMAL_REPLIES: &[&str] = &[
    "就这？就这点本事？我还以为你有多厉害呢",
    "小朋友，网上骂人很勇敢哦，现实中敢这么说话吗？",
    "建议你去看看心理医生，这种表达方式很不健康哦",
    "哈哈哈哈，你急了你急了！看来我戳到痛处了",
    "破防了是吧？这就受不了了？心理素质有待提高啊",
    "emmm...你这反应让我想起了被踩了尾巴的猫",
    "好凶哦～我好怕怕哦～（然而我一点都不怕）",
];

const EXTREME_REPLIES: &[&str] = &[
    "这么毒的话都说得出来，你家人知道你这么没素质吗？",
    "这种话我听多了，换点新鲜的行不行？",
    "说这种话的人，现实生活一定过得很失败吧？可怜",
    "我见过不要脸的，没见过你这么不要脸的",
    "骂人解决不了问题，冷静下来再来找麦麦吧。",
];

const LAST_RESORT_REPLY: &str = "……";
const DEFAULT_COMPLETION_BOUND: Duration = Duration::from_secs(60);

/// Answers abusive messages without entering the pipeline.
pub struct FastPathResponder {
    gateway: Option<Arc<dyn InferenceGateway>>,
    completion_bound: Duration,
    normal: Vec<String>,
    extreme: Vec<String>,
}

impl Default for FastPathResponder {
    fn default() -> Self {
        Self::canned_only()
    }
}

impl FastPathResponder {
    pub fn canned_only() -> Self {
        Self {
            gateway: None,
            completion_bound: DEFAULT_COMPLETION_BOUND,
            normal: NORMAL_REPLIES.iter().map(|reply| (*reply).to_owned()).collect(),
            extreme: EXTREME_REPLIES.iter().map(|reply| (*reply).to_owned()).collect(),
        }
    }

    /// `completion_bound` caps the whole model call, retries included,
    /// since the caller holds an admission slot while it runs.
    pub fn with_gateway(gateway: Arc<dyn InferenceGateway>, completion_bound: Duration) -> Self {
        Self { gateway: Some(gateway), completion_bound, ..Self::canned_only() }
    }

    pub fn pool(&self, severity: Severity) -> &[String] {
        match severity {
            Severity::Extreme => &self.extreme,
            Severity::Normal | Severity::None => &self.normal,
        }
    }

    /// Tries one model call when a gateway is configured; any error, empty
    /// completion or timeout falls back to the canned pool for `severity`.
    pub async fn respond(&self, text: &str, severity: Severity) -> String {
        if let Some(gateway) = &self.gateway {
            let messages = [ChatMessage::system(counter_prompt(severity)), ChatMessage::user(text)];
            match tokio::time::timeout(self.completion_bound, gateway.complete(&messages)).await {
                Ok(Ok(reply)) if !reply.trim().is_empty() => return reply.trim().to_owned(),
                Ok(Ok(_)) => debug!(
                    event_name = "dispatch.fast_path.empty_completion",
                    "falling back to canned reply"
                ),
                Ok(Err(error)) => debug!(
                    event_name = "dispatch.fast_path.gateway_failed",
                    error = %error,
                    "falling back to canned reply"
                ),
                Err(_) => debug!(
                    event_name = "dispatch.fast_path.timed_out",
                    bound_ms = u64::try_from(self.completion_bound.as_millis()).unwrap_or(u64::MAX),
                    "falling back to canned reply"
                ),
            }
        }

        self.canned(severity)
    }

    pub fn canned(&self, severity: Severity) -> String {
        self.pool(severity)
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| LAST_RESORT_REPLY.to_owned())
    }
}

fn counter_prompt(severity: Severity) -> String {
    let tone = match severity {
        Severity::Extreme => "对方的话非常恶劣，请严厉但不带脏字地回击，一句话即可。",
        Severity::Normal | Severity::None => "对方在骂你，请用俏皮、毒舌的方式回怼，一句话即可。",
    };
    format!("{COUNTER_PROMPT_PREFIX}。{tone}")
}
