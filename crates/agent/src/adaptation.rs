use std::sync::Arc;
use std::time::Duration;

use maimai_core::domain::message::ChatMessage;
use maimai_core::persona::{PersonaRegistry, PersonaTraits, StyleScores};
use thiserror::Error;
use tracing::{debug, info};

use crate::llm::{GatewayError, InferenceGateway};

pub const STYLE_PROMPT_PREFIX: &str = "分析以下用户消息的交流风格特点";

#[derive(Debug, Error)]
pub enum AdaptationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("style analysis timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("style analysis returned no usable scores")]
    Unparseable,
}

/// Scores a user's writing style with one model call and nudges their
/// persona traits toward it.
pub struct StyleAdapter {
    gateway: Arc<dyn InferenceGateway>,
    timeout: Duration,
}

impl StyleAdapter {
    pub fn new(gateway: Arc<dyn InferenceGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub async fn analyze(&self, text: &str) -> Result<StyleScores, AdaptationError> {
        let messages = [ChatMessage::system(style_prompt()), ChatMessage::user(text)];
        let completion = tokio::time::timeout(self.timeout, self.gateway.complete(&messages))
            .await
            .map_err(|_| AdaptationError::Timeout {
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })??;
        StyleScores::from_completion(&completion).ok_or(AdaptationError::Unparseable)
    }

    /// Returns the adapted traits, or `None` when analysis failed and the
    /// profile was left untouched.
    pub async fn adapt(
        &self,
        personas: &PersonaRegistry,
        user_id: &str,
        text: &str,
    ) -> Option<PersonaTraits> {
        match self.analyze(text).await {
            Ok(style) => {
                let traits = personas.adapt(user_id, &style).await;
                info!(event_name = "persona.adapted", user_id, "persona adapted to user style");
                Some(traits)
            }
            Err(error) => {
                debug!(
                    event_name = "persona.adapt_skipped",
                    user_id,
                    error = %error,
                    "style analysis failed, persona unchanged"
                );
                None
            }
        }
    }
}

fn style_prompt() -> String {
    format!(
        "{STYLE_PROMPT_PREFIX}，并给出以下维度的评分（0-1）：\n\
         - formal：正式程度\n\
         - playful：活泼程度\n\
         - emotional：情感强度\n\
         - creative：创意程度\n\
         - detailed：详细程度\n\
         只返回JSON，例如：{{\"formal\": 0.3, \"playful\": 0.8, \"emotional\": 0.5, \
         \"creative\": 0.4, \"detailed\": 0.6}}"
    )
}
