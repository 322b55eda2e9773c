use std::collections::HashSet;

use maimai_core::config::ChannelConfig;
use maimai_core::{ApplicationError, ChannelKind, InboundMessage};
use serde::Deserialize;
use thiserror::Error;

/// One frame as delivered by the transport. The payload stays raw until
/// [`parse_event`] so a malformed frame can still be acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventEnvelope {
    pub envelope_id: String,
    pub payload: String,
}

impl EventEnvelope {
    pub fn new(envelope_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { envelope_id: envelope_id.into(), payload: payload.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event payload is not valid json: {0}")]
    Json(String),
    #[error("event is missing required field `{0}`")]
    MissingField(&'static str),
}

impl From<EventError> for ApplicationError {
    fn from(error: EventError) -> Self {
        Self::MalformedEvent(error.to_string())
    }
}

/// Wire shape of a chat message event. Every field is optional here so the
/// validation step can name exactly what is missing.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct RawMessageEvent {
    pub message_id: Option<String>,
    pub channel_id: Option<String>,
    pub author_id: Option<String>,
    pub text: Option<String>,
    pub channel_kind: Option<ChannelKind>,
    #[serde(default)]
    pub is_bot_author: bool,
    #[serde(default)]
    pub is_mentioned: bool,
}

impl RawMessageEvent {
    pub fn from_json(payload: &str) -> Result<Self, EventError> {
        serde_json::from_str(payload).map_err(|error| EventError::Json(error.to_string()))
    }

    pub fn validate(self) -> Result<InboundMessage, EventError> {
        Ok(InboundMessage {
            author_id: required(self.author_id, "author_id")?,
            text: self.text.ok_or(EventError::MissingField("text"))?,
            channel_kind: self.channel_kind.ok_or(EventError::MissingField("channel_kind"))?,
            channel_id: required(self.channel_id, "channel_id")?,
            message_id: required(self.message_id, "message_id")?,
            is_mentioned: self.is_mentioned,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, EventError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(EventError::MissingField(field)),
    }
}

/// Drops events the bot must never answer: other bots, configured bot ids,
/// and its own echoes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngressFilter {
    bot_id: Option<String>,
    excluded_bot_ids: HashSet<String>,
}

impl IngressFilter {
    pub fn new(bot_id: Option<String>, excluded_bot_ids: impl IntoIterator<Item = String>) -> Self {
        Self { bot_id, excluded_bot_ids: excluded_bot_ids.into_iter().collect() }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.bot_id.clone(), config.excluded_bot_ids.iter().cloned())
    }

    pub fn admits(&self, event: &RawMessageEvent) -> bool {
        if event.is_bot_author {
            return false;
        }
        let Some(author_id) = event.author_id.as_deref() else {
            return true;
        };
        self.bot_id.as_deref() != Some(author_id) && !self.excluded_bot_ids.contains(author_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ingress {
    Accepted(InboundMessage),
    Filtered,
}

/// Decodes, filters, then validates one payload. Filtering runs before
/// validation so a malformed event from a bot is simply ignored.
pub fn parse_event(payload: &str, filter: &IngressFilter) -> Result<Ingress, EventError> {
    let raw = RawMessageEvent::from_json(payload)?;
    if !filter.admits(&raw) {
        return Ok(Ingress::Filtered);
    }
    raw.validate().map(Ingress::Accepted)
}
