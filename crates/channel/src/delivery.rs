use std::sync::Mutex;

use async_trait::async_trait;
use maimai_core::InboundMessage;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("reply rejected by channel: {0}")]
    Rejected(String),
    #[error("channel unreachable: {0}")]
    Unreachable(String),
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Quote-replies to the message that triggered the run.
    async fn reply(&self, target: &InboundMessage, text: &str) -> Result<(), DeliveryError>;
    /// Plain send into a channel, used when the quote reply fails.
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), DeliveryError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Replied,
    Sent,
    Failed,
}

/// Delivers `text`, falling back from reply to send. A double failure is
/// logged and contained to this message.
pub async fn deliver(sink: &dyn ReplySink, target: &InboundMessage, text: &str) -> DeliveryOutcome {
    let reply_error = match sink.reply(target, text).await {
        Ok(()) => return DeliveryOutcome::Replied,
        Err(error) => error,
    };
    warn!(
        event_name = "egress.reply.fallback",
        message_id = %target.message_id,
        channel_id = %target.channel_id,
        error = %reply_error,
        "reply failed; sending to channel instead"
    );

    match sink.send(&target.channel_id, text).await {
        Ok(()) => DeliveryOutcome::Sent,
        Err(error) => {
            warn!(
                event_name = "egress.reply.failed",
                message_id = %target.message_id,
                channel_id = %target.channel_id,
                error = %error,
                "reply and fallback send both failed"
            );
            DeliveryOutcome::Failed
        }
    }
}

/// Sink that only logs. Used when no real platform client is wired in.
#[derive(Default)]
pub struct LoggingReplySink;

#[async_trait]
impl ReplySink for LoggingReplySink {
    async fn reply(&self, target: &InboundMessage, text: &str) -> Result<(), DeliveryError> {
        info!(
            event_name = "egress.reply.logged",
            message_id = %target.message_id,
            channel_id = %target.channel_id,
            chars = text.chars().count(),
            "reply"
        );
        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<(), DeliveryError> {
        info!(
            event_name = "egress.send.logged",
            channel_id,
            chars = text.chars().count(),
            "send"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivered {
    Reply { message_id: String, text: String },
    Send { channel_id: String, text: String },
}

/// Records deliveries and can be told to fail either path.
#[derive(Default)]
pub struct RecordingReplySink {
    fail_reply: bool,
    fail_send: bool,
    delivered: Mutex<Vec<Delivered>>,
}

impl RecordingReplySink {
    pub fn failing(fail_reply: bool, fail_send: bool) -> Self {
        Self { fail_reply, fail_send, delivered: Mutex::new(Vec::new()) }
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        match self.delivered.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, item: Delivered) {
        match self.delivered.lock() {
            Ok(mut guard) => guard.push(item),
            Err(poisoned) => poisoned.into_inner().push(item),
        }
    }
}

#[async_trait]
impl ReplySink for RecordingReplySink {
    async fn reply(&self, target: &InboundMessage, text: &str) -> Result<(), DeliveryError> {
        if self.fail_reply {
            return Err(DeliveryError::Rejected("quoted message deleted".to_owned()));
        }
        self.push(Delivered::Reply {
            message_id: target.message_id.clone(),
            text: text.to_owned(),
        });
        Ok(())
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<(), DeliveryError> {
        if self.fail_send {
            return Err(DeliveryError::Unreachable("channel gone".to_owned()));
        }
        self.push(Delivered::Send { channel_id: channel_id.to_owned(), text: text.to_owned() });
        Ok(())
    }
}
