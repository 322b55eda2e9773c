use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One message worth of work for the pipeline. Owned by exactly one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineRequest {
    pub user_id: String,
    pub raw_text: String,
    pub history: Vec<ChatMessage>,
}

impl PipelineRequest {
    pub fn new(
        user_id: impl Into<String>,
        raw_text: impl Into<String>,
        history: Vec<ChatMessage>,
    ) -> Self {
        Self { user_id: user_id.into(), raw_text: raw_text.into(), history }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Private,
    Group,
}

/// A validated chat message from a human author.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub text: String,
    pub channel_kind: ChannelKind,
    pub is_mentioned: bool,
}

impl InboundMessage {
    pub fn is_private(&self) -> bool {
        self.channel_kind == ChannelKind::Private
    }
}
