use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::emotion::Emotion;
use crate::domain::message::ChatMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub const POSITIVE_MARKER: &'static str = "👍";
    pub const NEGATIVE_MARKER: &'static str = "👎";

    /// Detects a leading feedback marker.
    pub fn from_prefix(text: &str) -> Option<Self> {
        let trimmed = text.trim_start();
        if trimmed.starts_with(Self::POSITIVE_MARKER) {
            Some(Self::Positive)
        } else if trimmed.starts_with(Self::NEGATIVE_MARKER) {
            Some(Self::Negative)
        } else {
            None
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Self::Positive => Self::POSITIVE_MARKER,
            Self::Negative => Self::NEGATIVE_MARKER,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub user_id: String,
    #[serde(rename = "time")]
    pub timestamp: DateTime<Utc>,
    pub polarity: Polarity,
    #[serde(rename = "feedback")]
    pub raw_marker: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmotionSample {
    #[serde(rename = "time")]
    pub timestamp: DateTime<Utc>,
    pub emotion: Emotion,
    pub intensity: f32,
    pub text: String,
}

/// Persisted per-user record. Field names are the on-disk JSON schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default)]
    pub emotion_history: Vec<EmotionSample>,
    #[serde(default)]
    pub feedback: Vec<FeedbackEntry>,
}

#[cfg(test)]
mod tests {
    use super::{Polarity, UserRecord};

    #[test]
    fn feedback_markers_are_detected_at_message_start() {
        assert_eq!(Polarity::from_prefix("👍 说得好"), Some(Polarity::Positive));
        assert_eq!(Polarity::from_prefix("  👎"), Some(Polarity::Negative));
        assert_eq!(Polarity::from_prefix("说得好 👍"), None);
    }

    #[test]
    fn sparse_records_deserialize_with_defaults() -> Result<(), serde_json::Error> {
        let record: UserRecord = serde_json::from_str(r#"{"history":[]}"#)?;
        assert!(record.feedback.is_empty());
        assert!(record.emotion.is_none());
        assert!(record.last_message_time.is_none());
        Ok(())
    }
}
