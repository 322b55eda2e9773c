use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::emotion::Emotion;

/// Directive that asks the bot to remember the rest of the message.
pub const REMEMBER_DIRECTIVE: &str = "记住";

/// Characters of the deliberation kept alongside a fact.
pub const THINKING_EXCERPT_CHARS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeFact {
    #[serde(rename = "user")]
    pub user_id: String,
    #[serde(rename = "time")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "fact")]
    pub fact_text: String,
    pub emotion: Emotion,
    #[serde(rename = "thinking")]
    pub thinking_excerpt: String,
}

impl KnowledgeFact {
    /// Builds a fact from a message that starts with the remember directive.
    /// Returns `None` when the directive is absent or nothing follows it.
    pub fn from_directive(
        user_id: &str,
        text: &str,
        emotion: Emotion,
        thinking_process: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<Self> {
        let fact_text = text.trim_start().strip_prefix(REMEMBER_DIRECTIVE)?.trim();
        if fact_text.is_empty() {
            return None;
        }

        Some(Self {
            user_id: user_id.to_owned(),
            timestamp,
            fact_text: fact_text.to_owned(),
            emotion,
            thinking_excerpt: thinking_process.chars().take(THINKING_EXCERPT_CHARS).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::KnowledgeFact;
    use crate::domain::emotion::Emotion;

    #[test]
    fn directive_prefix_yields_fact_with_excerpt() {
        let thinking = "思".repeat(150);
        let fact =
            KnowledgeFact::from_directive("u1", "记住 我喜欢猫", Emotion::Love, &thinking, Utc::now());

        let fact = match fact {
            Some(fact) => fact,
            None => panic!("directive should produce a fact"),
        };
        assert_eq!(fact.fact_text, "我喜欢猫");
        assert_eq!(fact.emotion, Emotion::Love);
        assert_eq!(fact.thinking_excerpt.chars().count(), 100);
    }

    #[test]
    fn missing_directive_or_empty_body_is_ignored() {
        let now = Utc::now();
        assert!(KnowledgeFact::from_directive("u1", "我喜欢猫", Emotion::Neutral, "", now).is_none());
        assert!(KnowledgeFact::from_directive("u1", "记住  ", Emotion::Neutral, "", now).is_none());
        assert!(
            KnowledgeFact::from_directive("u1", "请记住这个", Emotion::Neutral, "", now).is_none()
        );
    }
}
