use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Sadness,
    Anger,
    Fear,
    Surprise,
    Disgust,
    Love,
    Curiosity,
    Neutral,
}

/// Intensity assigned when nothing better than a label is known.
pub const DEFAULT_INTENSITY: f32 = 0.7;

impl Emotion {
    pub const ALL: [Emotion; 9] = [
        Emotion::Joy,
        Emotion::Sadness,
        Emotion::Anger,
        Emotion::Fear,
        Emotion::Surprise,
        Emotion::Disgust,
        Emotion::Love,
        Emotion::Curiosity,
        Emotion::Neutral,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Joy => "joy",
            Self::Sadness => "sadness",
            Self::Anger => "anger",
            Self::Fear => "fear",
            Self::Surprise => "surprise",
            Self::Disgust => "disgust",
            Self::Love => "love",
            Self::Curiosity => "curiosity",
            Self::Neutral => "neutral",
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Joy => &["开心", "快乐", "高兴", "兴奋", "愉悦"],
            Self::Sadness => &["难过", "悲伤", "伤心", "沮丧", "失落"],
            Self::Anger => &["生气", "愤怒", "恼火", "烦躁", "不爽"],
            Self::Fear => &["害怕", "恐惧", "担心", "焦虑", "紧张"],
            Self::Surprise => &["惊讶", "震惊", "意外", "吃惊"],
            Self::Disgust => &["厌恶", "反感", "讨厌", "恶心"],
            Self::Love => &["喜欢", "热爱", "爱"],
            Self::Curiosity => &["好奇", "疑问", "感兴趣"],
            Self::Neutral => &[],
        }
    }

    pub fn emoji_pool(self) -> &'static [&'static str] {
        match self {
            Self::Joy => &["😊", "😄", "😁", "🤗"],
            Self::Sadness => &["😢", "😭", "😔", "🥺"],
            Self::Anger => &["😠", "😡", "😤", "💢"],
            Self::Fear => &["😨", "😰", "😱", "😟"],
            Self::Surprise => &["😲", "😮", "😯", "🤩"],
            Self::Disgust => &["🤢", "😖", "😒", "👎"],
            Self::Love => &["❤️", "😘", "🥰", "💕"],
            Self::Curiosity => &["🤔", "🧐", "👀", "💭"],
            Self::Neutral => &["😐", "🙂", "😌", "😶"],
        }
    }

    /// Finds the first label mentioned in free-form model output.
    pub fn from_label(text: &str) -> Option<Self> {
        let lowered = text.trim().to_lowercase();
        Self::ALL.into_iter().find(|emotion| lowered.contains(emotion.label()))
    }

    /// Keyword scan in declaration order; `Neutral` when nothing matches.
    pub fn detect_by_keywords(text: &str) -> Self {
        let lowered = text.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|emotion| emotion.keywords().iter().any(|keyword| lowered.contains(keyword)))
            .unwrap_or(Self::Neutral)
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub emotion: Emotion,
    pub emoji: String,
    pub intensity: f32,
}

impl EmotionReading {
    pub fn new(emotion: Emotion, emoji: impl Into<String>) -> Self {
        Self { emotion, emoji: emoji.into(), intensity: DEFAULT_INTENSITY }
    }

    pub fn neutral() -> Self {
        Self::new(Emotion::Neutral, Emotion::Neutral.emoji_pool()[0])
    }
}

#[cfg(test)]
mod tests {
    use super::Emotion;

    #[test]
    fn keyword_detection_follows_declaration_order() {
        assert_eq!(Emotion::detect_by_keywords("今天好开心"), Emotion::Joy);
        assert_eq!(Emotion::detect_by_keywords("我有点担心明天"), Emotion::Fear);
        assert_eq!(Emotion::detect_by_keywords("天气怎么样"), Emotion::Neutral);
    }

    #[test]
    fn labels_are_extracted_from_model_output() {
        assert_eq!(Emotion::from_label("  Curiosity\n"), Some(Emotion::Curiosity));
        assert_eq!(Emotion::from_label("情感：sadness"), Some(Emotion::Sadness));
        assert_eq!(Emotion::from_label("不知道"), None);
    }

    #[test]
    fn every_emotion_has_an_emoji() {
        assert!(Emotion::ALL.iter().all(|emotion| !emotion.emoji_pool().is_empty()));
    }
}
