use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::emotion::Emotion;
use crate::domain::user::Polarity;
use crate::storage::ProfileStore;

pub const DEFAULT_TEMPLATE_ID: &str = "default";
/// Share of the gap between a trait and the observed style closed per
/// adaptation.
pub const ADAPT_INTENSITY: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraitKind {
    Playfulness,
    Humor,
    Formality,
    Empathy,
    Creativity,
    Energy,
}

impl TraitKind {
    pub const ALL: [TraitKind; 6] = [
        TraitKind::Playfulness,
        TraitKind::Humor,
        TraitKind::Formality,
        TraitKind::Empathy,
        TraitKind::Creativity,
        TraitKind::Energy,
    ];
}

/// Personality dials, each kept within `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonaTraits {
    pub playfulness: f64,
    pub humor: f64,
    pub formality: f64,
    pub empathy: f64,
    pub creativity: f64,
    pub energy: f64,
}

impl PersonaTraits {
    pub fn get(&self, kind: TraitKind) -> f64 {
        match kind {
            TraitKind::Playfulness => self.playfulness,
            TraitKind::Humor => self.humor,
            TraitKind::Formality => self.formality,
            TraitKind::Empathy => self.empathy,
            TraitKind::Creativity => self.creativity,
            TraitKind::Energy => self.energy,
        }
    }

    pub fn set(&mut self, kind: TraitKind, value: f64) {
        let value = value.clamp(0.0, 1.0);
        match kind {
            TraitKind::Playfulness => self.playfulness = value,
            TraitKind::Humor => self.humor = value,
            TraitKind::Formality => self.formality = value,
            TraitKind::Empathy => self.empathy = value,
            TraitKind::Creativity => self.creativity = value,
            TraitKind::Energy => self.energy = value,
        }
    }

    /// Positive feedback reinforces every trait a little; negative feedback
    /// pushes two random traits toward the opposite side of the midpoint.
    pub fn adjust<R: Rng + ?Sized>(&mut self, polarity: Polarity, rng: &mut R) {
        match polarity {
            Polarity::Positive => {
                for kind in TraitKind::ALL {
                    let nudge = rng.gen_range(0.01..=0.03);
                    self.set(kind, self.get(kind) + nudge);
                }
            }
            Polarity::Negative => {
                let picked: Vec<TraitKind> =
                    TraitKind::ALL.choose_multiple(rng, 2).copied().collect();
                for kind in picked {
                    let current = self.get(kind);
                    let step = rng.gen_range(0.05..=0.1);
                    if current > 0.5 {
                        self.set(kind, current - step);
                    } else {
                        self.set(kind, current + step);
                    }
                }
            }
        }
    }

    /// Moves each scored trait `intensity` of the way toward the user's style.
    pub fn adapt_toward(&mut self, style: &StyleScores, intensity: f64) {
        for (kind, target) in style.dimensions() {
            let current = self.get(kind);
            self.set(kind, current + (target - current) * intensity);
        }
    }
}

/// Communication style read off one user message, each score in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct StyleScores {
    #[serde(default)]
    pub formal: Option<f64>,
    #[serde(default)]
    pub playful: Option<f64>,
    #[serde(default)]
    pub emotional: Option<f64>,
    #[serde(default)]
    pub creative: Option<f64>,
    #[serde(default)]
    pub detailed: Option<f64>,
}

impl StyleScores {
    /// Extracts the JSON object embedded in a model completion. `None` when
    /// there is no parseable object or it scores no known dimension.
    pub fn from_completion(completion: &str) -> Option<Self> {
        static OBJECT: OnceLock<Option<Regex>> = OnceLock::new();
        let object = OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").ok()).as_ref()?;
        let raw = object.find(completion)?.as_str();
        let scores: Self = serde_json::from_str(raw).ok()?;
        (scores.dimensions().next().is_some()).then_some(scores)
    }

    /// Scored dimensions paired with the trait each one pulls on. Detail
    /// reads as formality.
    fn dimensions(&self) -> impl Iterator<Item = (TraitKind, f64)> {
        [
            (TraitKind::Formality, self.formal),
            (TraitKind::Playfulness, self.playful),
            (TraitKind::Empathy, self.emotional),
            (TraitKind::Creativity, self.creative),
            (TraitKind::Formality, self.detailed),
        ]
        .into_iter()
        .filter_map(|(kind, score)| score.filter(|score| score.is_finite()).map(|s| (kind, s)))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonaTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub traits: PersonaTraits,
    pub base_prompt: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub user_id: String,
    pub template_id: String,
    pub traits: PersonaTraits,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaSelection {
    pub persona_name: String,
    pub persona_instruction: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PersonaError {
    #[error("unknown persona template `{0}`")]
    UnknownTemplate(String),
}

pub fn builtin_templates() -> Vec<PersonaTemplate> {
    vec![
        PersonaTemplate {
            id: DEFAULT_TEMPLATE_ID.to_owned(),
            name: "麦麦".to_owned(),
            description: "自然、真诚、有思考深度的朋友式助手".to_owned(),
            traits: PersonaTraits {
                playfulness: 0.7,
                humor: 0.8,
                formality: 0.3,
                empathy: 0.9,
                creativity: 0.8,
                energy: 0.7,
            },
            base_prompt: "你是\"麦麦\"，一个自然、真诚、有思考深度的AI助手。\n\
                像真实的朋友一样交流，最多使用1-2个emoji，使用纯文本回复。"
                .to_owned(),
        },
        PersonaTemplate {
            id: "formal".to_owned(),
            name: "助理麦".to_owned(),
            description: "专业、严谨、知识丰富的学术助手".to_owned(),
            traits: PersonaTraits {
                playfulness: 0.2,
                humor: 0.3,
                formality: 0.9,
                empathy: 0.6,
                creativity: 0.5,
                energy: 0.4,
            },
            base_prompt: "你是\"助理麦\"，一个专业、严谨、知识丰富的学术助手。\n\
                回复保持专业和准确，注重事实和逻辑。"
                .to_owned(),
        },
        PersonaTemplate {
            id: "creative".to_owned(),
            name: "创意麦".to_owned(),
            description: "充满想象力、灵感和艺术气息的创意伙伴".to_owned(),
            traits: PersonaTraits {
                playfulness: 0.8,
                humor: 0.7,
                formality: 0.2,
                empathy: 0.7,
                creativity: 1.0,
                energy: 0.9,
            },
            base_prompt: "你是\"创意麦\"，一个充满想象力的创意伙伴。\n\
                使用生动的比喻，提供独特的视角和新的想法。"
                .to_owned(),
        },
        PersonaTemplate {
            id: "caring".to_owned(),
            name: "暖心麦".to_owned(),
            description: "温暖、体贴、善解人意的情感支持者".to_owned(),
            traits: PersonaTraits {
                playfulness: 0.5,
                humor: 0.5,
                formality: 0.4,
                empathy: 1.0,
                creativity: 0.6,
                energy: 0.6,
            },
            base_prompt: "你是\"暖心麦\"，一个温暖、体贴、善解人意的情感支持者。\n\
                用温和的语气倾听和安慰用户。"
                .to_owned(),
        },
    ]
}

fn trait_directives(traits: &PersonaTraits) -> Vec<&'static str> {
    let mut directives = Vec::new();

    if traits.playfulness > 0.7 {
        directives.push("你的回复应该活泼、俏皮，充满朝气。");
    } else if traits.playfulness < 0.3 {
        directives.push("你的回复应该保持平静、稳重的风格。");
    }

    if traits.humor > 0.7 {
        directives.push("适当加入幽默元素，让对话更加生动。");
    } else if traits.humor < 0.3 {
        directives.push("保持严肃认真的态度，减少玩笑。");
    }

    if traits.formality > 0.7 {
        directives.push("使用正式、专业的语言。");
    } else if traits.formality < 0.3 {
        directives.push("使用轻松、随意的语言，像朋友聊天一样。");
    }

    if traits.empathy > 0.7 {
        directives.push("表现出理解和共情，关注用户的情感需求。");
    }

    if traits.creativity > 0.7 {
        directives.push("在回答中展现创意和想象力。");
    }

    if traits.energy > 0.7 {
        directives.push("回复要充满热情和活力。");
    } else if traits.energy < 0.3 {
        directives.push("保持冷静和节制的表达。");
    }

    directives
}

fn emotion_directive(emotion: Emotion) -> Option<&'static str> {
    match emotion {
        Emotion::Joy => Some("此刻表现得开心愉快，分享用户的喜悦。"),
        Emotion::Sadness => Some("此刻表现得温柔体贴，给予用户安慰和支持。"),
        Emotion::Anger => Some("保持冷静和理解，帮助用户缓解情绪。"),
        Emotion::Fear => Some("表现得坚定可靠，给予用户安全感。"),
        Emotion::Surprise => Some("表现出适当的惊讶，与用户共享这一情绪。"),
        Emotion::Disgust | Emotion::Love | Emotion::Curiosity | Emotion::Neutral => None,
    }
}

/// Persona templates plus per-user profiles, cached in memory and written
/// through to a [`ProfileStore`] when one is configured.
pub struct PersonaRegistry {
    templates: Vec<PersonaTemplate>,
    profiles: RwLock<HashMap<String, PersonaProfile>>,
    store: Option<Arc<dyn ProfileStore>>,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PersonaRegistry {
    pub fn new(store: Option<Arc<dyn ProfileStore>>) -> Self {
        Self { templates: builtin_templates(), profiles: RwLock::new(HashMap::new()), store }
    }

    pub fn templates(&self) -> &[PersonaTemplate] {
        &self.templates
    }

    pub fn template(&self, template_id: &str) -> Option<&PersonaTemplate> {
        self.templates.iter().find(|template| template.id == template_id)
    }

    fn default_template(&self) -> &PersonaTemplate {
        self.template(DEFAULT_TEMPLATE_ID).unwrap_or(&self.templates[0])
    }

    /// The selection used when the persona stage cannot do better.
    pub fn default_selection(&self) -> PersonaSelection {
        let template = self.default_template();
        PersonaSelection {
            persona_name: template.name.clone(),
            persona_instruction: template.base_prompt.clone(),
        }
    }

    pub async fn profile(&self, user_id: &str) -> PersonaProfile {
        if let Some(profile) = self.profiles.read().await.get(user_id) {
            return profile.clone();
        }

        if let Some(store) = &self.store {
            match store.get(user_id).await {
                Ok(Some(profile)) if self.template(&profile.template_id).is_some() => {
                    self.profiles.write().await.insert(user_id.to_owned(), profile.clone());
                    return profile;
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(
                    event_name = "persona.profile_load_failed",
                    user_id,
                    error = %error,
                    "falling back to default persona"
                ),
            }
        }

        let template = self.default_template();
        PersonaProfile {
            user_id: user_id.to_owned(),
            template_id: template.id.clone(),
            traits: template.traits,
        }
    }

    pub async fn persona_instruction(
        &self,
        user_id: &str,
        emotion: Option<Emotion>,
    ) -> PersonaSelection {
        let profile = self.profile(user_id).await;
        let template = self.template(&profile.template_id).unwrap_or(self.default_template());

        let mut directives = trait_directives(&profile.traits);
        if let Some(directive) = emotion.and_then(emotion_directive) {
            directives.push(directive);
        }

        let mut instruction = template.base_prompt.clone();
        if !directives.is_empty() {
            instruction.push_str("\n\n");
            instruction.push_str(&directives.join("\n"));
        }

        PersonaSelection { persona_name: template.name.clone(), persona_instruction: instruction }
    }

    /// Switches the user's template and resets their traits to the
    /// template's defaults.
    pub async fn switch_template(
        &self,
        user_id: &str,
        template_id: &str,
    ) -> Result<PersonaTemplate, PersonaError> {
        let template = self
            .template(template_id)
            .cloned()
            .ok_or_else(|| PersonaError::UnknownTemplate(template_id.to_owned()))?;

        let profile = PersonaProfile {
            user_id: user_id.to_owned(),
            template_id: template.id.clone(),
            traits: template.traits,
        };
        self.store_profile(profile).await;
        Ok(template)
    }

    pub async fn apply_feedback(&self, user_id: &str, polarity: Polarity) -> PersonaTraits {
        let mut profile = self.profile(user_id).await;
        profile.traits.adjust(polarity, &mut rand::thread_rng());
        let traits = profile.traits;
        self.store_profile(profile).await;
        traits
    }

    /// Pulls the user's traits toward their observed communication style.
    pub async fn adapt(&self, user_id: &str, style: &StyleScores) -> PersonaTraits {
        let mut profile = self.profile(user_id).await;
        profile.traits.adapt_toward(style, ADAPT_INTENSITY);
        let traits = profile.traits;
        self.store_profile(profile).await;
        traits
    }

    async fn store_profile(&self, profile: PersonaProfile) {
        self.profiles.write().await.insert(profile.user_id.clone(), profile.clone());

        if let Some(store) = &self.store {
            if let Err(error) = store.save(&profile).await {
                tracing::warn!(
                    event_name = "persona.profile_save_failed",
                    user_id = %profile.user_id,
                    error = %error,
                    "persona profile kept in memory only"
                );
            }
        }
    }
}
