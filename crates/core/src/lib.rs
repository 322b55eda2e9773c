pub mod admission;
pub mod audit;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod moderation;
pub mod persona;
pub mod session;
pub mod storage;

pub use admission::{AdmissionController, AdmissionPermit, AdmissionSnapshot, LimitChange};
pub use conversation::ConversationStore;
pub use domain::emotion::{Emotion, EmotionReading};
pub use domain::knowledge::KnowledgeFact;
pub use domain::message::{ChannelKind, ChatMessage, InboundMessage, PipelineRequest, Role};
pub use domain::status::{BotStatus, StatusField};
pub use domain::user::{EmotionSample, FeedbackEntry, Polarity, UserRecord};
pub use errors::{ApplicationError, ErrorCategory};
pub use moderation::{Classification, FastPathClassifier, Severity};
pub use persona::{PersonaProfile, PersonaRegistry, PersonaSelection, PersonaTraits};
pub use session::{SessionTracker, WakeDecision};
pub use storage::{KnowledgeLog, ProfileStore, StoreError, UserRecordStore, UserRecords};
