use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::knowledge::KnowledgeFact;
use crate::domain::user::UserRecord;
use crate::errors::ApplicationError;
use crate::persona::PersonaProfile;

pub type UserRecords = BTreeMap<String, UserRecord>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("io failure on `{path}`: {message}")]
    Io { path: PathBuf, message: String },
    #[error("serialization failure: {0}")]
    Serialization(String),
    #[error("database failure: {0}")]
    Database(String),
}

impl From<StoreError> for ApplicationError {
    fn from(error: StoreError) -> Self {
        Self::Persistence(error.to_string())
    }
}

/// Whole-map persistence for user records.
#[async_trait]
pub trait UserRecordStore: Send + Sync {
    async fn load_all(&self) -> Result<UserRecords, StoreError>;
    async fn save_all(&self, records: &UserRecords) -> Result<(), StoreError>;
}

/// Append-only list of remembered facts.
#[async_trait]
pub trait KnowledgeLog: Send + Sync {
    async fn append(&self, fact: KnowledgeFact) -> Result<(), StoreError>;
    async fn all(&self) -> Result<Vec<KnowledgeFact>, StoreError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<PersonaProfile>, StoreError>;
    async fn save(&self, profile: &PersonaProfile) -> Result<(), StoreError>;
}
