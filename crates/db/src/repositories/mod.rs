use thiserror::Error;

use maimai_core::storage::StoreError;

pub mod memory;
pub mod profile;

pub use memory::{InMemoryKnowledgeLog, InMemoryProfileStore, InMemoryUserStore};
pub use profile::SqlProfileStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Database(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Serialization(message),
        }
    }
}
