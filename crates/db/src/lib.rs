pub mod connection;
pub mod json_store;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use json_store::{JsonKnowledgeLog, JsonUserStore};
pub use repositories::{
    InMemoryKnowledgeLog, InMemoryProfileStore, InMemoryUserStore, RepositoryError,
    SqlProfileStore,
};
