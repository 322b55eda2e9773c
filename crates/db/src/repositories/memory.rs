use std::collections::HashMap;

use tokio::sync::RwLock;

use maimai_core::domain::knowledge::KnowledgeFact;
use maimai_core::persona::PersonaProfile;
use maimai_core::storage::{KnowledgeLog, ProfileStore, StoreError, UserRecordStore, UserRecords};

#[derive(Default)]
pub struct InMemoryUserStore {
    records: RwLock<UserRecords>,
}

#[async_trait::async_trait]
impl UserRecordStore for InMemoryUserStore {
    async fn load_all(&self) -> Result<UserRecords, StoreError> {
        Ok(self.records.read().await.clone())
    }

    async fn save_all(&self, records: &UserRecords) -> Result<(), StoreError> {
        *self.records.write().await = records.clone();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeLog {
    facts: RwLock<Vec<KnowledgeFact>>,
}

#[async_trait::async_trait]
impl KnowledgeLog for InMemoryKnowledgeLog {
    async fn append(&self, fact: KnowledgeFact) -> Result<(), StoreError> {
        self.facts.write().await.push(fact);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<KnowledgeFact>, StoreError> {
        Ok(self.facts.read().await.clone())
    }
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, PersonaProfile>>,
}

#[async_trait::async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, user_id: &str) -> Result<Option<PersonaProfile>, StoreError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn save(&self, profile: &PersonaProfile) -> Result<(), StoreError> {
        self.profiles.write().await.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}
