use chrono::Utc;
use sqlx::Row;

use maimai_core::persona::{PersonaProfile, PersonaTraits};
use maimai_core::storage::{ProfileStore, StoreError};

use super::RepositoryError;
use crate::DbPool;

pub struct SqlProfileStore {
    pool: DbPool,
}

impl SqlProfileStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find(&self, user_id: &str) -> Result<Option<PersonaProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, template_id, traits_json
             FROM persona_profile
             WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_profile).transpose()
    }

    async fn upsert(&self, profile: &PersonaProfile) -> Result<(), RepositoryError> {
        let traits_json = serde_json::to_string(&profile.traits)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO persona_profile (user_id, template_id, traits_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                template_id = excluded.template_id,
                traits_json = excluded.traits_json,
                updated_at = excluded.updated_at",
        )
        .bind(&profile.user_id)
        .bind(&profile.template_id)
        .bind(traits_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<PersonaProfile, RepositoryError> {
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let template_id: String =
        row.try_get("template_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let traits_json: String =
        row.try_get("traits_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let traits: PersonaTraits =
        serde_json::from_str(&traits_json).map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(PersonaProfile { user_id, template_id, traits })
}

#[async_trait::async_trait]
impl ProfileStore for SqlProfileStore {
    async fn get(&self, user_id: &str) -> Result<Option<PersonaProfile>, StoreError> {
        Ok(self.find(user_id).await?)
    }

    async fn save(&self, profile: &PersonaProfile) -> Result<(), StoreError> {
        Ok(self.upsert(profile).await?)
    }
}
