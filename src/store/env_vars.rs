//! Environment variable repository. Values are stored as SecretBox
//! ciphertext; decryption happens only at container-creation time.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::EnvironmentVariable;

const COLUMNS: &str = "id, application_id, key, value_encrypted, created_at";

pub struct EnvVarRepository {
    pool: SqlitePool,
}

impl EnvVarRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the value for `(application, key)`.
    pub async fn upsert(
        &self,
        application_id: &str,
        key: &str,
        value_encrypted: &str,
    ) -> Result<EnvironmentVariable> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO environment_variables (id, application_id, key, value_encrypted, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(application_id, key) DO UPDATE SET value_encrypted = excluded.value_encrypted",
        )
        .bind(&id)
        .bind(application_id)
        .bind(key)
        .bind(value_encrypted)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(EnvironmentVariable {
            id,
            application_id: application_id.to_string(),
            key: key.to_string(),
            value_encrypted: value_encrypted.to_string(),
            created_at: now,
        })
    }

    pub async fn find(
        &self,
        application_id: &str,
        key: &str,
    ) -> Result<Option<EnvironmentVariable>> {
        let var = sqlx::query_as::<_, EnvironmentVariable>(&format!(
            "SELECT {} FROM environment_variables WHERE application_id = ? AND key = ?",
            COLUMNS
        ))
        .bind(application_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(var)
    }

    pub async fn list_for_app(&self, application_id: &str) -> Result<Vec<EnvironmentVariable>> {
        let vars = sqlx::query_as::<_, EnvironmentVariable>(&format!(
            "SELECT {} FROM environment_variables WHERE application_id = ? ORDER BY key",
            COLUMNS
        ))
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(vars)
    }

    pub async fn delete(&self, application_id: &str, key: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM environment_variables WHERE application_id = ? AND key = ?",
        )
        .bind(application_id)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
