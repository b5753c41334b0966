//! Deploy key repository. Exactly one key pair exists per application with a
//! git URL; regeneration replaces the old pair in one transaction.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::DeployKey;

const COLUMNS: &str = "id, application_id, public_key, private_key_encrypted, created_at";

pub struct DeployKeyRepository {
    pool: SqlitePool,
}

impl DeployKeyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_for_app(&self, application_id: &str) -> Result<Option<DeployKey>> {
        let key = sqlx::query_as::<_, DeployKey>(&format!(
            "SELECT {} FROM deploy_keys WHERE application_id = ?",
            COLUMNS
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Install a new key pair, destroying any previous one atomically.
    pub async fn replace(
        &self,
        application_id: &str,
        public_key: &str,
        private_key_encrypted: &str,
    ) -> Result<DeployKey> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM deploy_keys WHERE application_id = ?")
            .bind(application_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO deploy_keys (id, application_id, public_key, private_key_encrypted, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(application_id)
        .bind(public_key)
        .bind(private_key_encrypted)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DeployKey {
            id,
            application_id: application_id.to_string(),
            public_key: public_key.to_string(),
            private_key_encrypted: private_key_encrypted.to_string(),
            created_at: now,
        })
    }
}
