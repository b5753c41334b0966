//! Domain repository
//!
//! Hostnames are globally unique. At most one domain per application is
//! primary; promoting a domain clears the previous primary in the same
//! transaction.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::{PloyerError, Result};
use crate::models::Domain;

const COLUMNS: &str = "id, application_id, hostname, is_primary, ssl_active, created_at";

pub struct DomainRepository {
    pool: SqlitePool,
}

impl DomainRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        application_id: &str,
        hostname: &str,
        is_primary: bool,
    ) -> Result<Domain> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        if is_primary {
            sqlx::query("UPDATE domains SET is_primary = 0 WHERE application_id = ?")
                .bind(application_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO domains (id, application_id, hostname, is_primary, ssl_active, created_at) \
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(application_id)
        .bind(hostname)
        .bind(is_primary)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Domain {
            id,
            application_id: application_id.to_string(),
            hostname: hostname.to_string(),
            is_primary,
            ssl_active: false,
            created_at: now,
        })
    }

    pub async fn find_by_hostname(&self, hostname: &str) -> Result<Option<Domain>> {
        let domain = sqlx::query_as::<_, Domain>(&format!(
            "SELECT {} FROM domains WHERE hostname = ?",
            COLUMNS
        ))
        .bind(hostname)
        .fetch_optional(&self.pool)
        .await?;

        Ok(domain)
    }

    pub async fn list_for_app(&self, application_id: &str) -> Result<Vec<Domain>> {
        let domains = sqlx::query_as::<_, Domain>(&format!(
            "SELECT {} FROM domains WHERE application_id = ? ORDER BY created_at",
            COLUMNS
        ))
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(domains)
    }

    /// Make `hostname` the primary domain of its application, atomically
    /// clearing the previous primary.
    pub async fn set_primary(&self, application_id: &str, hostname: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE domains SET is_primary = 1 WHERE application_id = ? AND hostname = ?",
        )
        .bind(application_id)
        .bind(hostname)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(PloyerError::NotFound(format!(
                "domain {} not found for application",
                hostname
            )));
        }

        sqlx::query(
            "UPDATE domains SET is_primary = 0 WHERE application_id = ? AND hostname != ?",
        )
        .bind(application_id)
        .bind(hostname)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_ssl_active(&self, hostname: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE domains SET ssl_active = ? WHERE hostname = ?")
            .bind(active)
            .bind(hostname)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete(&self, application_id: &str, hostname: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM domains WHERE application_id = ? AND hostname = ?")
                .bind(application_id)
                .bind(hostname)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
