//! Webhook and delivery-record repository

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{Webhook, WebhookDelivery, WebhookDeliveryStatus, WebhookProvider};

const WEBHOOK_COLUMNS: &str = "id, application_id, provider, secret, enabled, created_at, updated_at";

const DELIVERY_COLUMNS: &str = "id, webhook_id, application_id, provider, event_type, branch, \
     commit_sha, commit_message, author, status, deployment_id, delivered_at";

pub struct WebhookRepository {
    pool: SqlitePool,
}

impl WebhookRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the webhook for an application, or rotate its secret and
    /// provider if one already exists.
    pub async fn upsert(
        &self,
        application_id: &str,
        provider: WebhookProvider,
        secret: &str,
    ) -> Result<Webhook> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO webhooks (id, application_id, provider, secret, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 1, ?, ?) \
             ON CONFLICT(application_id) DO UPDATE SET \
               provider = excluded.provider, \
               secret = excluded.secret, \
               enabled = 1, \
               updated_at = excluded.updated_at",
        )
        .bind(&id)
        .bind(application_id)
        .bind(provider)
        .bind(secret)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        // The row keeps its original id on conflict, so read it back
        self.find_for_app(application_id).await?.ok_or_else(|| {
            crate::errors::PloyerError::Internal("webhook upsert lost the row".to_string())
        })
    }

    pub async fn find_for_app(&self, application_id: &str) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>(&format!(
            "SELECT {} FROM webhooks WHERE application_id = ?",
            WEBHOOK_COLUMNS
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(webhook)
    }

    pub async fn set_enabled(&self, application_id: &str, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE webhooks SET enabled = ?, updated_at = ? WHERE application_id = ?")
            .bind(enabled)
            .bind(Utc::now())
            .bind(application_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete(&self, application_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhooks WHERE application_id = ?")
            .bind(application_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Append one delivery record.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_delivery(
        &self,
        webhook_id: &str,
        application_id: &str,
        provider: WebhookProvider,
        event_type: &str,
        branch: Option<&str>,
        commit_sha: Option<&str>,
        commit_message: Option<&str>,
        author: Option<&str>,
        status: WebhookDeliveryStatus,
        deployment_id: Option<&str>,
    ) -> Result<WebhookDelivery> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO webhook_deliveries \
             (id, webhook_id, application_id, provider, event_type, branch, commit_sha, \
              commit_message, author, status, deployment_id, delivered_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(webhook_id)
        .bind(application_id)
        .bind(provider)
        .bind(event_type)
        .bind(branch)
        .bind(commit_sha)
        .bind(commit_message)
        .bind(author)
        .bind(status)
        .bind(deployment_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(WebhookDelivery {
            id,
            webhook_id: webhook_id.to_string(),
            application_id: application_id.to_string(),
            provider,
            event_type: event_type.to_string(),
            branch: branch.map(|s| s.to_string()),
            commit_sha: commit_sha.map(|s| s.to_string()),
            commit_message: commit_message.map(|s| s.to_string()),
            author: author.map(|s| s.to_string()),
            status,
            deployment_id: deployment_id.map(|s| s.to_string()),
            delivered_at: now,
        })
    }

    pub async fn list_deliveries(
        &self,
        application_id: &str,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>> {
        let deliveries = sqlx::query_as::<_, WebhookDelivery>(&format!(
            "SELECT {} FROM webhook_deliveries \
             WHERE application_id = ? ORDER BY delivered_at DESC LIMIT ?",
            DELIVERY_COLUMNS
        ))
        .bind(application_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(deliveries)
    }
}
