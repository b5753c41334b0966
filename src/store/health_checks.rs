//! Health-check configuration and result repository

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{HealthCheck, HealthCheckResult, HealthStatus};

const CONFIG_COLUMNS: &str = "id, application_id, path, interval_seconds, timeout_seconds, \
     healthy_threshold, unhealthy_threshold, created_at";

const RESULT_COLUMNS: &str = "id, application_id, container_id, status, response_time_ms, \
     status_code, error_message, checked_at";

pub struct HealthCheckRepository {
    pool: SqlitePool,
}

impl HealthCheckRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Install or replace the probe configuration for an application.
    pub async fn upsert(
        &self,
        application_id: &str,
        path: &str,
        interval_seconds: i64,
        timeout_seconds: i64,
        healthy_threshold: i64,
        unhealthy_threshold: i64,
    ) -> Result<HealthCheck> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO health_checks \
             (id, application_id, path, interval_seconds, timeout_seconds, \
              healthy_threshold, unhealthy_threshold, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(application_id) DO UPDATE SET \
               path = excluded.path, \
               interval_seconds = excluded.interval_seconds, \
               timeout_seconds = excluded.timeout_seconds, \
               healthy_threshold = excluded.healthy_threshold, \
               unhealthy_threshold = excluded.unhealthy_threshold",
        )
        .bind(&id)
        .bind(application_id)
        .bind(path)
        .bind(interval_seconds)
        .bind(timeout_seconds)
        .bind(healthy_threshold)
        .bind(unhealthy_threshold)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(HealthCheck {
            id,
            application_id: application_id.to_string(),
            path: path.to_string(),
            interval_seconds,
            timeout_seconds,
            healthy_threshold,
            unhealthy_threshold,
            created_at: now,
        })
    }

    pub async fn find_for_app(&self, application_id: &str) -> Result<Option<HealthCheck>> {
        let check = sqlx::query_as::<_, HealthCheck>(&format!(
            "SELECT {} FROM health_checks WHERE application_id = ?",
            CONFIG_COLUMNS
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(check)
    }

    pub async fn list(&self) -> Result<Vec<HealthCheck>> {
        let checks = sqlx::query_as::<_, HealthCheck>(&format!(
            "SELECT {} FROM health_checks",
            CONFIG_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(checks)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_result(
        &self,
        application_id: &str,
        container_id: &str,
        status: HealthStatus,
        response_time_ms: Option<i64>,
        status_code: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO health_check_results \
             (id, application_id, container_id, status, response_time_ms, status_code, \
              error_message, checked_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(application_id)
        .bind(container_id)
        .bind(status)
        .bind(response_time_ms)
        .bind(status_code)
        .bind(error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent results first.
    pub async fn recent_results(
        &self,
        application_id: &str,
        limit: i64,
    ) -> Result<Vec<HealthCheckResult>> {
        let results = sqlx::query_as::<_, HealthCheckResult>(&format!(
            "SELECT {} FROM health_check_results \
             WHERE application_id = ? ORDER BY checked_at DESC LIMIT ?",
            RESULT_COLUMNS
        ))
        .bind(application_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }
}
