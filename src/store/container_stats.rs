//! Container stats repository, with a 24-hour retention sweep

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::ContainerStats;

const COLUMNS: &str = "id, container_id, application_id, cpu_percent, memory_mb, \
     memory_limit_mb, network_rx_mb, network_tx_mb, recorded_at";

pub struct ContainerStatsRepository {
    pool: SqlitePool,
}

impl ContainerStatsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        container_id: &str,
        application_id: Option<&str>,
        cpu_percent: f64,
        memory_mb: f64,
        memory_limit_mb: Option<f64>,
        network_rx_mb: Option<f64>,
        network_tx_mb: Option<f64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO container_stats \
             (id, container_id, application_id, cpu_percent, memory_mb, memory_limit_mb, \
              network_rx_mb, network_tx_mb, recorded_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(container_id)
        .bind(application_id)
        .bind(cpu_percent)
        .bind(memory_mb)
        .bind(memory_limit_mb)
        .bind(network_rx_mb)
        .bind(network_tx_mb)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Samples for an application over the trailing `hours`, oldest first.
    pub async fn list_for_app(
        &self,
        application_id: &str,
        hours: i64,
    ) -> Result<Vec<ContainerStats>> {
        let cutoff = Utc::now() - Duration::hours(hours);

        let stats = sqlx::query_as::<_, ContainerStats>(&format!(
            "SELECT {} FROM container_stats \
             WHERE application_id = ? AND recorded_at >= ? \
             ORDER BY recorded_at",
            COLUMNS
        ))
        .bind(application_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(stats)
    }

    /// Delete samples older than `hours`; returns the number removed.
    pub async fn sweep_older_than(&self, hours: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::hours(hours);

        let result = sqlx::query("DELETE FROM container_stats WHERE recorded_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
