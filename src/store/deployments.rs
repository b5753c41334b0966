//! Deployment repository
//!
//! Deployments are created in `queued` and mutated only by the orchestrator.
//! Status updates that reach a terminal state also stamp `finished_at`;
//! cancellation is guarded so it never overrides a terminal state.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::errors::Result;
use crate::models::{Deployment, DeploymentStatus};

const COLUMNS: &str = "id, application_id, server_id, commit_sha, commit_message, status, \
     build_log, container_id, host_port, image_tag, triggered_by, started_at, finished_at";

pub struct DeploymentRepository {
    pool: SqlitePool,
}

impl DeploymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a queued deployment. The id is caller-supplied because the
    /// image tag embeds it.
    pub async fn create(
        &self,
        id: &str,
        application_id: &str,
        server_id: &str,
        image_tag: &str,
        triggered_by: Option<&str>,
    ) -> Result<Deployment> {
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO deployments \
             (id, application_id, server_id, status, image_tag, triggered_by, started_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(application_id)
        .bind(server_id)
        .bind(DeploymentStatus::Queued)
        .bind(image_tag)
        .bind(triggered_by)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Deployment {
            id: id.to_string(),
            application_id: application_id.to_string(),
            server_id: server_id.to_string(),
            commit_sha: None,
            commit_message: None,
            status: DeploymentStatus::Queued,
            build_log: None,
            container_id: None,
            host_port: None,
            image_tag: image_tag.to_string(),
            triggered_by: triggered_by.map(|s| s.to_string()),
            started_at: now,
            finished_at: None,
        })
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Deployment>> {
        let deployment = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {} FROM deployments WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deployment)
    }

    pub async fn list(&self, application_id: Option<&str>) -> Result<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {} FROM deployments \
             WHERE (?1 IS NULL OR application_id = ?1) \
             ORDER BY started_at DESC",
            COLUMNS
        ))
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(deployments)
    }

    pub async fn update_status(&self, id: &str, status: DeploymentStatus) -> Result<()> {
        if status.is_terminal() {
            sqlx::query("UPDATE deployments SET status = ?, finished_at = ? WHERE id = ?")
                .bind(status)
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE deployments SET status = ? WHERE id = ?")
                .bind(status)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    pub async fn set_commit(&self, id: &str, sha: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET commit_sha = ?, commit_message = ? WHERE id = ?")
            .bind(sha)
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_container(
        &self,
        id: &str,
        container_id: &str,
        host_port: Option<u16>,
    ) -> Result<()> {
        sqlx::query("UPDATE deployments SET container_id = ?, host_port = ? WHERE id = ?")
            .bind(container_id)
            .bind(host_port)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Append one line to the build log.
    pub async fn append_log(&self, id: &str, line: &str) -> Result<()> {
        let with_newline = format!("{}\n", line);
        sqlx::query(
            "UPDATE deployments SET build_log = COALESCE(build_log || ?1, ?1) WHERE id = ?2",
        )
        .bind(with_newline)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the whole build log; used when the bounded log is truncated.
    pub async fn set_log(&self, id: &str, log: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET build_log = ? WHERE id = ?")
            .bind(log)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Latest deployment in state `running`; its container is the one the
    /// fleet controller treats as current for the application.
    pub async fn latest_running(&self, application_id: &str) -> Result<Option<Deployment>> {
        let deployment = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {} FROM deployments \
             WHERE application_id = ? AND status = 'running' \
             ORDER BY started_at DESC LIMIT 1",
            COLUMNS
        ))
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deployment)
    }

    /// All deployments not yet in a terminal state for an application.
    pub async fn active_for_app(&self, application_id: &str) -> Result<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {} FROM deployments \
             WHERE application_id = ? AND status NOT IN ('running', 'failed', 'cancelled') \
             ORDER BY started_at",
            COLUMNS
        ))
        .bind(application_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(deployments)
    }

    /// Queued deployment created for the given trigger id, if still queued.
    pub async fn find_queued_by_trigger(
        &self,
        application_id: &str,
        trigger: &str,
    ) -> Result<Option<Deployment>> {
        let deployment = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {} FROM deployments \
             WHERE application_id = ? AND triggered_by = ? AND status = 'queued' \
             LIMIT 1",
            COLUMNS
        ))
        .bind(application_id)
        .bind(trigger)
        .fetch_optional(&self.pool)
        .await?;

        Ok(deployment)
    }

    /// Applications whose most recent deployment is `running`; used by the
    /// boot reconciliation.
    pub async fn all_running(&self) -> Result<Vec<Deployment>> {
        let deployments = sqlx::query_as::<_, Deployment>(&format!(
            "SELECT {} FROM deployments d \
             WHERE d.status = 'running' AND d.started_at = \
               (SELECT MAX(started_at) FROM deployments WHERE application_id = d.application_id)",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(deployments)
    }

    /// Cancel if not yet terminal. Returns false when the deployment already
    /// reached a terminal state.
    pub async fn cancel(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deployments SET status = 'cancelled', finished_at = ? \
             WHERE id = ? AND status NOT IN ('running', 'failed', 'cancelled')",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
