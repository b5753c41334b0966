//! Application repository

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{AppStatus, Application, BuildStrategy};

const COLUMNS: &str = "id, name, server_id, git_url, git_branch, build_strategy, \
     dockerfile_path, port, auto_deploy, status, created_at, updated_at";

pub struct ApplicationRepository {
    pool: SqlitePool,
}

/// Fields accepted by a partial update; `None` leaves the column unchanged.
#[derive(Debug, Default, Clone)]
pub struct ApplicationUpdate {
    pub git_url: Option<Option<String>>,
    pub git_branch: Option<String>,
    pub build_strategy: Option<BuildStrategy>,
    pub dockerfile_path: Option<Option<String>>,
    pub port: Option<Option<u16>>,
    pub auto_deploy: Option<bool>,
}

impl ApplicationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        name: &str,
        server_id: &str,
        git_url: Option<&str>,
        git_branch: &str,
        build_strategy: BuildStrategy,
        dockerfile_path: Option<&str>,
        port: Option<u16>,
        auto_deploy: bool,
    ) -> Result<Application> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO applications \
             (id, name, server_id, git_url, git_branch, build_strategy, \
              dockerfile_path, port, auto_deploy, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(server_id)
        .bind(git_url)
        .bind(git_branch)
        .bind(build_strategy)
        .bind(dockerfile_path)
        .bind(port)
        .bind(auto_deploy)
        .bind(AppStatus::Pending)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Application {
            id,
            name: name.to_string(),
            server_id: server_id.to_string(),
            git_url: git_url.map(|s| s.to_string()),
            git_branch: git_branch.to_string(),
            build_strategy,
            dockerfile_path: dockerfile_path.map(|s| s.to_string()),
            port,
            auto_deploy,
            status: AppStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Application>> {
        let app = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(app)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Application>> {
        let app = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications WHERE name = ?",
            COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(app)
    }

    pub async fn list(&self) -> Result<Vec<Application>> {
        let apps = sqlx::query_as::<_, Application>(&format!(
            "SELECT {} FROM applications ORDER BY created_at",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(apps)
    }

    /// Partial update; absent fields keep their current value.
    pub async fn update(&self, id: &str, update: ApplicationUpdate) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(git_url) = &update.git_url {
            sqlx::query("UPDATE applications SET git_url = ? WHERE id = ?")
                .bind(git_url.as_deref())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(branch) = &update.git_branch {
            sqlx::query("UPDATE applications SET git_branch = ? WHERE id = ?")
                .bind(branch)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(strategy) = update.build_strategy {
            sqlx::query("UPDATE applications SET build_strategy = ? WHERE id = ?")
                .bind(strategy)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(path) = &update.dockerfile_path {
            sqlx::query("UPDATE applications SET dockerfile_path = ? WHERE id = ?")
                .bind(path.as_deref())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(port) = update.port {
            sqlx::query("UPDATE applications SET port = ? WHERE id = ?")
                .bind(port)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(auto_deploy) = update.auto_deploy {
            sqlx::query("UPDATE applications SET auto_deploy = ? WHERE id = ?")
                .bind(auto_deploy)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE applications SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_status(&self, id: &str, status: AppStatus) -> Result<()> {
        sqlx::query("UPDATE applications SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete the application row; child rows cascade through foreign keys.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM applications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
