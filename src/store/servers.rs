//! Server repository

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{Server, ServerStatus};

const COLUMNS: &str = "id, name, host, port, username, ssh_key_encrypted, is_local, status, \
     last_seen_at, created_at, updated_at";

pub struct ServerRepository {
    pool: SqlitePool,
}

impl ServerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        host: &str,
        port: u16,
        username: &str,
        ssh_key_encrypted: Option<&str>,
        is_local: bool,
    ) -> Result<Server> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO servers \
             (id, name, host, port, username, ssh_key_encrypted, is_local, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(host)
        .bind(port)
        .bind(username)
        .bind(ssh_key_encrypted)
        .bind(is_local)
        .bind(ServerStatus::Unknown)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Server {
            id,
            name: name.to_string(),
            host: host.to_string(),
            port,
            username: username.to_string(),
            ssh_key_encrypted: ssh_key_encrypted.map(|s| s.to_string()),
            is_local,
            status: ServerStatus::Unknown,
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The auto-registered local server, if present.
    pub async fn find_local(&self) -> Result<Option<Server>> {
        let server = sqlx::query_as::<_, Server>(&format!(
            "SELECT {} FROM servers WHERE is_local = 1 LIMIT 1",
            COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(server)
    }

    pub async fn list(&self) -> Result<Vec<Server>> {
        let servers = sqlx::query_as::<_, Server>(&format!(
            "SELECT {} FROM servers ORDER BY created_at",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(servers)
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: ServerStatus,
        last_seen_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE servers SET status = ?, last_seen_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(last_seen_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
