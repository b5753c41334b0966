//! Persistent store facade
//!
//! A single embedded sqlite database accessed through sqlx. WAL mode keeps
//! readers unblocked while the single writer serializes on the store's write
//! lock. Multi-row mutations (primary-domain swap, deploy-key replacement)
//! run inside explicit transactions.

pub mod applications;
pub mod container_stats;
pub mod deploy_keys;
pub mod deployments;
pub mod domains;
pub mod env_vars;
pub mod health_checks;
pub mod servers;
pub mod webhooks;

pub use applications::ApplicationRepository;
pub use container_stats::ContainerStatsRepository;
pub use deploy_keys::DeployKeyRepository;
pub use deployments::DeploymentRepository;
pub use domains::DomainRepository;
pub use env_vars::EnvVarRepository;
pub use health_checks::HealthCheckRepository;
pub use servers::ServerRepository;
pub use webhooks::WebhookRepository;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::Result;

/// Open (and create if missing) the database at `path`.
pub async fn connect(path: &str) -> Result<SqlitePool> {
    let url = if path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite://{}", path)
    };

    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    // An in-memory database exists per connection, so it must not be pooled
    let max_connections = if path == ":memory:" { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    info!("Database connected: {}", path);
    Ok(pool)
}

/// Apply the embedded schema. Statements are idempotent so this runs on
/// every boot.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let migration_sql = include_str!("../../migrations/001_initial.sql");

    for statement in migration_sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt).execute(pool).await?;
        }
    }

    info!("Migrations applied");
    Ok(())
}
