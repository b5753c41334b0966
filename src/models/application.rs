//! Application: the unit the orchestrator deploys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub server_id: String,
    pub git_url: Option<String>,
    pub git_branch: String,
    pub build_strategy: BuildStrategy,
    pub dockerfile_path: Option<String>,
    pub port: Option<u16>,
    pub auto_deploy: bool,
    pub status: AppStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a container image is produced from the cloned source tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BuildStrategy {
    Dockerfile,
    Nixpacks,
    DockerCompose,
}

impl Default for BuildStrategy {
    fn default() -> Self {
        BuildStrategy::Dockerfile
    }
}

impl BuildStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            BuildStrategy::Dockerfile => "dockerfile",
            BuildStrategy::Nixpacks => "nixpacks",
            BuildStrategy::DockerCompose => "docker_compose",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AppStatus {
    Pending,
    Deploying,
    Running,
    Stopped,
    Failed,
}

impl AppStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AppStatus::Pending => "pending",
            AppStatus::Deploying => "deploying",
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
            AppStatus::Failed => "failed",
        }
    }
}

/// Per-application environment variable; the value is SecretBox ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EnvironmentVariable {
    pub id: String,
    pub application_id: String,
    pub key: String,
    #[serde(skip_serializing)]
    pub value_encrypted: String,
    pub created_at: DateTime<Utc>,
}

/// Per-application SSH key pair used for read-only git access.
/// Exactly one exists for every application with a git URL.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeployKey {
    pub id: String,
    pub application_id: String,
    pub public_key: String,
    #[serde(skip_serializing)]
    pub private_key_encrypted: String,
    pub created_at: DateTime<Utc>,
}
