//! Deployment: one pipeline run for an application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deployment {
    pub id: String,
    pub application_id: String,
    pub server_id: String,
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub status: DeploymentStatus,
    pub build_log: Option<String>,
    pub container_id: Option<String>,
    /// Host port the container port was published to, chosen at roll time
    pub host_port: Option<u16>,
    pub image_tag: String,
    /// Trigger id (webhook delivery id or API request id) used to de-duplicate
    /// enqueues of the same push
    pub triggered_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Cloning,
    Building,
    Deploying,
    Running,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Cloning => "cloning",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Running | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }

    /// Cancellation is only honored before the deployment goes live.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Queued
                | DeploymentStatus::Cloning
                | DeploymentStatus::Building
                | DeploymentStatus::Deploying
        )
    }
}

impl Deployment {
    /// Deterministic container name for this run.
    pub fn container_name(&self, app_name: &str) -> String {
        format!("{}-{}", app_name, self.id)
    }
}

/// Image tag for a deployment: `ployer-{app-name}:{deployment-id}`.
pub fn image_tag(app_name: &str, deployment_id: &str) -> String {
    format!("ployer-{}:{}", app_name, deployment_id)
}
