//! Container runtime adapter
//!
//! A thin wrapper over the container daemon, driven through the `docker`
//! binary with `DOCKER_HOST` pointing at the configured UNIX socket. The
//! [`ContainerRuntime`] trait is the seam the orchestrator, fleet controller,
//! monitors and reconciler are written against.

mod docker;

pub use docker::DockerCli;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::utils::CancelFlag;

/// Label carrying the owning application id, used by the reconciler to
/// recover ownership after a restart.
pub const APP_ID_LABEL: &str = "ployer.app_id";

/// Everything needed to create a container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<(String, String)>,
    /// Container port to publish on an ephemeral host port
    pub container_port: Option<u16>,
    pub labels: Vec<(String, String)>,
}

/// Result of inspecting a container by name or id.
#[derive(Debug, Clone)]
pub struct ContainerState {
    pub id: String,
    pub running: bool,
}

/// One resource-usage sample.
#[derive(Debug, Clone, Default)]
pub struct StatsSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_limit_mb: Option<f64>,
    pub network_rx_mb: Option<f64>,
    pub network_tx_mb: Option<f64>,
}

/// A container carrying the ownership label.
#[derive(Debug, Clone)]
pub struct LabeledContainer {
    pub id: String,
    pub name: String,
    pub application_id: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build an image from `context_dir`, streaming build output lines into
    /// `log_tx`. Honors `cancel` between lines by killing the build.
    async fn build_image(
        &self,
        context_dir: &Path,
        dockerfile: Option<&str>,
        tag: &str,
        log_tx: mpsc::Sender<String>,
        cancel: &CancelFlag,
    ) -> Result<()>;

    /// Create a container; returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str, timeout_secs: u64) -> Result<()>;

    async fn restart_container(&self, id: &str) -> Result<()>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// Inspect by name or id; `None` when no such container exists.
    async fn inspect_state(&self, name_or_id: &str) -> Result<Option<ContainerState>>;

    /// Host port a published container port landed on.
    async fn host_port(&self, id: &str, container_port: u16) -> Result<Option<u16>>;

    /// Last `tail` log lines.
    async fn container_logs(&self, id: &str, tail: usize) -> Result<Vec<String>>;

    /// Follow log output into `log_tx` until cancelled or the container
    /// stops.
    async fn follow_logs(
        &self,
        id: &str,
        log_tx: mpsc::Sender<String>,
        cancel: &CancelFlag,
    ) -> Result<()>;

    async fn sample_stats(&self, id: &str) -> Result<StatsSample>;

    /// All containers (running or not) carrying `APP_ID_LABEL`.
    async fn list_owned(&self) -> Result<Vec<LabeledContainer>>;

    /// True when the daemon answers.
    async fn ping(&self) -> bool;
}
