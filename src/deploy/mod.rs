//! Deployment pipeline: orchestrator, state runner, build strategies and the
//! container fleet controller

pub mod build;
pub mod fleet;
pub mod log;
pub mod orchestrator;
pub mod pipeline;

pub use fleet::FleetController;
pub use log::{BoundedLog, BuildLog, BUILD_LOG_CAP, TRUNCATION_MARKER};
pub use orchestrator::{DeployTrigger, Orchestrator};

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::bus::EventBus;
use crate::config::DeployConfig;
use crate::gitops::RepoSource;
use crate::proxy::RouteManager;
use crate::runtime::ContainerRuntime;
use crate::secrets::SecretBox;

/// Everything a pipeline run needs, shared across the orchestrator, the
/// fleet controller and the reconciler.
pub struct PipelineContext {
    pub pool: SqlitePool,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub source: Arc<dyn RepoSource>,
    pub routes: Arc<dyn RouteManager>,
    pub secrets: SecretBox,
    pub bus: Arc<EventBus>,
    pub fleet: Arc<FleetController>,
    pub http: reqwest::Client,
    pub base_domain: String,
    pub config: DeployConfig,
}
