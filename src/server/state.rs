//! Server state

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::bus::EventBus;
use crate::config::Config;
use crate::deploy::{FleetController, Orchestrator};
use crate::gitops::RepoSource;
use crate::proxy::RouteManager;
use crate::runtime::ContainerRuntime;
use crate::secrets::SecretBox;
use crate::webhooks::WebhookIngress;

/// State shared across handlers.
pub struct ServerState {
    pub pool: SqlitePool,
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub ingress: Arc<WebhookIngress>,
    pub fleet: Arc<FleetController>,
    pub bus: Arc<EventBus>,
    pub secrets: SecretBox,
    pub source: Arc<dyn RepoSource>,
    pub routes: Arc<dyn RouteManager>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

pub type SharedState = Arc<ServerState>;
