//! Shared fixtures: in-memory store and fake adapters for the seam traits

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ployer::bus::EventBus;
use ployer::config::DeployConfig;
use ployer::deploy::{FleetController, Orchestrator, PipelineContext};
use ployer::errors::{PloyerError, Result};
use ployer::gitops::{CommitInfo, KeyPair, RepoSource};
use ployer::models::{Application, BuildStrategy};
use ployer::proxy::{CertStatus, Route, RouteManager};
use ployer::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, LabeledContainer, StatsSample,
};
use ployer::store::{self, ApplicationRepository, ServerRepository};
use ployer::utils::CancelFlag;

/// Container runtime double. Containers live in a map; behavior knobs steer
/// build outcome and stats.
#[derive(Default)]
pub struct FakeRuntime {
    pub containers: Mutex<HashMap<String, FakeContainer>>,
    pub build_lines: Mutex<Vec<String>>,
    pub build_error: Mutex<Option<String>>,
    pub host_ports: Mutex<HashMap<String, u16>>,
    pub created: AtomicUsize,
    pub restarts: AtomicUsize,
    next_id: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub application_id: Option<String>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a running container, as if adopted from a previous boot.
    pub fn seed_container(&self, id: &str, name: &str, application_id: Option<&str>) {
        let mut containers = self.containers.lock().unwrap();
        containers.insert(
            id.to_string(),
            FakeContainer {
                id: id.to_string(),
                name: name.to_string(),
                running: true,
                application_id: application_id.map(|s| s.to_string()),
            },
        );
    }

    pub fn set_build_failure(&self, lines: &[&str]) {
        *self.build_lines.lock().unwrap() = lines.iter().map(|s| s.to_string()).collect();
        *self.build_error.lock().unwrap() = Some("image build failed with status 1".to_string());
    }

    pub fn set_host_port(&self, container_port: u16, host_port: u16) {
        self.host_ports
            .lock()
            .unwrap()
            .insert(container_port.to_string(), host_port);
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    fn find(&self, name_or_id: &str) -> Option<FakeContainer> {
        let containers = self.containers.lock().unwrap();
        containers
            .values()
            .find(|c| c.id == name_or_id || c.name == name_or_id)
            .cloned()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(
        &self,
        _context_dir: &Path,
        _dockerfile: Option<&str>,
        _tag: &str,
        log_tx: mpsc::Sender<String>,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let lines = self.build_lines.lock().unwrap().clone();
        for line in lines {
            if cancel.is_cancelled() {
                return Err(PloyerError::Cancelled);
            }
            let _ = log_tx.send(line).await;
        }

        if let Some(message) = self.build_error.lock().unwrap().clone() {
            return Err(PloyerError::Upstream(message));
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let id = format!("ctr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.created.fetch_add(1, Ordering::SeqCst);

        let application_id = spec
            .labels
            .iter()
            .find(|(k, _)| k == "ployer.app_id")
            .map(|(_, v)| v.clone());

        let mut containers = self.containers.lock().unwrap();
        containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: spec.name.clone(),
                running: false,
                application_id,
            },
        );

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(PloyerError::Upstream("No such container".to_string())),
        }
    }

    async fn stop_container(&self, id: &str, _timeout_secs: u64) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        if let Some(container) = containers.get_mut(id) {
            container.running = false;
        }
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(id) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(PloyerError::Upstream("No such container".to_string())),
        }
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        containers.retain(|_, c| c.id != id && c.name != id);
        Ok(())
    }

    async fn inspect_state(&self, name_or_id: &str) -> Result<Option<ContainerState>> {
        Ok(self.find(name_or_id).map(|c| ContainerState {
            id: c.id,
            running: c.running,
        }))
    }

    async fn host_port(&self, _id: &str, container_port: u16) -> Result<Option<u16>> {
        let ports = self.host_ports.lock().unwrap();
        Ok(ports.get(&container_port.to_string()).copied())
    }

    async fn container_logs(&self, _id: &str, _tail: usize) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn follow_logs(
        &self,
        _id: &str,
        _log_tx: mpsc::Sender<String>,
        _cancel: &CancelFlag,
    ) -> Result<()> {
        Ok(())
    }

    async fn sample_stats(&self, _id: &str) -> Result<StatsSample> {
        Ok(StatsSample {
            cpu_percent: 1.5,
            memory_mb: 64.0,
            memory_limit_mb: Some(512.0),
            network_rx_mb: Some(0.1),
            network_tx_mb: Some(0.2),
        })
    }

    async fn list_owned(&self) -> Result<Vec<LabeledContainer>> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .values()
            .filter_map(|c| {
                c.application_id.as_ref().map(|app_id| LabeledContainer {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    application_id: app_id.clone(),
                })
            })
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Git double: "clones" by creating the directory, reports a fixed commit,
/// and optionally dawdles so cancellation can land first.
pub struct FakeSource {
    pub sha: String,
    pub message: String,
    pub clone_delay: Duration,
    pub clones: AtomicUsize,
}

impl FakeSource {
    pub fn new(sha: &str, message: &str) -> Self {
        Self {
            sha: sha.to_string(),
            message: message.to_string(),
            clone_delay: Duration::ZERO,
            clones: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.clone_delay = delay;
        self
    }
}

#[async_trait]
impl RepoSource for FakeSource {
    async fn clone_at(
        &self,
        _url: &str,
        _branch: &str,
        dest: &Path,
        _private_key: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<CommitInfo> {
        if !self.clone_delay.is_zero() {
            tokio::time::sleep(self.clone_delay).await;
        }
        if cancel.is_cancelled() {
            return Err(PloyerError::Cancelled);
        }

        tokio::fs::create_dir_all(dest).await?;
        self.clones.fetch_add(1, Ordering::SeqCst);

        Ok(CommitInfo {
            sha: self.sha.clone(),
            message: self.message.clone(),
        })
    }

    async fn generate_keypair(&self, comment: &str) -> Result<KeyPair> {
        Ok(KeyPair {
            public_key: format!("ssh-rsa AAAATESTKEY {}", comment),
            private_key: "-----BEGIN TEST KEY-----".to_string(),
        })
    }
}

/// Route manager double: an in-memory route table.
#[derive(Default)]
pub struct FakeRoutes {
    pub routes: Mutex<HashMap<String, Route>>,
}

impl FakeRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route_for(&self, hostname: &str) -> Option<Route> {
        self.routes.lock().unwrap().get(hostname).cloned()
    }
}

#[async_trait]
impl RouteManager for FakeRoutes {
    async fn set_route(&self, route: &Route) -> Result<()> {
        let mut routes = self.routes.lock().unwrap();
        routes.insert(route.hostname.clone(), route.clone());
        Ok(())
    }

    async fn remove_route(&self, hostname: &str) -> Result<()> {
        let mut routes = self.routes.lock().unwrap();
        routes.remove(hostname);
        Ok(())
    }

    async fn list_routes(&self) -> Result<Vec<Route>> {
        let routes = self.routes.lock().unwrap();
        Ok(routes.values().cloned().collect())
    }

    async fn cert_status(&self, hostname: &str) -> Result<CertStatus> {
        let routes = self.routes.lock().unwrap();
        Ok(if routes.contains_key(hostname) {
            CertStatus::Active
        } else {
            CertStatus::None
        })
    }
}

/// Everything a test needs wired together against an in-memory store.
pub struct Harness {
    pub pool: sqlx::SqlitePool,
    pub ctx: Arc<PipelineContext>,
    pub orchestrator: Arc<Orchestrator>,
    pub runtime: Arc<FakeRuntime>,
    pub source: Arc<FakeSource>,
    pub routes: Arc<FakeRoutes>,
    pub bus: Arc<EventBus>,
    pub fleet: Arc<FleetController>,
    pub server_id: String,
    pub workdir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_source(FakeSource::new("abc123", "hi")).await
    }

    pub async fn with_source(source: FakeSource) -> Self {
        let pool = store::connect(":memory:").await.expect("pool");
        store::run_migrations(&pool).await.expect("migrations");

        let server = ServerRepository::new(pool.clone())
            .create("local", "localhost", 22, "root", None, true)
            .await
            .expect("server");

        let runtime = Arc::new(FakeRuntime::new());
        let source = Arc::new(source);
        let routes = Arc::new(FakeRoutes::new());
        let bus = Arc::new(EventBus::new());
        let secrets = ployer::secrets::SecretBox::from_root_secret("test-root");
        let workdir = tempfile::tempdir().expect("workdir");

        let deploy_config = DeployConfig {
            build_root: workdir.path().to_string_lossy().to_string(),
            clone_timeout_secs: 10,
            build_timeout_secs: 10,
            container_start_timeout_secs: 5,
            startup_grace_secs: 0,
        };

        let fleet = Arc::new(FleetController::new(
            pool.clone(),
            runtime.clone() as Arc<dyn ContainerRuntime>,
            routes.clone() as Arc<dyn RouteManager>,
            bus.clone(),
            Duration::from_secs(5),
        ));

        let ctx = Arc::new(PipelineContext {
            pool: pool.clone(),
            runtime: runtime.clone(),
            source: source.clone(),
            routes: routes.clone(),
            secrets,
            bus: bus.clone(),
            fleet: fleet.clone(),
            http: reqwest::Client::new(),
            base_domain: "test.local".to_string(),
            config: deploy_config,
        });

        let orchestrator = Orchestrator::new(ctx.clone());

        Self {
            pool,
            ctx,
            orchestrator,
            runtime,
            source,
            routes,
            bus,
            fleet,
            server_id: server.id,
            workdir,
        }
    }

    pub async fn create_app(&self, name: &str, port: Option<u16>) -> Application {
        ApplicationRepository::new(self.pool.clone())
            .create(
                name,
                &self.server_id,
                Some("git@example.com:u/r.git"),
                "main",
                BuildStrategy::Dockerfile,
                None,
                port,
                true,
            )
            .await
            .expect("application")
    }

    /// Poll until the deployment reaches a terminal state.
    pub async fn await_terminal(&self, deployment_id: &str) -> ployer::models::Deployment {
        let deployments = ployer::store::DeploymentRepository::new(self.pool.clone());
        for _ in 0..200 {
            let deployment = deployments
                .find_by_id(deployment_id)
                .await
                .expect("deployment lookup")
                .expect("deployment exists");
            if deployment.status.is_terminal() {
                return deployment;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("deployment {} never reached a terminal state", deployment_id);
    }
}

/// Serve a fixed status code on an ephemeral port; returns the port.
pub async fn serve_status(status: u16, path: &'static str) -> u16 {
    use axum::http::StatusCode;
    use axum::routing::get;

    let code = StatusCode::from_u16(status).unwrap();
    let app = axum::Router::new().route(path, get(move || async move { code }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    port
}
