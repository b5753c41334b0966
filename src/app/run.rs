//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::config::Config;
use crate::deploy::{FleetController, Orchestrator, PipelineContext};
use crate::errors::PloyerError;
use crate::gitops::GitCli;
use crate::monitor::{health, servers, stats, HealthMonitor, ServerMonitor, StatsMonitor};
use crate::proxy::ProxyClient;
use crate::reconcile::{self, Reconciler};
use crate::runtime::DockerCli;
use crate::secrets::SecretBox;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::store;
use crate::webhooks::WebhookIngress;

const MAX_SHUTDOWN_DELAY: Duration = Duration::from_secs(30);

/// Run the Ployer server until the shutdown future resolves.
pub async fn run(
    config: Config,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PloyerError> {
    info!("Initializing Ployer...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone());

    if let Err(e) = init(config, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
    }

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

async fn init(
    config: Config,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), PloyerError> {
    // Store
    let pool = store::connect(&config.database.path).await?;
    store::run_migrations(&pool).await?;
    register_local_server(&pool).await?;

    // Shared collaborators
    let secrets = SecretBox::from_root_secret(&config.auth.jwt_secret);
    let bus = Arc::new(EventBus::new());
    let runtime: Arc<dyn crate::runtime::ContainerRuntime> =
        Arc::new(DockerCli::new(&config.runtime.socket_path));
    let routes: Arc<dyn crate::proxy::RouteManager> =
        Arc::new(ProxyClient::new(&config.proxy.admin_url));
    let source: Arc<dyn crate::gitops::RepoSource> = Arc::new(GitCli::new());

    if !runtime.ping().await {
        warn!("Container daemon not reachable; deployments will fail until it is");
    }

    let fleet = Arc::new(FleetController::new(
        pool.clone(),
        runtime.clone(),
        routes.clone(),
        bus.clone(),
        config.deploy.container_start_timeout(),
    ));

    let ctx = Arc::new(PipelineContext {
        pool: pool.clone(),
        runtime: runtime.clone(),
        source: source.clone(),
        routes: routes.clone(),
        secrets: secrets.clone(),
        bus: bus.clone(),
        fleet: fleet.clone(),
        http: reqwest::Client::new(),
        base_domain: config.http.base_domain.clone(),
        config: config.deploy.clone(),
    });

    let orchestrator = Orchestrator::new(ctx.clone());
    let ingress = Arc::new(WebhookIngress::new(pool.clone(), orchestrator.clone()));

    // Converge with whatever survived the restart before taking traffic
    let reconciler = Reconciler::new(ctx.clone());
    if let Err(e) = reconciler.boot().await {
        warn!("Boot reconciliation incomplete: {}", e);
    }

    // Workers
    let health_monitor = HealthMonitor::new(
        pool.clone(),
        fleet.clone(),
        bus.clone(),
        reqwest::Client::new(),
    );
    let mut health_rx = shutdown_tx.subscribe();
    shutdown_manager.health_monitor = Some(tokio::spawn(async move {
        health::run(
            &health::Options::default(),
            &health_monitor,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = health_rx.recv().await;
            }),
        )
        .await;
    }));

    let stats_monitor = StatsMonitor::new(pool.clone(), runtime.clone(), bus.clone());
    let mut stats_rx = shutdown_tx.subscribe();
    shutdown_manager.stats_monitor = Some(tokio::spawn(async move {
        stats::run(
            &stats::Options::default(),
            &stats_monitor,
            Box::pin(async move {
                let _ = stats_rx.recv().await;
            }),
        )
        .await;
    }));

    let server_monitor = ServerMonitor::new(pool.clone(), bus.clone());
    let mut servers_rx = shutdown_tx.subscribe();
    shutdown_manager.server_monitor = Some(tokio::spawn(async move {
        servers::run(
            &servers::Options::default(),
            &server_monitor,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = servers_rx.recv().await;
            }),
        )
        .await;
    }));

    let mut reconcile_rx = shutdown_tx.subscribe();
    shutdown_manager.reconciler = Some(tokio::spawn(async move {
        reconcile::run(
            &reconcile::Options::default(),
            &reconciler,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = reconcile_rx.recv().await;
            }),
        )
        .await;
    }));

    // HTTP server
    let state = Arc::new(ServerState {
        pool,
        config,
        orchestrator,
        ingress,
        fleet,
        bus,
        secrets,
        source,
        routes,
        runtime,
    });

    let mut server_rx = shutdown_tx.subscribe();
    let server_handle = serve(state, async move {
        let _ = server_rx.recv().await;
    })
    .await?;
    shutdown_manager.server = Some(server_handle);

    Ok(())
}

/// Exactly one server per installation is the machine Ployer runs on.
async fn register_local_server(pool: &sqlx::SqlitePool) -> Result<(), PloyerError> {
    use crate::models::ServerStatus;
    use crate::store::ServerRepository;

    let servers = ServerRepository::new(pool.clone());
    if servers.find_local().await?.is_some() {
        return Ok(());
    }

    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "local".to_string());
    let server = servers
        .create(&hostname, "localhost", 22, "root", None, true)
        .await?;
    servers
        .update_status(&server.id, ServerStatus::Online, chrono::Utc::now())
        .await?;

    info!("Local server registered: {}", hostname);
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    server: Option<JoinHandle<Result<(), PloyerError>>>,
    health_monitor: Option<JoinHandle<()>>,
    stats_monitor: Option<JoinHandle<()>>,
    server_monitor: Option<JoinHandle<()>>,
    reconciler: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            shutdown_tx,
            server: None,
            health_monitor: None,
            stats_monitor: None,
            server_monitor: None,
            reconciler: None,
        }
    }

    async fn shutdown(&mut self) -> Result<(), PloyerError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(MAX_SHUTDOWN_DELAY, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing exit", MAX_SHUTDOWN_DELAY);
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), PloyerError> {
        info!("Shutting down Ployer...");

        // 1. Monitors
        for handle in [
            self.health_monitor.take(),
            self.stats_monitor.take(),
            self.server_monitor.take(),
            self.reconciler.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle
                .await
                .map_err(|e| PloyerError::Internal(format!("worker join failed: {}", e)))?;
        }

        // 2. HTTP server last, so in-flight responses finish
        if let Some(handle) = self.server.take() {
            handle
                .await
                .map_err(|e| PloyerError::Internal(format!("server join failed: {}", e)))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
