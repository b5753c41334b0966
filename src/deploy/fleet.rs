//! Fleet controller
//!
//! Owns the application → running-container mapping. The authoritative
//! record is the application's most recent deployment in state `running`;
//! everything here works from that. Mutating operations on one application
//! are serialized through a per-app async lock, so two rolls can never
//! overlap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::errors::{PloyerError, Result};
use crate::models::{Application, Event};
use crate::proxy::{Route, RouteManager};
use crate::runtime::{ContainerRuntime, ContainerSpec, APP_ID_LABEL};
use crate::store::{DeploymentRepository, DomainRepository};
use crate::utils::CancelFlag;

const STOP_TIMEOUT_SECS: u64 = 10;

pub struct FleetController {
    pool: SqlitePool,
    runtime: Arc<dyn ContainerRuntime>,
    routes: Arc<dyn RouteManager>,
    bus: Arc<EventBus>,
    start_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// One log follower per application; replaced on roll, stopped on remove
    followers: Mutex<HashMap<String, CancelFlag>>,
}

impl FleetController {
    pub fn new(
        pool: SqlitePool,
        runtime: Arc<dyn ContainerRuntime>,
        routes: Arc<dyn RouteManager>,
        bus: Arc<EventBus>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            runtime,
            routes,
            bus,
            start_timeout,
            locks: Mutex::new(HashMap::new()),
            followers: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_app(&self, application_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(application_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Create and start the container for a new deployment. Returns the
    /// container id and the host port the service port was published on.
    /// The previous container keeps serving until [`promote`].
    ///
    /// [`promote`]: FleetController::promote
    pub async fn roll(
        &self,
        app: &Application,
        deployment_id: &str,
        image_tag: &str,
        env: Vec<(String, String)>,
    ) -> Result<(String, Option<u16>)> {
        let _guard = self.lock_app(&app.id).await;

        let spec = ContainerSpec {
            image: image_tag.to_string(),
            name: format!("{}-{}", app.name, deployment_id),
            env,
            container_port: app.port,
            labels: vec![(APP_ID_LABEL.to_string(), app.id.clone())],
        };

        let container_id = self.runtime.create_container(&spec).await?;

        let started = tokio::time::timeout(
            self.start_timeout,
            self.runtime.start_container(&container_id),
        )
        .await;

        match started {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // Never leave a half-created container behind
                let _ = self.runtime.remove_container(&container_id, true).await;
                return Err(e);
            }
            Err(_) => {
                let _ = self.runtime.remove_container(&container_id, true).await;
                return Err(PloyerError::Timeout("container start".to_string()));
            }
        }

        let host_port = match app.port {
            Some(port) => self.runtime.host_port(&container_id, port).await?,
            None => None,
        };

        info!(
            "Rolled {} to container {} (host port {:?})",
            app.name, container_id, host_port
        );

        Ok((container_id, host_port))
    }

    /// Point the application's routes at the new container, then retire the
    /// previous one. Route switch happens first so the hostname never points
    /// at a dead backend.
    pub async fn promote(
        &self,
        app: &Application,
        new_container_id: &str,
        host_port: Option<u16>,
    ) -> Result<()> {
        let _guard = self.lock_app(&app.id).await;

        if let Some(port) = host_port {
            self.publish_routes(app, port).await;
        }

        let deployments = DeploymentRepository::new(self.pool.clone());
        if let Some(previous) = deployments.latest_running(&app.id).await? {
            if let Some(old_container) = previous.container_id {
                if old_container != new_container_id {
                    info!("Retiring previous container {}", old_container);

                    if let Err(e) = self
                        .runtime
                        .stop_container(&old_container, STOP_TIMEOUT_SECS)
                        .await
                    {
                        warn!("Failed to stop old container {}: {}", old_container, e);
                    }
                    if let Err(e) = self.runtime.remove_container(&old_container, true).await {
                        warn!("Failed to remove old container {}: {}", old_container, e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Best-effort immediate route publication; the reconciler converges any
    /// failures from desired state in the store.
    async fn publish_routes(&self, app: &Application, host_port: u16) {
        let domains = DomainRepository::new(self.pool.clone());
        let app_domains = match domains.list_for_app(&app.id).await {
            Ok(list) => list,
            Err(e) => {
                warn!("Cannot load domains for {}: {}", app.name, e);
                return;
            }
        };

        for domain in app_domains {
            let route = Route {
                hostname: domain.hostname.clone(),
                backend_host: "127.0.0.1".to_string(),
                backend_port: host_port,
            };
            if let Err(e) = self.routes.set_route(&route).await {
                warn!("Route publish failed for {}: {}", domain.hostname, e);
                self.bus.publish(Event::RouteError {
                    application_id: app.id.clone(),
                    hostname: domain.hostname,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Follow a container's log output onto `container:{id}:logs`, replacing
    /// the application's previous follower. Runs until the container stops
    /// or the follower is superseded.
    pub fn stream_logs(&self, application_id: &str, container_id: &str) {
        let cancel = CancelFlag::new();
        {
            let mut followers = self.followers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = followers.insert(application_id.to_string(), cancel.clone()) {
                previous.cancel();
            }
        }

        let runtime = self.runtime.clone();
        let bus = self.bus.clone();
        let container = container_id.to_string();

        tokio::spawn(async move {
            let (line_tx, mut line_rx) = mpsc::channel::<String>(64);

            let follow = runtime.follow_logs(&container, line_tx, &cancel);
            let forward = async {
                while let Some(line) = line_rx.recv().await {
                    bus.publish(Event::ContainerLog {
                        container_id: container.clone(),
                        line,
                    });
                }
            };

            let (result, ()) = tokio::join!(follow, forward);
            if let Err(e) = result {
                warn!("Log follower for {} ended: {}", container, e);
            }
        });
    }

    fn stop_follower(&self, application_id: &str) {
        let mut followers = self.followers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(follower) = followers.remove(application_id) {
            follower.cancel();
        }
    }

    /// Discard a container that failed its health gate. The previous
    /// container was never touched and keeps serving.
    pub async fn rollback(&self, application_id: &str, new_container_id: &str) -> Result<()> {
        let _guard = self.lock_app(application_id).await;

        info!("Rolling back: removing unhealthy container {}", new_container_id);
        self.runtime.remove_container(new_container_id, true).await
    }

    /// Container id currently serving the application, if any.
    pub async fn current(&self, application_id: &str) -> Result<Option<String>> {
        let deployments = DeploymentRepository::new(self.pool.clone());
        Ok(deployments
            .latest_running(application_id)
            .await?
            .and_then(|d| d.container_id))
    }

    pub async fn stop(&self, application_id: &str) -> Result<()> {
        let _guard = self.lock_app(application_id).await;
        self.stop_follower(application_id);

        if let Some(container) = self.current(application_id).await? {
            self.runtime
                .stop_container(&container, STOP_TIMEOUT_SECS)
                .await?;
        }
        Ok(())
    }

    pub async fn restart(&self, application_id: &str) -> Result<()> {
        let _guard = self.lock_app(application_id).await;

        match self.current(application_id).await? {
            Some(container) => self.runtime.restart_container(&container).await,
            None => Err(PloyerError::NotFound(
                "no running container for application".to_string(),
            )),
        }
    }

    /// Tear down everything the application owns at the runtime and proxy:
    /// used on application deletion.
    pub async fn remove(&self, app: &Application) -> Result<()> {
        let _guard = self.lock_app(&app.id).await;
        self.stop_follower(&app.id);

        if let Some(container) = self.current(&app.id).await? {
            if let Err(e) = self.runtime.stop_container(&container, STOP_TIMEOUT_SECS).await {
                warn!("Failed to stop container {}: {}", container, e);
            }
            if let Err(e) = self.runtime.remove_container(&container, true).await {
                warn!("Failed to remove container {}: {}", container, e);
            }
        }

        let domains = DomainRepository::new(self.pool.clone());
        for domain in domains.list_for_app(&app.id).await? {
            if let Err(e) = self.routes.remove_route(&domain.hostname).await {
                warn!("Failed to remove route {}: {}", domain.hostname, e);
            }
        }

        Ok(())
    }
}
