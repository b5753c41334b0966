//! Reconciler
//!
//! Converges the world with the store. On boot: adopt containers that are
//! still running, mark applications whose container vanished as stopped,
//! remove labeled containers whose application no longer exists, and rebuild
//! the proxy route set. Afterwards only the route reconciliation repeats
//! periodically; route state in the proxy is treated as disposable.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::deploy::PipelineContext;
use crate::errors::Result;
use crate::models::{AppStatus, Event};
use crate::proxy::Route;
use crate::store::{ApplicationRepository, DeploymentRepository, DomainRepository};

/// Reconciler options
#[derive(Debug, Clone)]
pub struct Options {
    /// Route reconciliation interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

pub struct Reconciler {
    ctx: Arc<PipelineContext>,
}

impl Reconciler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    /// Full boot-time pass.
    pub async fn boot(&self) -> Result<()> {
        info!("Reconciling state after startup...");
        self.adopt_running().await?;
        self.remove_orphans().await?;
        self.reconcile_routes().await?;
        Ok(())
    }

    /// Applications whose latest deployment says `running` either still have
    /// their container (adopt it) or get marked stopped. Nothing is
    /// redeployed automatically.
    async fn adopt_running(&self) -> Result<()> {
        let deployments = DeploymentRepository::new(self.ctx.pool.clone());
        let apps = ApplicationRepository::new(self.ctx.pool.clone());

        for deployment in deployments.all_running().await? {
            let Some(app) = apps.find_by_id(&deployment.application_id).await? else {
                continue;
            };

            let name = deployment.container_name(&app.name);
            match self.ctx.runtime.inspect_state(&name).await {
                Ok(Some(state)) if state.running => {
                    info!("Adopted running container {} for {}", name, app.name);
                    self.ctx.fleet.stream_logs(&app.id, &state.id);
                }
                Ok(_) => {
                    info!(
                        "Container {} for {} is gone; marking application stopped",
                        name, app.name
                    );
                    apps.update_status(&app.id, AppStatus::Stopped).await?;
                    self.ctx.bus.publish(Event::AppStatus {
                        application_id: app.id.clone(),
                        status: AppStatus::Stopped,
                    });
                }
                Err(e) => {
                    warn!("Cannot inspect container {}: {}", name, e);
                }
            }
        }

        Ok(())
    }

    /// Remove labeled containers whose owning application no longer exists.
    async fn remove_orphans(&self) -> Result<()> {
        let apps = ApplicationRepository::new(self.ctx.pool.clone());

        let owned = match self.ctx.runtime.list_owned().await {
            Ok(list) => list,
            Err(e) => {
                warn!("Cannot list labeled containers: {}", e);
                return Ok(());
            }
        };

        for container in owned {
            if apps.find_by_id(&container.application_id).await?.is_none() {
                info!(
                    "Removing orphan container {} (application {} is gone)",
                    container.name, container.application_id
                );
                if let Err(e) = self.ctx.runtime.remove_container(&container.id, true).await {
                    warn!("Cannot remove orphan container {}: {}", container.name, e);
                }
            }
        }

        Ok(())
    }

    /// Converge the proxy's route set with the desired set derived from
    /// domains × currently running deployments.
    pub async fn reconcile_routes(&self) -> Result<()> {
        let apps = ApplicationRepository::new(self.ctx.pool.clone());
        let deployments = DeploymentRepository::new(self.ctx.pool.clone());
        let domains = DomainRepository::new(self.ctx.pool.clone());

        // Desired: every domain of an application with a live host port
        let mut desired: HashMap<String, Route> = HashMap::new();
        for app in apps.list().await? {
            let Some(deployment) = deployments.latest_running(&app.id).await? else {
                continue;
            };
            let Some(host_port) = deployment.host_port else {
                continue;
            };

            for domain in domains.list_for_app(&app.id).await? {
                desired.insert(
                    domain.hostname.clone(),
                    Route {
                        hostname: domain.hostname,
                        backend_host: "127.0.0.1".to_string(),
                        backend_port: host_port,
                    },
                );
            }
        }

        let actual = match self.ctx.routes.list_routes().await {
            Ok(routes) => routes,
            Err(e) => {
                warn!("Cannot list proxy routes: {}", e);
                return Ok(());
            }
        };
        let actual_by_host: HashMap<String, Route> = actual
            .into_iter()
            .map(|r| (r.hostname.clone(), r))
            .collect();

        for (hostname, route) in &desired {
            if actual_by_host.get(hostname) != Some(route) {
                if let Err(e) = self.ctx.routes.set_route(route).await {
                    warn!("Cannot install route {}: {}", hostname, e);
                }
            }
        }

        for hostname in actual_by_host.keys() {
            if !desired.contains_key(hostname) {
                info!("Removing orphan route {}", hostname);
                if let Err(e) = self.ctx.routes.remove_route(hostname).await {
                    warn!("Cannot remove route {}: {}", hostname, e);
                }
            }
        }

        Ok(())
    }
}

/// Run the periodic route reconciliation until shutdown.
pub async fn run<S, F>(
    options: &Options,
    reconciler: &Reconciler,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Reconciler starting ({:?} interval)...", options.interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Reconciler shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        if let Err(e) = reconciler.reconcile_routes().await {
            warn!("Route reconciliation failed: {}", e);
        }
    }
}
