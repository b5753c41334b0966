//! Container stats sampler
//!
//! Samples resource usage for every running application's container and
//! writes it to the store. A slower sweep enforces the 24-hour retention
//! window.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::models::Event;
use crate::runtime::ContainerRuntime;
use crate::store::{ApplicationRepository, ContainerStatsRepository, DeploymentRepository};

pub const RETENTION_HOURS: i64 = 24;

/// Stats sampler options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sampling interval
    pub sample_interval: Duration,

    /// Retention sweep interval
    pub sweep_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

pub struct StatsMonitor {
    pool: SqlitePool,
    runtime: Arc<dyn ContainerRuntime>,
    bus: Arc<EventBus>,
}

impl StatsMonitor {
    pub fn new(pool: SqlitePool, runtime: Arc<dyn ContainerRuntime>, bus: Arc<EventBus>) -> Self {
        Self { pool, runtime, bus }
    }

    /// Sample every running application's container once.
    pub async fn sample(&self) {
        let apps = ApplicationRepository::new(self.pool.clone());
        let deployments = DeploymentRepository::new(self.pool.clone());
        let stats = ContainerStatsRepository::new(self.pool.clone());

        let applications = match apps.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!("Cannot list applications for stats: {}", e);
                return;
            }
        };

        for app in applications {
            let deployment = match deployments.latest_running(&app.id).await {
                Ok(Some(d)) => d,
                _ => continue,
            };
            let Some(container_id) = deployment.container_id else {
                continue;
            };

            match self.runtime.sample_stats(&container_id).await {
                Ok(sample) => {
                    if let Err(e) = stats
                        .record(
                            &container_id,
                            Some(&app.id),
                            sample.cpu_percent,
                            sample.memory_mb,
                            sample.memory_limit_mb,
                            sample.network_rx_mb,
                            sample.network_tx_mb,
                        )
                        .await
                    {
                        warn!("Cannot record stats for {}: {}", container_id, e);
                        continue;
                    }

                    self.bus.publish(Event::ContainerStats {
                        container_id: container_id.clone(),
                        cpu_percent: sample.cpu_percent,
                        memory_mb: sample.memory_mb,
                        memory_limit_mb: sample.memory_limit_mb,
                    });

                    debug!(
                        "Stats for {}: cpu={:.2}% mem={:.2}MB",
                        container_id, sample.cpu_percent, sample.memory_mb
                    );
                }
                Err(e) => {
                    debug!("No stats for container {}: {}", container_id, e);
                }
            }
        }
    }

    /// Delete samples past the retention window.
    pub async fn sweep(&self) {
        let stats = ContainerStatsRepository::new(self.pool.clone());
        match stats.sweep_older_than(RETENTION_HOURS).await {
            Ok(0) => {}
            Ok(deleted) => info!("Swept {} expired container stats rows", deleted),
            Err(e) => warn!("Stats sweep failed: {}", e),
        }
    }
}

/// Run the sampler until shutdown.
pub async fn run(
    options: &Options,
    monitor: &StatsMonitor,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!(
        "Stats sampler starting ({:?} interval, {}h retention)...",
        options.sample_interval, RETENTION_HOURS
    );

    let mut sample_interval = tokio::time::interval(options.sample_interval);
    let mut sweep_interval = tokio::time::interval(options.sweep_interval);
    // The first tick of an interval fires immediately
    sample_interval.tick().await;
    sweep_interval.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Stats sampler shutting down...");
                return;
            }
            _ = sample_interval.tick() => {
                monitor.sample().await;
            }
            _ = sweep_interval.tick() => {
                monitor.sweep().await;
            }
        }
    }
}
