//! Application health monitor
//!
//! Probes each running application's configured HTTP endpoint, keeps
//! consecutive success/failure counters in memory, and restarts the
//! container through the fleet controller when the unhealthy threshold is
//! crossed. Every probe outcome is persisted; health transitions publish on
//! `app:{id}`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::deploy::FleetController;
use crate::models::{Event, HealthStatus};
use crate::store::{ApplicationRepository, DeploymentRepository, HealthCheckRepository};

/// Health monitor options
#[derive(Debug, Clone)]
pub struct Options {
    /// Tick interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// One probe outcome.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub response_time_ms: i64,
    pub status_code: Option<i64>,
    pub error: Option<String>,
}

/// Issue one HTTP GET against a published host port. Any non-2xx response or
/// transport error counts as unhealthy.
pub async fn probe_http(
    client: &reqwest::Client,
    host_port: u16,
    path: &str,
    timeout: Duration,
) -> ProbeOutcome {
    let url = format!("http://127.0.0.1:{}{}", host_port, path);
    let start = std::time::Instant::now();

    match client.get(&url).timeout(timeout).send().await {
        Ok(response) => {
            let response_time_ms = start.elapsed().as_millis() as i64;
            let status_code = response.status().as_u16() as i64;
            ProbeOutcome {
                healthy: response.status().is_success(),
                response_time_ms,
                status_code: Some(status_code),
                error: None,
            }
        }
        Err(e) => ProbeOutcome {
            healthy: false,
            response_time_ms: start.elapsed().as_millis() as i64,
            status_code: None,
            error: Some(e.to_string()),
        },
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    consec_ok: i64,
    consec_fail: i64,
}

struct AppProbeState {
    counters: Counters,
    status: HealthStatus,
    last_probed_at: Option<DateTime<Utc>>,
}

pub struct HealthMonitor {
    pool: SqlitePool,
    fleet: Arc<FleetController>,
    bus: Arc<EventBus>,
    http: reqwest::Client,
    state: Mutex<HashMap<String, AppProbeState>>,
}

impl HealthMonitor {
    pub fn new(
        pool: SqlitePool,
        fleet: Arc<FleetController>,
        bus: Arc<EventBus>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            pool,
            fleet,
            bus,
            http,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// One monitor pass over every configured health check.
    pub async fn tick(&self) {
        let checks = match HealthCheckRepository::new(self.pool.clone()).list().await {
            Ok(checks) => checks,
            Err(e) => {
                warn!("Cannot load health checks: {}", e);
                return;
            }
        };

        for check in checks {
            if let Err(e) = self.probe_app(&check).await {
                warn!(
                    "Health check error for app {}: {}",
                    check.application_id, e
                );
            }
        }
    }

    async fn probe_app(&self, check: &crate::models::HealthCheck) -> crate::errors::Result<()> {
        let apps = ApplicationRepository::new(self.pool.clone());
        let deployments = DeploymentRepository::new(self.pool.clone());
        let results = HealthCheckRepository::new(self.pool.clone());

        let Some(app) = apps.find_by_id(&check.application_id).await? else {
            return Ok(());
        };

        let Some(deployment) = deployments.latest_running(&app.id).await? else {
            debug!("No running deployment for app {}", app.name);
            return Ok(());
        };
        let (Some(container_id), Some(host_port)) = (deployment.container_id, deployment.host_port)
        else {
            return Ok(());
        };

        // Honor the per-check interval against the global tick
        let now = Utc::now();
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(app_state) = state.get(&app.id) {
                if let Some(last) = app_state.last_probed_at {
                    if (now - last).num_seconds() < check.interval_seconds {
                        return Ok(());
                    }
                }
            }
        }

        let outcome = probe_http(
            &self.http,
            host_port,
            &check.path,
            Duration::from_secs(check.timeout_seconds as u64),
        )
        .await;

        let probe_status = if outcome.healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        results
            .record_result(
                &app.id,
                &container_id,
                probe_status,
                Some(outcome.response_time_ms),
                outcome.status_code,
                outcome.error.as_deref(),
            )
            .await?;

        // Threshold bookkeeping
        let (transition, restart) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let app_state = state.entry(app.id.clone()).or_insert(AppProbeState {
                counters: Counters::default(),
                status: HealthStatus::Unknown,
                last_probed_at: None,
            });
            app_state.last_probed_at = Some(now);

            if outcome.healthy {
                app_state.counters.consec_ok += 1;
                app_state.counters.consec_fail = 0;
            } else {
                app_state.counters.consec_fail += 1;
                app_state.counters.consec_ok = 0;
            }

            let previous = app_state.status;
            let next = if app_state.counters.consec_ok >= check.healthy_threshold {
                HealthStatus::Healthy
            } else if app_state.counters.consec_fail >= check.unhealthy_threshold {
                HealthStatus::Unhealthy
            } else {
                previous
            };

            let transition = (next != previous).then_some((previous, next));
            let restart = transition
                .map(|(_, to)| to == HealthStatus::Unhealthy)
                .unwrap_or(false);

            if let Some((_, next)) = transition {
                app_state.status = next;
            }
            if restart {
                // One restart per transition; counters start over
                app_state.counters = Counters::default();
                app_state.status = HealthStatus::Unknown;
            }

            (transition, restart)
        };

        if let Some((from, to)) = transition {
            info!("App {} health: {} -> {}", app.name, from.as_str(), to.as_str());
            self.bus.publish(Event::AppHealth {
                application_id: app.id.clone(),
                status: to,
            });
        }

        if restart {
            warn!(
                "App {} crossed the unhealthy threshold, restarting container {}",
                app.name, container_id
            );
            match self.fleet.restart(&app.id).await {
                Ok(()) => {
                    self.bus.publish(Event::AppHealth {
                        application_id: app.id.clone(),
                        status: HealthStatus::Unknown,
                    });
                }
                Err(e) => warn!("Restart of app {} failed: {}", app.name, e),
            }
        }

        Ok(())
    }
}

/// Run the health monitor until shutdown.
pub async fn run<S, F>(
    options: &Options,
    monitor: &HealthMonitor,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Health monitor starting ({:?} interval)...", options.interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Health monitor shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        monitor.tick().await;
    }
}
