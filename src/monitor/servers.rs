//! Server liveness monitor
//!
//! The local server is online whenever this process runs; remote servers are
//! probed with a TCP reachability check. Status transitions publish on
//! `server:{id}`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::models::{Event, ServerStatus};
use crate::store::ServerRepository;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Server monitor options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

pub struct ServerMonitor {
    pool: SqlitePool,
    bus: Arc<EventBus>,
}

impl ServerMonitor {
    pub fn new(pool: SqlitePool, bus: Arc<EventBus>) -> Self {
        Self { pool, bus }
    }

    pub async fn tick(&self) {
        let servers = ServerRepository::new(self.pool.clone());

        let all = match servers.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!("Cannot list servers: {}", e);
                return;
            }
        };

        for server in all {
            let new_status = if server.is_local {
                ServerStatus::Online
            } else {
                probe_tcp(&server.host, server.port).await
            };

            if let Err(e) = servers.update_status(&server.id, new_status, Utc::now()).await {
                warn!("Cannot update server {} status: {}", server.name, e);
                continue;
            }

            if server.status != new_status {
                info!(
                    "Server {}: {} -> {}",
                    server.name,
                    server.status.as_str(),
                    new_status.as_str()
                );
                self.bus.publish(Event::ServerStatus {
                    server_id: server.id.clone(),
                    status: new_status,
                });
            }
        }
    }
}

async fn probe_tcp(host: &str, port: u16) -> ServerStatus {
    let connect = tokio::net::TcpStream::connect((host, port));
    match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
        Ok(Ok(_)) => ServerStatus::Online,
        _ => ServerStatus::Offline,
    }
}

/// Run the server monitor until shutdown.
pub async fn run<S, F>(
    options: &Options,
    monitor: &ServerMonitor,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Server monitor starting ({:?} interval)...", options.interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Server monitor shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        monitor.tick().await;
    }
}
