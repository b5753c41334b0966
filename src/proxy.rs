//! Reverse-proxy route manager
//!
//! Declarative route CRUD against the proxy's HTTP admin endpoint. The route
//! set in the proxy is *actual* state; the store holds *desired* state and
//! the reconciler converges the two, so individual calls here are allowed to
//! fail transiently.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{PloyerError, Result};

const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

/// One hostname → backend mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub hostname: String,
    pub backend_host: String,
    pub backend_port: u16,
}

/// Certificate state for a hostname as reported by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    Active,
    Pending,
    None,
}

#[async_trait]
pub trait RouteManager: Send + Sync {
    /// Install or replace the route for a hostname.
    async fn set_route(&self, route: &Route) -> Result<()>;

    async fn remove_route(&self, hostname: &str) -> Result<()>;

    async fn list_routes(&self) -> Result<Vec<Route>>;

    async fn cert_status(&self, hostname: &str) -> Result<CertStatus>;
}

pub struct ProxyClient {
    admin_url: String,
    client: reqwest::Client,
}

impl ProxyClient {
    pub fn new(admin_url: &str) -> Self {
        info!("Proxy admin client configured for {}", admin_url);
        Self {
            admin_url: admin_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(ADMIN_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn ping(&self) -> bool {
        self.client
            .get(format!("{}/routes", self.admin_url))
            .send()
            .await
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl RouteManager for ProxyClient {
    async fn set_route(&self, route: &Route) -> Result<()> {
        debug!(
            "Publishing route {} -> {}:{}",
            route.hostname, route.backend_host, route.backend_port
        );

        let resp = self
            .client
            .post(format!("{}/routes", self.admin_url))
            .json(route)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(PloyerError::Upstream(format!(
                "proxy rejected route {}: {}",
                route.hostname,
                resp.status()
            )));
        }

        Ok(())
    }

    async fn remove_route(&self, hostname: &str) -> Result<()> {
        debug!("Removing route {}", hostname);

        let resp = self
            .client
            .delete(format!("{}/routes/{}", self.admin_url, hostname))
            .send()
            .await?;

        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(PloyerError::Upstream(format!(
                "proxy failed to remove route {}: {}",
                hostname,
                resp.status()
            )));
        }

        Ok(())
    }

    async fn list_routes(&self) -> Result<Vec<Route>> {
        let resp = self
            .client
            .get(format!("{}/routes", self.admin_url))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(PloyerError::Upstream(format!(
                "proxy route listing failed: {}",
                resp.status()
            )));
        }

        let routes = resp.json().await?;
        Ok(routes)
    }

    async fn cert_status(&self, hostname: &str) -> Result<CertStatus> {
        let resp = self
            .client
            .get(format!("{}/certificates/{}", self.admin_url, hostname))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(CertStatus::None);
        }
        if !resp.status().is_success() {
            return Err(PloyerError::Upstream(format!(
                "certificate query for {} failed: {}",
                hostname,
                resp.status()
            )));
        }

        #[derive(Deserialize)]
        struct CertReport {
            status: CertStatus,
        }

        let report: CertReport = resp.json().await?;
        Ok(report.status)
    }
}
