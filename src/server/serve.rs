//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::PloyerError;
use crate::server::state::{ServerState, SharedState};
use crate::server::{applications, deployments, domains, envs, events, health, webhooks};
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
struct StatusResponse {
    status: String,
    service: String,
    version: String,
}

async fn status_handler() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        service: "ployer".to_string(),
        version: version_info().version,
    })
}

async fn version_handler() -> Json<crate::utils::VersionInfo> {
    Json(version_info())
}

fn api_router() -> Router<SharedState> {
    Router::new()
        // Applications
        .route("/applications", get(applications::list).post(applications::create))
        .route(
            "/applications/:id",
            get(applications::get)
                .put(applications::update)
                .delete(applications::delete),
        )
        // Deploy keys
        .route(
            "/applications/:id/deploy-key",
            get(applications::get_deploy_key).post(applications::regenerate_deploy_key),
        )
        // Container logs
        .route("/applications/:id/logs", get(applications::logs))
        // Environment variables
        .route("/applications/:id/envs", get(envs::list).post(envs::create))
        .route(
            "/applications/:id/envs/:key",
            put(envs::update).delete(envs::delete),
        )
        // Deployments
        .route("/applications/:id/deploy", post(deployments::deploy))
        .route("/deployments", get(deployments::list))
        .route("/deployments/:id", get(deployments::get))
        .route("/deployments/:id/cancel", post(deployments::cancel))
        // Domains
        .route("/applications/:id/domains", get(domains::list).post(domains::add))
        .route("/applications/:id/domains/:host", delete(domains::remove))
        .route("/applications/:id/domains/:host/primary", post(domains::set_primary))
        .route("/applications/:id/domains/:host/verify", post(domains::verify))
        // Webhook configuration
        .route(
            "/applications/:id/webhooks",
            get(webhooks::get).post(webhooks::create).delete(webhooks::delete),
        )
        .route(
            "/applications/:id/webhooks/deliveries",
            get(webhooks::list_deliveries),
        )
        // Webhook ingress (authenticated by provider signature/token)
        .route("/webhooks/github", post(webhooks::github_ingress))
        .route("/webhooks/gitlab", post(webhooks::gitlab_ingress))
        // Health checks and stats
        .route(
            "/applications/:id/health-check",
            get(health::get).post(health::upsert),
        )
        .route("/applications/:id/health-check/results", get(health::results))
        .route("/applications/:id/stats", get(health::stats))
        // Event stream
        .route("/events", get(events::events_handler))
}

/// Build a CorsLayer from the configured allow list.
fn build_cors(allowed_origins: &str) -> CorsLayer {
    if allowed_origins == "*" {
        return CorsLayer::permissive();
    }

    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .split(',')
        .map(|s| s.trim())
        .filter_map(|s| s.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Start the HTTP server.
pub async fn serve(
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PloyerError>>, PloyerError> {
    let cors = build_cors(&state.config.http.allowed_origins);
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = Router::new()
        .route("/health", get(status_handler))
        .route("/version", get(version_handler))
        .nest("/api/v1", api_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    info!("HTTP server starting on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| PloyerError::Internal(format!("cannot bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PloyerError::Internal(e.to_string()))
    });

    Ok(handle)
}
