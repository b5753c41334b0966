//! Domain handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::errors::{PloyerError, Result};
use crate::models::Domain;
use crate::proxy::CertStatus;
use crate::server::applications::find_app;
use crate::server::auth::AuthUser;
use crate::server::state::SharedState;
use crate::store::DomainRepository;

#[derive(Debug, Deserialize)]
pub struct AddDomainRequest {
    pub hostname: String,
    #[serde(default)]
    pub is_primary: bool,
}

pub async fn list(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Domain>>> {
    let app = find_app(&state, &id).await?;
    let domains = DomainRepository::new(state.pool.clone())
        .list_for_app(&app.id)
        .await?;

    Ok(Json(domains))
}

pub async fn add(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<AddDomainRequest>,
) -> Result<impl IntoResponse> {
    let app = find_app(&state, &id).await?;

    let hostname = req.hostname.trim().to_lowercase();
    if hostname.is_empty()
        || !hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(PloyerError::Validation("invalid hostname".to_string()));
    }

    let domain = DomainRepository::new(state.pool.clone())
        .create(&app.id, &hostname, req.is_primary)
        .await?;

    Ok((StatusCode::CREATED, Json(domain)))
}

pub async fn remove(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path((id, hostname)): Path<(String, String)>,
) -> Result<StatusCode> {
    let app = find_app(&state, &id).await?;

    let removed = DomainRepository::new(state.pool.clone())
        .delete(&app.id, &hostname)
        .await?;
    if !removed {
        return Err(PloyerError::NotFound("domain not found".to_string()));
    }

    // Best-effort; the reconciler removes it as well
    let _ = state.routes.remove_route(&hostname).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_primary(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path((id, hostname)): Path<(String, String)>,
) -> Result<StatusCode> {
    let app = find_app(&state, &id).await?;

    DomainRepository::new(state.pool.clone())
        .set_primary(&app.id, &hostname)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Recompute `ssl_active` from the proxy's certificate report.
pub async fn verify(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path((id, hostname)): Path<(String, String)>,
) -> Result<Json<Domain>> {
    let app = find_app(&state, &id).await?;

    let domains = DomainRepository::new(state.pool.clone());
    domains
        .list_for_app(&app.id)
        .await?
        .into_iter()
        .find(|d| d.hostname == hostname)
        .ok_or_else(|| PloyerError::NotFound("domain not found".to_string()))?;

    let status = state.routes.cert_status(&hostname).await?;
    domains
        .set_ssl_active(&hostname, status == CertStatus::Active)
        .await?;

    let domain = domains
        .find_by_hostname(&hostname)
        .await?
        .ok_or_else(|| PloyerError::NotFound("domain not found".to_string()))?;

    Ok(Json(domain))
}
