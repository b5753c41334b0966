//! Deployment handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::deploy::DeployTrigger;
use crate::errors::{PloyerError, Result};
use crate::models::Deployment;
use crate::server::applications::find_app;
use crate::server::auth::AuthUser;
use crate::server::state::SharedState;
use crate::store::DeploymentRepository;

pub async fn deploy(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let app = find_app(&state, &id).await?;

    if app.git_url.is_none() {
        return Err(PloyerError::Validation(
            "application has no git URL configured".to_string(),
        ));
    }

    let deployment = state
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub application_id: Option<String>,
}

pub async fn list(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Deployment>>> {
    let deployments = DeploymentRepository::new(state.pool.clone())
        .list(query.application_id.as_deref())
        .await?;

    Ok(Json(deployments))
}

pub async fn get(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>> {
    let deployment = DeploymentRepository::new(state.pool.clone())
        .find_by_id(&id)
        .await?
        .ok_or_else(|| PloyerError::NotFound("deployment not found".to_string()))?;

    Ok(Json(deployment))
}

pub async fn cancel(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>> {
    let deployment = state.orchestrator.cancel(&id).await?;
    Ok(Json(deployment))
}
