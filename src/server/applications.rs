//! Application CRUD and deploy-key handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{PloyerError, Result};
use crate::models::{Application, BuildStrategy};
use crate::server::auth::AuthUser;
use crate::server::state::SharedState;
use crate::store::{
    ApplicationRepository, DeployKeyRepository, ServerRepository,
    applications::ApplicationUpdate,
};

#[derive(Debug, Deserialize)]
pub struct CreateApplicationRequest {
    pub name: String,
    pub server_id: Option<String>,
    pub git_url: Option<String>,
    pub git_branch: Option<String>,
    pub build_strategy: Option<BuildStrategy>,
    pub dockerfile_path: Option<String>,
    pub port: Option<u16>,
    pub auto_deploy: Option<bool>,
}

/// Partial update: absent fields are unchanged; explicit nulls clear
/// optional fields.
#[derive(Debug, Deserialize)]
pub struct UpdateApplicationRequest {
    #[serde(default, deserialize_with = "present")]
    pub git_url: Option<Option<String>>,
    pub git_branch: Option<String>,
    pub build_strategy: Option<BuildStrategy>,
    #[serde(default, deserialize_with = "present")]
    pub dockerfile_path: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub port: Option<Option<u16>>,
    pub auto_deploy: Option<bool>,
}

/// Distinguishes an absent field (outer `None`) from an explicit null
/// (inner `None`).
fn present<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub async fn list(
    _auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<Vec<Application>>> {
    let apps = ApplicationRepository::new(state.pool.clone()).list().await?;
    Ok(Json(apps))
}

pub async fn create(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Json(req): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(PloyerError::Validation("application name is required".to_string()));
    }
    if !req
        .name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(PloyerError::Validation(
            "application name may only contain lowercase letters, digits and dashes".to_string(),
        ));
    }

    let server_id = match req.server_id {
        Some(id) => id,
        None => ServerRepository::new(state.pool.clone())
            .find_local()
            .await?
            .ok_or_else(|| PloyerError::Internal("no local server registered".to_string()))?
            .id,
    };

    let apps = ApplicationRepository::new(state.pool.clone());
    let app = apps
        .create(
            &req.name,
            &server_id,
            req.git_url.as_deref(),
            req.git_branch.as_deref().unwrap_or("main"),
            req.build_strategy.unwrap_or_default(),
            req.dockerfile_path.as_deref(),
            req.port,
            req.auto_deploy.unwrap_or(true),
        )
        .await?;

    // An application with a git URL always has exactly one deploy key
    if app.git_url.is_some() {
        install_deploy_key(&state, &app).await?;
    }

    info!("Application {} created", app.name);
    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn get(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Application>> {
    let app = find_app(&state, &id).await?;
    Ok(Json(app))
}

pub async fn update(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateApplicationRequest>,
) -> Result<Json<Application>> {
    let app = find_app(&state, &id).await?;

    let had_git_url = app.git_url.is_some();

    let apps = ApplicationRepository::new(state.pool.clone());
    apps.update(
        &id,
        ApplicationUpdate {
            git_url: req.git_url.clone(),
            git_branch: req.git_branch,
            build_strategy: req.build_strategy,
            dockerfile_path: req.dockerfile_path,
            port: req.port,
            auto_deploy: req.auto_deploy,
        },
    )
    .await?;

    let updated = find_app(&state, &id).await?;

    // Adding a git URL later still guarantees a deploy key exists
    if !had_git_url && updated.git_url.is_some() {
        install_deploy_key(&state, &updated).await?;
    }

    Ok(Json(updated))
}

pub async fn delete(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let app = find_app(&state, &id).await?;

    // In-flight work is cancelled, the container and routes are torn down,
    // then the row cascade removes everything else
    state.orchestrator.cancel_active(&app.id).await?;
    state.fleet.remove(&app).await?;
    ApplicationRepository::new(state.pool.clone())
        .delete(&app.id)
        .await?;

    info!("Application {} deleted", app.name);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub container_id: String,
    pub lines: Vec<String>,
}

/// Recent log output of the application's current container.
pub async fn logs(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<LogsQuery>,
) -> Result<Json<LogsResponse>> {
    let app = find_app(&state, &id).await?;

    let container_id = state
        .fleet
        .current(&app.id)
        .await?
        .ok_or_else(|| PloyerError::NotFound("application has no running container".to_string()))?;

    let tail = query.tail.unwrap_or(100).clamp(1, 1000);
    let lines = state.runtime.container_logs(&container_id, tail).await?;

    Ok(Json(LogsResponse {
        container_id,
        lines,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeployKeyResponse {
    pub public_key: String,
}

pub async fn get_deploy_key(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<DeployKeyResponse>> {
    let app = find_app(&state, &id).await?;

    let key = DeployKeyRepository::new(state.pool.clone())
        .find_for_app(&app.id)
        .await?
        .ok_or_else(|| PloyerError::NotFound("application has no deploy key".to_string()))?;

    Ok(Json(DeployKeyResponse {
        public_key: key.public_key,
    }))
}

pub async fn regenerate_deploy_key(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<DeployKeyResponse>> {
    let app = find_app(&state, &id).await?;
    let key = install_deploy_key(&state, &app).await?;

    Ok(Json(DeployKeyResponse { public_key: key }))
}

/// Generate a key pair and store it, replacing any previous one. Returns the
/// public half.
async fn install_deploy_key(state: &SharedState, app: &Application) -> Result<String> {
    let comment = format!("ployer-{}", app.name);
    let pair = state.source.generate_keypair(&comment).await?;
    let sealed = state.secrets.encrypt(&pair.private_key)?;

    DeployKeyRepository::new(state.pool.clone())
        .replace(&app.id, &pair.public_key, &sealed)
        .await?;

    Ok(pair.public_key)
}

pub(crate) async fn find_app(state: &SharedState, id: &str) -> Result<Application> {
    ApplicationRepository::new(state.pool.clone())
        .find_by_id(id)
        .await?
        .ok_or_else(|| PloyerError::NotFound("application not found".to_string()))
}
