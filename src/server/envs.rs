//! Environment variable handlers
//!
//! Values are ciphertext at rest and plaintext on the wire.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::{PloyerError, Result};
use crate::server::applications::find_app;
use crate::server::auth::AuthUser;
use crate::server::state::SharedState;
use crate::store::EnvVarRepository;

#[derive(Debug, Serialize)]
pub struct EnvVarResponse {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEnvVarRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEnvVarRequest {
    pub value: String,
}

pub async fn list(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EnvVarResponse>>> {
    let app = find_app(&state, &id).await?;

    let vars = EnvVarRepository::new(state.pool.clone())
        .list_for_app(&app.id)
        .await?;

    let mut response = Vec::with_capacity(vars.len());
    for var in vars {
        response.push(EnvVarResponse {
            value: state.secrets.decrypt(&var.value_encrypted)?,
            key: var.key,
        });
    }

    Ok(Json(response))
}

pub async fn create(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<CreateEnvVarRequest>,
) -> Result<impl IntoResponse> {
    let app = find_app(&state, &id).await?;

    let key = req.key.trim().to_string();
    if key.is_empty() || key.contains('=') {
        return Err(PloyerError::Validation("invalid variable name".to_string()));
    }

    let sealed = state.secrets.encrypt(&req.value)?;
    EnvVarRepository::new(state.pool.clone())
        .upsert(&app.id, &key, &sealed)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(EnvVarResponse {
            key,
            value: req.value,
        }),
    ))
}

pub async fn update(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path((id, key)): Path<(String, String)>,
    Json(req): Json<UpdateEnvVarRequest>,
) -> Result<Json<EnvVarResponse>> {
    let app = find_app(&state, &id).await?;

    let repo = EnvVarRepository::new(state.pool.clone());
    repo.find(&app.id, &key)
        .await?
        .ok_or_else(|| PloyerError::NotFound("variable not found".to_string()))?;

    let sealed = state.secrets.encrypt(&req.value)?;
    repo.upsert(&app.id, &key, &sealed).await?;

    Ok(Json(EnvVarResponse {
        key,
        value: req.value,
    }))
}

pub async fn delete(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path((id, key)): Path<(String, String)>,
) -> Result<StatusCode> {
    let app = find_app(&state, &id).await?;

    let removed = EnvVarRepository::new(state.pool.clone())
        .delete(&app.id, &key)
        .await?;
    if !removed {
        return Err(PloyerError::NotFound("variable not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
