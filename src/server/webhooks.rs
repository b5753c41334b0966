//! Webhook configuration and provider ingress handlers
//!
//! The ingress endpoints carry no bearer token; the provider signature or
//! token is the authentication.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{PloyerError, Result};
use crate::models::{WebhookDelivery, WebhookProvider};
use crate::server::applications::find_app;
use crate::server::auth::AuthUser;
use crate::server::state::SharedState;
use crate::store::WebhookRepository;
use crate::webhooks::{IngressRequest, ProviderAuth};

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub provider: WebhookProvider,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: String,
    pub application_id: String,
    pub provider: WebhookProvider,
    pub webhook_url: String,
    pub secret: String,
    pub enabled: bool,
}

fn webhook_url(state: &SharedState, provider: WebhookProvider, app_id: &str) -> String {
    format!(
        "{}/api/v1/webhooks/{}?app_id={}",
        state.config.http.public_url,
        provider.as_str(),
        app_id
    )
}

pub async fn create(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<impl IntoResponse> {
    let app = find_app(&state, &id).await?;

    let secret = Uuid::new_v4().to_string();
    let webhook = WebhookRepository::new(state.pool.clone())
        .upsert(&app.id, req.provider, &secret)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(WebhookResponse {
            webhook_url: webhook_url(&state, webhook.provider, &webhook.application_id),
            id: webhook.id,
            application_id: webhook.application_id,
            provider: webhook.provider,
            secret: webhook.secret,
            enabled: webhook.enabled,
        }),
    ))
}

pub async fn get(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<WebhookResponse>> {
    let app = find_app(&state, &id).await?;

    let webhook = WebhookRepository::new(state.pool.clone())
        .find_for_app(&app.id)
        .await?
        .ok_or_else(|| PloyerError::NotFound("webhook not configured".to_string()))?;

    Ok(Json(WebhookResponse {
        webhook_url: webhook_url(&state, webhook.provider, &webhook.application_id),
        id: webhook.id,
        application_id: webhook.application_id,
        provider: webhook.provider,
        secret: webhook.secret,
        enabled: webhook.enabled,
    }))
}

pub async fn delete(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let app = find_app(&state, &id).await?;

    let removed = WebhookRepository::new(state.pool.clone())
        .delete(&app.id)
        .await?;
    if !removed {
        return Err(PloyerError::NotFound("webhook not configured".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_deliveries(
    _auth: AuthUser,
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<WebhookDelivery>>> {
    let app = find_app(&state, &id).await?;

    let deliveries = WebhookRepository::new(state.pool.clone())
        .list_deliveries(&app.id, 50)
        .await?;

    Ok(Json(deliveries))
}

#[derive(Debug, Deserialize)]
pub struct IngressQuery {
    pub app_id: String,
}

#[derive(Debug, Serialize)]
pub struct IngressResponse {
    pub status: String,
    pub deployment_id: Option<String>,
}

pub async fn github_ingress(
    State(state): State<SharedState>,
    Query(query): Query<IngressQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<IngressResponse>> {
    let request = IngressRequest {
        application_id: query.app_id,
        auth: ProviderAuth::GithubSignature(header_value(&headers, "x-hub-signature-256")),
        event_type: header_value(&headers, "x-github-event").unwrap_or_else(|| "push".to_string()),
        delivery_id: header_value(&headers, "x-github-delivery"),
        body: body.to_vec(),
    };

    let delivery = state.ingress.handle(request).await?;
    Ok(Json(IngressResponse {
        status: delivery.status.as_str().to_string(),
        deployment_id: delivery.deployment_id,
    }))
}

pub async fn gitlab_ingress(
    State(state): State<SharedState>,
    Query(query): Query<IngressQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<IngressResponse>> {
    let request = IngressRequest {
        application_id: query.app_id,
        auth: ProviderAuth::GitlabToken(header_value(&headers, "x-gitlab-token")),
        event_type: header_value(&headers, "x-gitlab-event")
            .unwrap_or_else(|| "Push Hook".to_string()),
        delivery_id: header_value(&headers, "x-gitlab-event-uuid"),
        body: body.to_vec(),
    };

    let delivery = state.ingress.handle(request).await?;
    Ok(Json(IngressResponse {
        status: delivery.status.as_str().to_string(),
        deployment_id: delivery.deployment_id,
    }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
