//! Webhook ingress
//!
//! Converts provider push events into deployments with at-most-once
//! semantics. GitHub signs the raw body with HMAC-SHA256
//! (`X-Hub-Signature-256`); GitLab sends the shared token verbatim
//! (`X-Gitlab-Token`). Comparisons are constant-time. Every accepted request
//! leaves exactly one delivery record with its outcome; nothing is retried.

mod payload;

pub use payload::{parse_github_push, parse_gitlab_push, PushPayload};

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::deploy::{DeployTrigger, Orchestrator};
use crate::errors::{PloyerError, Result};
use crate::models::{Webhook, WebhookDelivery, WebhookDeliveryStatus, WebhookProvider};
use crate::store::{ApplicationRepository, WebhookRepository};

type HmacSha256 = Hmac<Sha256>;

/// Verify a GitHub `X-Hub-Signature-256` header against the raw body.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> Result<()> {
    let expected_hex = signature
        .strip_prefix("sha256=")
        .ok_or_else(|| PloyerError::Unauthorized("invalid signature format".to_string()))?;

    let expected = hex::decode(expected_hex)
        .map_err(|_| PloyerError::Unauthorized("invalid signature encoding".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PloyerError::Internal(format!("invalid HMAC key: {}", e)))?;
    mac.update(payload);
    let computed = mac.finalize().into_bytes();

    if expected.len() != computed.len() || computed.ct_eq(&expected[..]).unwrap_u8() != 1 {
        return Err(PloyerError::Unauthorized(
            "signature verification failed".to_string(),
        ));
    }

    Ok(())
}

/// Verify a GitLab `X-Gitlab-Token` header.
pub fn verify_gitlab_token(secret: &str, token: &str) -> Result<()> {
    let secret = secret.as_bytes();
    let token = token.as_bytes();

    if secret.len() != token.len() || secret.ct_eq(token).unwrap_u8() != 1 {
        return Err(PloyerError::Unauthorized(
            "token verification failed".to_string(),
        ));
    }

    Ok(())
}

/// Provider credential taken from the request headers.
#[derive(Debug, Clone)]
pub enum ProviderAuth {
    /// `X-Hub-Signature-256` value
    GithubSignature(Option<String>),
    /// `X-Gitlab-Token` value
    GitlabToken(Option<String>),
}

/// One received ingress request, before verification.
#[derive(Debug, Clone)]
pub struct IngressRequest {
    pub application_id: String,
    pub auth: ProviderAuth,
    pub event_type: String,
    /// Provider delivery id header, when sent
    pub delivery_id: Option<String>,
    pub body: Vec<u8>,
}

pub struct WebhookIngress {
    pool: sqlx::SqlitePool,
    orchestrator: Arc<Orchestrator>,
}

impl WebhookIngress {
    pub fn new(pool: sqlx::SqlitePool, orchestrator: Arc<Orchestrator>) -> Self {
        Self { pool, orchestrator }
    }

    /// Process one ingress request to a recorded outcome. The error cases
    /// that leave a `failed` delivery behind still return the error so the
    /// transport can answer with the right status.
    pub async fn handle(&self, request: IngressRequest) -> Result<WebhookDelivery> {
        let webhooks = WebhookRepository::new(self.pool.clone());
        let apps = ApplicationRepository::new(self.pool.clone());

        let webhook = webhooks
            .find_for_app(&request.application_id)
            .await?
            .ok_or_else(|| PloyerError::NotFound("webhook not configured".to_string()))?;

        if !webhook.enabled {
            return Err(PloyerError::Forbidden("webhook is disabled".to_string()));
        }

        let expected_provider = match request.auth {
            ProviderAuth::GithubSignature(_) => WebhookProvider::Github,
            ProviderAuth::GitlabToken(_) => WebhookProvider::Gitlab,
        };
        if webhook.provider != expected_provider {
            return Err(PloyerError::Validation(format!(
                "webhook is configured for {}",
                webhook.provider.as_str()
            )));
        }

        // Verification failure is recorded before the request is rejected
        if let Err(e) = self.verify(&webhook, &request) {
            warn!(
                "Webhook verification failed for app {}: {}",
                request.application_id, e
            );
            self.record(&webhook, &request, None, WebhookDeliveryStatus::Failed, None)
                .await?;
            return Err(e);
        }

        let payload = match self.parse(&webhook, &request.body) {
            Ok(p) => p,
            Err(e) => {
                self.record(&webhook, &request, None, WebhookDeliveryStatus::Failed, None)
                    .await?;
                return Err(e);
            }
        };

        let app = apps
            .find_by_id(&request.application_id)
            .await?
            .ok_or_else(|| PloyerError::NotFound("application not found".to_string()))?;

        // Pushes to other branches are acknowledged but not deployed
        if payload.branch != app.git_branch {
            info!(
                "Skipping push to {} (deploying branch is {})",
                payload.branch, app.git_branch
            );
            return self
                .record(
                    &webhook,
                    &request,
                    Some(&payload),
                    WebhookDeliveryStatus::Skipped,
                    None,
                )
                .await;
        }

        let trigger_id = request
            .delivery_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        match self
            .orchestrator
            .enqueue(&app, DeployTrigger::Webhook { delivery_id: trigger_id })
            .await
        {
            Ok(deployment) => {
                self.record(
                    &webhook,
                    &request,
                    Some(&payload),
                    WebhookDeliveryStatus::Success,
                    Some(&deployment.id),
                )
                .await
            }
            Err(e) => {
                // One-shot: the failure is recorded, never retried
                self.record(&webhook, &request, Some(&payload), WebhookDeliveryStatus::Failed, None)
                    .await?;
                Err(e)
            }
        }
    }

    fn verify(&self, webhook: &Webhook, request: &IngressRequest) -> Result<()> {
        match &request.auth {
            ProviderAuth::GithubSignature(signature) => {
                let signature = signature.as_deref().ok_or_else(|| {
                    PloyerError::Unauthorized("missing signature header".to_string())
                })?;
                verify_github_signature(&webhook.secret, &request.body, signature)
            }
            ProviderAuth::GitlabToken(token) => {
                let token = token
                    .as_deref()
                    .ok_or_else(|| PloyerError::Unauthorized("missing token header".to_string()))?;
                verify_gitlab_token(&webhook.secret, token)
            }
        }
    }

    fn parse(&self, webhook: &Webhook, body: &[u8]) -> Result<PushPayload> {
        match webhook.provider {
            WebhookProvider::Github => parse_github_push(body),
            WebhookProvider::Gitlab => parse_gitlab_push(body),
        }
    }

    async fn record(
        &self,
        webhook: &Webhook,
        request: &IngressRequest,
        payload: Option<&PushPayload>,
        status: WebhookDeliveryStatus,
        deployment_id: Option<&str>,
    ) -> Result<WebhookDelivery> {
        let webhooks = WebhookRepository::new(self.pool.clone());
        webhooks
            .record_delivery(
                &webhook.id,
                &webhook.application_id,
                webhook.provider,
                &request.event_type,
                payload.map(|p| p.branch.as_str()),
                payload.map(|p| p.commit_sha.as_str()),
                payload.map(|p| p.commit_message.as_str()),
                payload.and_then(|p| p.author.as_deref()),
                status,
                deployment_id,
            )
            .await
    }
}
