//! Webhook verification and ingress tests

#[path = "support/mod.rs"]
mod support;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use ployer::errors::PloyerError;
use ployer::models::{WebhookDeliveryStatus, WebhookProvider};
use ployer::store::{DeploymentRepository, WebhookRepository};
use ployer::webhooks::{
    verify_github_signature, verify_gitlab_token, IngressRequest, ProviderAuth, WebhookIngress,
};

use support::Harness;

fn github_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn push_body(branch: &str) -> Vec<u8> {
    format!(
        r#"{{
            "ref": "refs/heads/{}",
            "head_commit": {{
                "id": "abc123",
                "message": "hi",
                "author": {{"name": "Dev"}}
            }}
        }}"#,
        branch
    )
    .into_bytes()
}

#[test]
fn test_github_signature_verification() {
    let secret = "S";
    let body = b"{\"test\":\"data\"}";
    let signature = github_signature(secret, body);

    assert!(verify_github_signature(secret, body, &signature).is_ok());
    assert!(matches!(
        verify_github_signature("wrong", body, &signature),
        Err(PloyerError::Unauthorized(_))
    ));
    assert!(matches!(
        verify_github_signature(secret, body, "sha256=deadbeef"),
        Err(PloyerError::Unauthorized(_))
    ));
    assert!(matches!(
        verify_github_signature(secret, body, "md5=whatever"),
        Err(PloyerError::Unauthorized(_))
    ));
}

#[test]
fn test_gitlab_token_verification() {
    assert!(verify_gitlab_token("token", "token").is_ok());
    assert!(matches!(
        verify_gitlab_token("token", "other"),
        Err(PloyerError::Unauthorized(_))
    ));
    assert!(matches!(
        verify_gitlab_token("token", "toke"),
        Err(PloyerError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_push_to_other_branch_is_skipped() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;

    let webhook = WebhookRepository::new(harness.pool.clone())
        .upsert(&app.id, WebhookProvider::Github, "S")
        .await
        .unwrap();

    let ingress = WebhookIngress::new(harness.pool.clone(), harness.orchestrator.clone());
    let body = push_body("other");
    let delivery = ingress
        .handle(IngressRequest {
            application_id: app.id.clone(),
            auth: ProviderAuth::GithubSignature(Some(github_signature(&webhook.secret, &body))),
            event_type: "push".to_string(),
            delivery_id: Some("gh-delivery-1".to_string()),
            body,
        })
        .await
        .expect("skipped pushes are acknowledged");

    assert_eq!(delivery.status, WebhookDeliveryStatus::Skipped);
    assert_eq!(delivery.branch.as_deref(), Some("other"));
    assert!(delivery.deployment_id.is_none());

    // No deployment was created
    let deployments = DeploymentRepository::new(harness.pool.clone())
        .list(Some(&app.id))
        .await
        .unwrap();
    assert!(deployments.is_empty());

    let recorded = WebhookRepository::new(harness.pool.clone())
        .list_deliveries(&app.id, 10)
        .await
        .unwrap();
    assert_eq!(recorded.len(), 1);
}

#[tokio::test]
async fn test_invalid_signature_is_rejected_and_recorded() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;

    WebhookRepository::new(harness.pool.clone())
        .upsert(&app.id, WebhookProvider::Github, "S")
        .await
        .unwrap();

    let ingress = WebhookIngress::new(harness.pool.clone(), harness.orchestrator.clone());
    let body = push_body("main");
    let result = ingress
        .handle(IngressRequest {
            application_id: app.id.clone(),
            auth: ProviderAuth::GithubSignature(Some(github_signature("wrong-secret", &body))),
            event_type: "push".to_string(),
            delivery_id: None,
            body,
        })
        .await;

    let err = result.expect_err("bad signature must be rejected");
    assert_eq!(err.status_code(), 401);

    // Exactly one failed delivery, zero deployments
    let recorded = WebhookRepository::new(harness.pool.clone())
        .list_deliveries(&app.id, 10)
        .await
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].status, WebhookDeliveryStatus::Failed);

    let deployments = DeploymentRepository::new(harness.pool.clone())
        .list(Some(&app.id))
        .await
        .unwrap();
    assert!(deployments.is_empty());
}

#[tokio::test]
async fn test_matching_push_enqueues_deployment() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;

    let webhook = WebhookRepository::new(harness.pool.clone())
        .upsert(&app.id, WebhookProvider::Github, "S")
        .await
        .unwrap();

    let ingress = WebhookIngress::new(harness.pool.clone(), harness.orchestrator.clone());
    let body = push_body("main");
    let delivery = ingress
        .handle(IngressRequest {
            application_id: app.id.clone(),
            auth: ProviderAuth::GithubSignature(Some(github_signature(&webhook.secret, &body))),
            event_type: "push".to_string(),
            delivery_id: Some("gh-delivery-2".to_string()),
            body,
        })
        .await
        .unwrap();

    assert_eq!(delivery.status, WebhookDeliveryStatus::Success);
    let deployment_id = delivery.deployment_id.expect("deployment was enqueued");

    let deployment = harness.await_terminal(&deployment_id).await;
    assert_eq!(deployment.triggered_by.as_deref(), Some("gh-delivery-2"));
}

#[tokio::test]
async fn test_disabled_webhook_is_forbidden() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;

    let webhooks = WebhookRepository::new(harness.pool.clone());
    webhooks
        .upsert(&app.id, WebhookProvider::Gitlab, "token")
        .await
        .unwrap();
    webhooks.set_enabled(&app.id, false).await.unwrap();

    let ingress = WebhookIngress::new(harness.pool.clone(), harness.orchestrator.clone());
    let result = ingress
        .handle(IngressRequest {
            application_id: app.id.clone(),
            auth: ProviderAuth::GitlabToken(Some("token".to_string())),
            event_type: "Push Hook".to_string(),
            delivery_id: None,
            body: b"{}".to_vec(),
        })
        .await;

    assert!(matches!(result, Err(PloyerError::Forbidden(_))));
}
