//! Orchestrator and pipeline tests with fake adapters

#[path = "support/mod.rs"]
mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use ployer::deploy::DeployTrigger;
use ployer::errors::PloyerError;
use ployer::models::{DeploymentStatus, Event, Topics};
use ployer::proxy::RouteManager;
use ployer::store::{DeploymentRepository, DomainRepository};

use support::{serve_status, FakeSource, Harness};

#[tokio::test]
async fn test_happy_path_deploy() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", Some(3000)).await;

    // Something must answer the health gate on the published host port
    let host_port = serve_status(200, "/").await;
    harness.runtime.set_host_port(3000, host_port);

    let sub = harness.bus.subscribe(&Topics::app(&app.id));

    let deployment = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Queued);
    assert_eq!(deployment.image_tag, format!("ployer-web1:{}", deployment.id));

    let finished = harness.await_terminal(&deployment.id).await;
    assert_eq!(finished.status, DeploymentStatus::Running);
    assert!(finished.finished_at.is_some());
    assert_eq!(finished.commit_sha.as_deref(), Some("abc123"));
    assert_eq!(finished.commit_message.as_deref(), Some("hi"));
    assert_eq!(finished.host_port, Some(host_port));

    // Auto-subdomain exists and routes to the new container's host port
    let domains = DomainRepository::new(harness.pool.clone())
        .list_for_app(&app.id)
        .await
        .unwrap();
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].hostname, "web1.test.local");
    assert!(domains[0].is_primary);

    let route = harness.routes.route_for("web1.test.local").expect("route installed");
    assert_eq!(route.backend_port, host_port);

    // App status event observed
    let mut saw_running = false;
    while let Some(event) = sub.try_recv() {
        if matches!(event, Event::AppStatus { status, .. } if status == ployer::models::AppStatus::Running)
        {
            saw_running = true;
        }
    }
    assert!(saw_running);

    // Build log kept its step messages
    assert!(finished
        .build_log
        .as_deref()
        .unwrap_or_default()
        .contains("Deployment completed successfully"));
}

#[tokio::test]
async fn test_auto_subdomain_does_not_demote_user_primary() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;

    // The user brought their own domain and made it primary before deploying
    let domains = DomainRepository::new(harness.pool.clone());
    domains.create(&app.id, "www.example.com", true).await.unwrap();

    let deployment = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();
    let finished = harness.await_terminal(&deployment.id).await;
    assert_eq!(finished.status, DeploymentStatus::Running);

    // The auto-subdomain still appears, but the user's primary is untouched
    let all = domains.list_for_app(&app.id).await.unwrap();
    assert_eq!(all.len(), 2);

    let auto = all
        .iter()
        .find(|d| d.hostname == "web1.test.local")
        .expect("auto-subdomain created");
    assert!(!auto.is_primary);

    let custom = all.iter().find(|d| d.hostname == "www.example.com").unwrap();
    assert!(custom.is_primary);
}

#[tokio::test]
async fn test_build_failure_preserves_previous_container() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", Some(3000)).await;

    // A previous deployment is live on container C1
    let deployments = DeploymentRepository::new(harness.pool.clone());
    deployments
        .create("d-old", &app.id, &harness.server_id, "ployer-web1:d-old", None)
        .await
        .unwrap();
    deployments.set_container("d-old", "C1", Some(40001)).await.unwrap();
    deployments
        .update_status("d-old", DeploymentStatus::Running)
        .await
        .unwrap();
    harness.runtime.seed_container("C1", "web1-d-old", Some(&app.id));
    harness
        .routes
        .set_route(&ployer::proxy::Route {
            hostname: "web1.test.local".to_string(),
            backend_host: "127.0.0.1".to_string(),
            backend_port: 40001,
        })
        .await
        .unwrap();

    harness.runtime.set_build_failure(&["ERR: compile"]);

    let deployment = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();
    let finished = harness.await_terminal(&deployment.id).await;

    assert_eq!(finished.status, DeploymentStatus::Failed);
    assert!(finished
        .build_log
        .as_deref()
        .unwrap_or_default()
        .contains("ERR: compile"));

    // The old container is untouched and still routed
    assert_eq!(
        harness.fleet.current(&app.id).await.unwrap().as_deref(),
        Some("C1")
    );
    let route = harness.routes.route_for("web1.test.local").unwrap();
    assert_eq!(route.backend_port, 40001);
}

#[tokio::test]
async fn test_cancel_before_clone_creates_nothing() {
    let source = FakeSource::new("abc123", "hi").with_delay(Duration::from_millis(500));
    let harness = Harness::with_source(source).await;
    let app = harness.create_app("web1", None).await;

    let deployment = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled = harness.orchestrator.cancel(&deployment.id).await.unwrap();
    assert_eq!(cancelled.status, DeploymentStatus::Cancelled);

    let finished = harness.await_terminal(&deployment.id).await;
    assert_eq!(finished.status, DeploymentStatus::Cancelled);

    // Give the worker a moment to run its cleanup path
    tokio::time::sleep(Duration::from_millis(700)).await;

    // No container was created and the working directory is gone
    assert_eq!(harness.runtime.created.load(Ordering::SeqCst), 0);
    let workdir = harness.workdir.path().join(&deployment.id);
    assert!(!workdir.exists());

    // A second cancel conflicts
    let second = harness.orchestrator.cancel(&deployment.id).await;
    assert!(matches!(second, Err(PloyerError::Conflict(_))));
}

#[tokio::test]
async fn test_cancel_after_running_is_refused() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;

    let deployment = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();
    let finished = harness.await_terminal(&deployment.id).await;
    assert_eq!(finished.status, DeploymentStatus::Running);

    let result = harness.orchestrator.cancel(&deployment.id).await;
    assert!(matches!(result, Err(PloyerError::Conflict(_))));
}

#[tokio::test]
async fn test_queued_entries_collapse_newest_wins() {
    let source = FakeSource::new("abc123", "hi").with_delay(Duration::from_millis(300));
    let harness = Harness::with_source(source).await;
    let app = harness.create_app("web1", None).await;

    // First starts immediately; the next two queue behind it
    let first = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();
    let third = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();

    let first = harness.await_terminal(&first.id).await;
    let second = harness.await_terminal(&second.id).await;
    let third = harness.await_terminal(&third.id).await;

    assert_eq!(first.status, DeploymentStatus::Running);
    // Only the newest waiting entry survived
    assert_eq!(second.status, DeploymentStatus::Cancelled);
    assert_eq!(third.status, DeploymentStatus::Running);
}

#[tokio::test]
async fn test_enqueue_same_trigger_is_idempotent() {
    let source = FakeSource::new("abc123", "hi").with_delay(Duration::from_millis(300));
    let harness = Harness::with_source(source).await;
    let app = harness.create_app("web1", None).await;

    // Occupy the worker so webhook enqueues stay queued
    let blocker = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let trigger = DeployTrigger::Webhook {
        delivery_id: "delivery-1".to_string(),
    };
    let first = harness.orchestrator.enqueue(&app, trigger.clone()).await.unwrap();
    let second = harness.orchestrator.enqueue(&app, trigger).await.unwrap();

    assert_eq!(first.id, second.id);

    harness.await_terminal(&blocker.id).await;
    harness.await_terminal(&first.id).await;
}

#[tokio::test]
async fn test_pipeline_never_overlaps_per_app() {
    let source = FakeSource::new("abc123", "hi").with_delay(Duration::from_millis(100));
    let harness = Harness::with_source(source).await;
    let app = harness.create_app("web1", None).await;

    let first = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();
    let second = harness
        .orchestrator
        .enqueue(&app, DeployTrigger::Manual)
        .await
        .unwrap();

    // While any deployment is mid-pipeline, no other is
    let deployments = DeploymentRepository::new(harness.pool.clone());
    for _ in 0..40 {
        let active: Vec<_> = deployments
            .list(Some(&app.id))
            .await
            .unwrap()
            .into_iter()
            .filter(|d| {
                matches!(
                    d.status,
                    DeploymentStatus::Cloning
                        | DeploymentStatus::Building
                        | DeploymentStatus::Deploying
                )
            })
            .collect();
        assert!(active.len() <= 1, "two deployments in flight at once");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    harness.await_terminal(&first.id).await;
    harness.await_terminal(&second.id).await;
}
