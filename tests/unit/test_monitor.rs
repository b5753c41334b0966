//! Health monitor and reconciler tests

#[path = "support/mod.rs"]
mod support;

use std::sync::atomic::Ordering;

use ployer::models::{AppStatus, DeploymentStatus, Event, HealthStatus, Topics};
use ployer::monitor::HealthMonitor;
use ployer::proxy::RouteManager;
use ployer::reconcile::Reconciler;
use ployer::store::{
    ApplicationRepository, DeploymentRepository, DomainRepository, HealthCheckRepository,
};

use support::{serve_status, Harness};

/// Seed a running deployment on container `container_id` with `host_port`.
async fn seed_running(harness: &Harness, app_id: &str, container_id: &str, host_port: u16) {
    let deployments = DeploymentRepository::new(harness.pool.clone());
    let id = format!("d-{}", container_id);
    deployments
        .create(&id, app_id, &harness.server_id, &format!("ployer-x:{}", id), None)
        .await
        .unwrap();
    deployments
        .set_container(&id, container_id, Some(host_port))
        .await
        .unwrap();
    deployments
        .update_status(&id, DeploymentStatus::Running)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unhealthy_threshold_restarts_once() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", Some(3000)).await;

    // The app answers 500 on its health path
    let host_port = serve_status(500, "/h").await;
    seed_running(&harness, &app.id, "C1", host_port).await;
    harness.runtime.seed_container("C1", "web1-d-C1", Some(&app.id));

    HealthCheckRepository::new(harness.pool.clone())
        .upsert(&app.id, "/h", 0, 5, 2, 2)
        .await
        .unwrap();

    let sub = harness.bus.subscribe(&Topics::app(&app.id));
    let monitor = HealthMonitor::new(
        harness.pool.clone(),
        harness.fleet.clone(),
        harness.bus.clone(),
        reqwest::Client::new(),
    );

    // Two consecutive failures cross the threshold
    monitor.tick().await;
    assert_eq!(harness.runtime.restarts.load(Ordering::SeqCst), 0);
    monitor.tick().await;
    assert_eq!(harness.runtime.restarts.load(Ordering::SeqCst), 1);

    // Exactly one restart even if probes keep failing right after
    monitor.tick().await;
    assert_eq!(harness.runtime.restarts.load(Ordering::SeqCst), 1);

    // The transition to unhealthy was published
    let mut saw_unhealthy = false;
    while let Some(event) = sub.try_recv() {
        if matches!(
            event,
            Event::AppHealth {
                status: HealthStatus::Unhealthy,
                ..
            }
        ) {
            saw_unhealthy = true;
        }
    }
    assert!(saw_unhealthy);

    // Probe results were persisted
    let results = HealthCheckRepository::new(harness.pool.clone())
        .recent_results(&app.id, 10)
        .await
        .unwrap();
    assert!(results.len() >= 2);
    assert!(results.iter().all(|r| r.status == HealthStatus::Unhealthy));
}

#[tokio::test]
async fn test_healthy_app_is_not_restarted() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", Some(3000)).await;

    let host_port = serve_status(200, "/h").await;
    seed_running(&harness, &app.id, "C1", host_port).await;
    harness.runtime.seed_container("C1", "web1-d-C1", Some(&app.id));

    HealthCheckRepository::new(harness.pool.clone())
        .upsert(&app.id, "/h", 0, 5, 2, 2)
        .await
        .unwrap();

    let monitor = HealthMonitor::new(
        harness.pool.clone(),
        harness.fleet.clone(),
        harness.bus.clone(),
        reqwest::Client::new(),
    );

    for _ in 0..3 {
        monitor.tick().await;
    }

    assert_eq!(harness.runtime.restarts.load(Ordering::SeqCst), 0);

    let results = HealthCheckRepository::new(harness.pool.clone())
        .recent_results(&app.id, 10)
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.status == HealthStatus::Healthy));
    assert!(results[0].response_time_ms.is_some());
    assert_eq!(results[0].status_code, Some(200));
}

#[tokio::test]
async fn test_boot_reconciliation_marks_vanished_container_stopped() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", Some(3000)).await;

    // The store says running, but no such container exists
    seed_running(&harness, &app.id, "gone", 40000).await;

    let reconciler = Reconciler::new(harness.ctx.clone());
    reconciler.boot().await.unwrap();

    let app = ApplicationRepository::new(harness.pool.clone())
        .find_by_id(&app.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app.status, AppStatus::Stopped);
}

#[tokio::test]
async fn test_boot_reconciliation_removes_orphan_containers() {
    let harness = Harness::new().await;

    // Labeled container whose application no longer exists
    harness
        .runtime
        .seed_container("orphan", "ghost-app-d1", Some("no-such-app"));

    let reconciler = Reconciler::new(harness.ctx.clone());
    reconciler.boot().await.unwrap();

    assert_eq!(harness.runtime.container_count(), 0);
}

#[tokio::test]
async fn test_route_reconciliation_converges() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", Some(3000)).await;

    seed_running(&harness, &app.id, "C1", 40100).await;
    harness.runtime.seed_container("C1", "web1-d-C1", Some(&app.id));
    DomainRepository::new(harness.pool.clone())
        .create(&app.id, "web1.test.local", true)
        .await
        .unwrap();

    // A stale route nobody owns any more
    harness
        .routes
        .set_route(&ployer::proxy::Route {
            hostname: "stale.test.local".to_string(),
            backend_host: "127.0.0.1".to_string(),
            backend_port: 9,
        })
        .await
        .unwrap();

    let reconciler = Reconciler::new(harness.ctx.clone());
    reconciler.reconcile_routes().await.unwrap();

    let installed = harness.routes.route_for("web1.test.local").expect("desired route");
    assert_eq!(installed.backend_port, 40100);
    assert!(harness.routes.route_for("stale.test.local").is_none());
}
