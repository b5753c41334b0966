//! Store repository tests against an in-memory database

#[path = "support/mod.rs"]
mod support;

use chrono::{Duration, Utc};

use ployer::errors::PloyerError;
use ployer::models::DeploymentStatus;
use ployer::store::{
    ApplicationRepository, ContainerStatsRepository, DeployKeyRepository, DeploymentRepository,
    DomainRepository,
};

use support::Harness;

#[tokio::test]
async fn test_application_name_is_unique() {
    let harness = Harness::new().await;
    harness.create_app("web1", None).await;

    let result = ApplicationRepository::new(harness.pool.clone())
        .create(
            "web1",
            &harness.server_id,
            None,
            "main",
            ployer::models::BuildStrategy::Dockerfile,
            None,
            None,
            true,
        )
        .await;

    assert!(matches!(result, Err(PloyerError::Conflict(_))));
}

#[tokio::test]
async fn test_at_most_one_primary_domain() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;
    let domains = DomainRepository::new(harness.pool.clone());

    domains.create(&app.id, "a.test.local", true).await.unwrap();
    domains.create(&app.id, "b.test.local", false).await.unwrap();

    domains.set_primary(&app.id, "b.test.local").await.unwrap();

    let all = domains.list_for_app(&app.id).await.unwrap();
    let primaries: Vec<_> = all.iter().filter(|d| d.is_primary).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].hostname, "b.test.local");
}

#[tokio::test]
async fn test_hostname_is_globally_unique() {
    let harness = Harness::new().await;
    let first = harness.create_app("web1", None).await;
    let second = harness.create_app("web2", None).await;
    let domains = DomainRepository::new(harness.pool.clone());

    domains.create(&first.id, "app.test.local", true).await.unwrap();
    let result = domains.create(&second.id, "app.test.local", true).await;

    assert!(matches!(result, Err(PloyerError::Conflict(_))));
}

#[tokio::test]
async fn test_set_primary_on_missing_domain() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;

    let result = DomainRepository::new(harness.pool.clone())
        .set_primary(&app.id, "nope.test.local")
        .await;

    assert!(matches!(result, Err(PloyerError::NotFound(_))));
}

#[tokio::test]
async fn test_deploy_key_replacement_leaves_one_key() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;
    let keys = DeployKeyRepository::new(harness.pool.clone());

    keys.replace(&app.id, "pub-1", "sealed-1").await.unwrap();
    keys.replace(&app.id, "pub-2", "sealed-2").await.unwrap();

    let key = keys.find_for_app(&app.id).await.unwrap().unwrap();
    assert_eq!(key.public_key, "pub-2");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deploy_keys WHERE application_id = ?")
        .bind(&app.id)
        .fetch_one(&harness.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_cancel_is_guarded_by_terminal_states() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;
    let deployments = DeploymentRepository::new(harness.pool.clone());

    let deployment = deployments
        .create("d-1", &app.id, &harness.server_id, "ployer-web1:d-1", None)
        .await
        .unwrap();

    assert!(deployments.cancel(&deployment.id).await.unwrap());
    // Second cancel hits a terminal row
    assert!(!deployments.cancel(&deployment.id).await.unwrap());

    let row = deployments.find_by_id(&deployment.id).await.unwrap().unwrap();
    assert_eq!(row.status, DeploymentStatus::Cancelled);
    assert!(row.finished_at.is_some());
}

#[tokio::test]
async fn test_terminal_status_stamps_finished_at() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;
    let deployments = DeploymentRepository::new(harness.pool.clone());

    let deployment = deployments
        .create("d-2", &app.id, &harness.server_id, "ployer-web1:d-2", None)
        .await
        .unwrap();

    deployments
        .update_status(&deployment.id, DeploymentStatus::Cloning)
        .await
        .unwrap();
    let row = deployments.find_by_id(&deployment.id).await.unwrap().unwrap();
    assert!(row.finished_at.is_none());

    deployments
        .update_status(&deployment.id, DeploymentStatus::Running)
        .await
        .unwrap();
    let row = deployments.find_by_id(&deployment.id).await.unwrap().unwrap();
    assert!(row.finished_at.is_some());
}

#[tokio::test]
async fn test_build_log_appends_in_order() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;
    let deployments = DeploymentRepository::new(harness.pool.clone());

    let deployment = deployments
        .create("d-3", &app.id, &harness.server_id, "ployer-web1:d-3", None)
        .await
        .unwrap();

    deployments.append_log(&deployment.id, "one").await.unwrap();
    deployments.append_log(&deployment.id, "two").await.unwrap();

    let row = deployments.find_by_id(&deployment.id).await.unwrap().unwrap();
    assert_eq!(row.build_log.as_deref(), Some("one\ntwo\n"));
}

#[tokio::test]
async fn test_stats_sweep_enforces_retention() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;
    let stats = ContainerStatsRepository::new(harness.pool.clone());

    stats
        .record("ctr-1", Some(&app.id), 1.0, 10.0, None, None, None)
        .await
        .unwrap();

    // Backdate a second sample past the retention window
    let old = Utc::now() - Duration::hours(30);
    sqlx::query(
        "INSERT INTO container_stats (id, container_id, application_id, cpu_percent, memory_mb, recorded_at) \
         VALUES ('old-row', 'ctr-1', ?, 1.0, 10.0, ?)",
    )
    .bind(&app.id)
    .bind(old)
    .execute(&harness.pool)
    .await
    .unwrap();

    let deleted = stats.sweep_older_than(24).await.unwrap();
    assert_eq!(deleted, 1);

    let remaining = stats.list_for_app(&app.id, 48).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].id, "old-row");
}

#[tokio::test]
async fn test_application_cascade_delete() {
    let harness = Harness::new().await;
    let app = harness.create_app("web1", None).await;

    DomainRepository::new(harness.pool.clone())
        .create(&app.id, "web1.test.local", true)
        .await
        .unwrap();
    DeployKeyRepository::new(harness.pool.clone())
        .replace(&app.id, "pub", "sealed")
        .await
        .unwrap();
    DeploymentRepository::new(harness.pool.clone())
        .create("d-4", &app.id, &harness.server_id, "ployer-web1:d-4", None)
        .await
        .unwrap();

    ApplicationRepository::new(harness.pool.clone())
        .delete(&app.id)
        .await
        .unwrap();

    for table in ["domains", "deploy_keys", "deployments"] {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE application_id = ?", table))
                .bind(&app.id)
                .fetch_one(&harness.pool)
                .await
                .unwrap();
        assert_eq!(count, 0, "{} rows survived the cascade", table);
    }
}
