//! Deployment pipeline state runner
//!
//! Drives one deployment from `queued` through clone, build and roll-out to
//! `running`. Any error short-circuits to `failed`; the cooperative cancel
//! flag is observed between states and between streamed build-log lines and
//! leads to `cancelled`. The working directory is removed on every exit
//! path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::deploy::{build, BuildLog, PipelineContext};
use crate::errors::{PloyerError, Result};
use crate::models::domain::auto_subdomain;
use crate::models::{AppStatus, Application, Deployment, DeploymentStatus, Event};
use crate::monitor::health::probe_http;
use crate::store::{
    ApplicationRepository, DeployKeyRepository, DeploymentRepository, DomainRepository,
    EnvVarRepository, HealthCheckRepository,
};
use crate::utils::CancelFlag;

/// Execute one deployment to a terminal state. Never panics the worker; all
/// failure handling funnels through the terminal-state writes here.
pub async fn execute(
    ctx: &Arc<PipelineContext>,
    app: Application,
    deployment: Deployment,
    cancel: CancelFlag,
) {
    let deployments = DeploymentRepository::new(ctx.pool.clone());
    let apps = ApplicationRepository::new(ctx.pool.clone());
    let mut log = BuildLog::new(ctx.pool.clone(), ctx.bus.clone(), &deployment.id);
    let workdir = PathBuf::from(&ctx.config.build_root).join(&deployment.id);

    let outcome = run(ctx, &app, &deployment, &cancel, &mut log, &workdir).await;

    match outcome {
        Ok(()) => {
            info!("Deployment {} for {} is running", deployment.id, app.name);
        }
        Err(PloyerError::Cancelled) => {
            info!("Deployment {} cancelled", deployment.id);
            let _ = deployments.cancel(&deployment.id).await;
            let _ = log.append("Deployment cancelled").await;
            publish_status(ctx, &deployment, DeploymentStatus::Cancelled);
            let _ = restore_app_status(ctx, &app).await;
        }
        Err(e) => {
            error!("Deployment {} failed: {}", deployment.id, e);
            let _ = log.append(&format!("Deployment failed: {}", e)).await;
            let _ = deployments
                .update_status(&deployment.id, DeploymentStatus::Failed)
                .await;
            publish_status(ctx, &deployment, DeploymentStatus::Failed);

            // A previous container may still be serving; only report the app
            // failed when nothing is
            match deployments.latest_running(&app.id).await {
                Ok(Some(_)) => {
                    let _ = apps.update_status(&app.id, AppStatus::Running).await;
                    publish_app_status(ctx, &app.id, AppStatus::Running);
                }
                _ => {
                    let _ = apps.update_status(&app.id, AppStatus::Failed).await;
                    publish_app_status(ctx, &app.id, AppStatus::Failed);
                }
            }
        }
    }

    // Working directories are never reused across runs
    let _ = tokio::fs::remove_dir_all(&workdir).await;
}

async fn run(
    ctx: &Arc<PipelineContext>,
    app: &Application,
    deployment: &Deployment,
    cancel: &CancelFlag,
    log: &mut BuildLog,
    workdir: &Path,
) -> Result<()> {
    let deployments = DeploymentRepository::new(ctx.pool.clone());
    let apps = ApplicationRepository::new(ctx.pool.clone());

    ensure_not_cancelled(cancel)?;

    // ---- cloning ----
    deployments
        .update_status(&deployment.id, DeploymentStatus::Cloning)
        .await?;
    publish_status(ctx, deployment, DeploymentStatus::Cloning);
    apps.update_status(&app.id, AppStatus::Deploying).await?;
    publish_app_status(ctx, &app.id, AppStatus::Deploying);

    let git_url = app
        .git_url
        .as_deref()
        .ok_or_else(|| PloyerError::Validation("application has no git URL".to_string()))?;

    tokio::fs::create_dir_all(workdir).await?;
    log.append(&format!("Cloning repository: {}", git_url)).await?;

    let private_key = match DeployKeyRepository::new(ctx.pool.clone())
        .find_for_app(&app.id)
        .await?
    {
        Some(key) => Some(ctx.secrets.decrypt(&key.private_key_encrypted)?),
        None => None,
    };

    let commit = tokio::time::timeout(
        ctx.config.clone_timeout(),
        ctx.source
            .clone_at(git_url, &app.git_branch, workdir, private_key.as_deref(), cancel),
    )
    .await
    .map_err(|_| PloyerError::Timeout("repository clone".to_string()))??;

    deployments
        .set_commit(&deployment.id, &commit.sha, &commit.message)
        .await?;
    log.append(&format!("Commit: {} - {}", commit.sha, commit.message))
        .await?;

    // ---- building ----
    ensure_not_cancelled(cancel)?;
    deployments
        .update_status(&deployment.id, DeploymentStatus::Building)
        .await?;
    publish_status(ctx, deployment, DeploymentStatus::Building);
    log.append(&format!("Building image {}", deployment.image_tag))
        .await?;

    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    let build_future = build::build_image(
        &ctx.runtime,
        app,
        workdir,
        &deployment.image_tag,
        line_tx,
        cancel,
    );

    let consume_future = async {
        while let Some(line) = line_rx.recv().await {
            log.append(&line).await?;
        }
        Ok::<(), PloyerError>(())
    };

    let (build_result, consume_result) = tokio::join!(
        tokio::time::timeout(ctx.config.build_timeout(), build_future),
        consume_future
    );
    consume_result?;
    build_result.map_err(|_| PloyerError::Timeout("image build".to_string()))??;

    log.append("Build completed successfully").await?;

    // ---- deploying ----
    ensure_not_cancelled(cancel)?;
    deployments
        .update_status(&deployment.id, DeploymentStatus::Deploying)
        .await?;
    publish_status(ctx, deployment, DeploymentStatus::Deploying);
    log.append("Creating container...").await?;

    // Env values are decrypted fresh for this container only; a tampered
    // value aborts before anything is created
    let mut env = Vec::new();
    for var in EnvVarRepository::new(ctx.pool.clone())
        .list_for_app(&app.id)
        .await?
    {
        let value = ctx.secrets.decrypt(&var.value_encrypted)?;
        env.push((var.key, value));
    }

    let (container_id, host_port) = ctx
        .fleet
        .roll(app, &deployment.id, &deployment.image_tag, env)
        .await?;
    deployments
        .set_container(&deployment.id, &container_id, host_port)
        .await?;
    log.append(&format!("Container created: {}", container_id))
        .await?;

    if cancel.is_cancelled() {
        let _ = ctx.fleet.rollback(&app.id, &container_id).await;
        return Err(PloyerError::Cancelled);
    }

    // ---- health gate ----
    log.append("Waiting for health gate...").await?;
    tokio::time::sleep(ctx.config.startup_grace()).await;

    if let Err(e) = health_gate(ctx, app, &container_id, host_port).await {
        log.append(&format!("Health gate failed: {}", e)).await?;
        let _ = ctx.fleet.rollback(&app.id, &container_id).await;
        return Err(e);
    }

    // ---- running ----
    // The auto-subdomain is always present for a running application. It
    // only becomes primary when the user has not designated one themselves.
    let domains = DomainRepository::new(ctx.pool.clone());
    let hostname = auto_subdomain(&app.name, &ctx.base_domain);
    if domains.find_by_hostname(&hostname).await?.is_none() {
        let has_primary = domains
            .list_for_app(&app.id)
            .await?
            .iter()
            .any(|d| d.is_primary);
        domains.create(&app.id, &hostname, !has_primary).await?;
        log.append(&format!("Subdomain created: {}", hostname)).await?;
    }

    ctx.fleet.promote(app, &container_id, host_port).await?;
    ctx.fleet.stream_logs(&app.id, &container_id);

    deployments
        .update_status(&deployment.id, DeploymentStatus::Running)
        .await?;
    publish_status(ctx, deployment, DeploymentStatus::Running);
    apps.update_status(&app.id, AppStatus::Running).await?;
    publish_app_status(ctx, &app.id, AppStatus::Running);

    log.append("Deployment completed successfully").await?;
    Ok(())
}

/// Liveness gate after the startup grace. A configured health check demands
/// `healthy_threshold` consecutive successes; without one, a single probe
/// suffices. Applications without a published port pass on a running
/// container alone.
async fn health_gate(
    ctx: &Arc<PipelineContext>,
    app: &Application,
    container_id: &str,
    host_port: Option<u16>,
) -> Result<()> {
    let Some(port) = host_port else {
        let state = ctx.runtime.inspect_state(container_id).await?;
        return match state {
            Some(s) if s.running => Ok(()),
            _ => Err(PloyerError::Upstream(
                "container exited during startup".to_string(),
            )),
        };
    };

    let check = HealthCheckRepository::new(ctx.pool.clone())
        .find_for_app(&app.id)
        .await?;
    let (path, timeout_secs, threshold) = match &check {
        Some(c) => (c.path.clone(), c.timeout_seconds as u64, c.healthy_threshold),
        None => ("/".to_string(), 5, 1),
    };

    let attempts = threshold + 3;
    let mut consecutive_ok: i64 = 0;

    for attempt in 0..attempts {
        let outcome = probe_http(
            &ctx.http,
            port,
            &path,
            std::time::Duration::from_secs(timeout_secs),
        )
        .await;

        if outcome.healthy {
            consecutive_ok += 1;
            if consecutive_ok >= threshold {
                return Ok(());
            }
        } else {
            consecutive_ok = 0;
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    Err(PloyerError::Upstream(format!(
        "health gate not passed after {} probes",
        attempts
    )))
}

/// After a cancelled run the application reports whatever is actually still
/// serving.
async fn restore_app_status(ctx: &Arc<PipelineContext>, app: &Application) -> Result<()> {
    let deployments = DeploymentRepository::new(ctx.pool.clone());
    let apps = ApplicationRepository::new(ctx.pool.clone());

    let status = if deployments.latest_running(&app.id).await?.is_some() {
        AppStatus::Running
    } else {
        AppStatus::Stopped
    };
    apps.update_status(&app.id, status).await?;
    publish_app_status(ctx, &app.id, status);
    Ok(())
}

fn publish_status(ctx: &Arc<PipelineContext>, deployment: &Deployment, status: DeploymentStatus) {
    ctx.bus.publish(Event::DeploymentStatus {
        deployment_id: deployment.id.clone(),
        application_id: deployment.application_id.clone(),
        status,
    });
}

fn publish_app_status(ctx: &Arc<PipelineContext>, application_id: &str, status: AppStatus) {
    ctx.bus.publish(Event::AppStatus {
        application_id: application_id.to_string(),
        status,
    });
}

fn ensure_not_cancelled(cancel: &CancelFlag) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(PloyerError::Cancelled);
    }
    Ok(())
}
