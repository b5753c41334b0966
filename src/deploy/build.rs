//! Build strategies
//!
//! Produces the deployment's container image from a cloned working
//! directory. Dockerfile builds go straight to the daemon; Nixpacks runs the
//! external builder; Docker Compose builds the image of the first service in
//! document order that declares a `ports` entry.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::info;

use crate::errors::{PloyerError, Result};
use crate::models::{Application, BuildStrategy};
use crate::runtime::ContainerRuntime;
use crate::utils::CancelFlag;

const COMPOSE_FILES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Build the image for `app` from `workdir`, tagging it `tag`. Build output
/// lines stream into `log_tx`.
pub async fn build_image(
    runtime: &Arc<dyn ContainerRuntime>,
    app: &Application,
    workdir: &Path,
    tag: &str,
    log_tx: mpsc::Sender<String>,
    cancel: &CancelFlag,
) -> Result<()> {
    match app.build_strategy {
        BuildStrategy::Dockerfile => {
            runtime
                .build_image(workdir, app.dockerfile_path.as_deref(), tag, log_tx, cancel)
                .await
        }
        BuildStrategy::Nixpacks => nixpacks_build(workdir, tag, log_tx, cancel).await,
        BuildStrategy::DockerCompose => {
            let service = compose_app_service(workdir).await?;
            info!("Compose service '{}' selected for build", service.name);
            let _ = log_tx
                .send(format!("Building compose service '{}'", service.name))
                .await;
            runtime
                .build_image(
                    &service.context,
                    service.dockerfile.as_deref(),
                    tag,
                    log_tx,
                    cancel,
                )
                .await
        }
    }
}

/// Run the external `nixpacks` builder, streaming its output.
async fn nixpacks_build(
    workdir: &Path,
    tag: &str,
    log_tx: mpsc::Sender<String>,
    cancel: &CancelFlag,
) -> Result<()> {
    info!("Building {} with nixpacks", tag);

    let mut child = Command::new("nixpacks")
        .current_dir(workdir)
        .args(["build", ".", "--name", tag])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PloyerError::Upstream(format!("failed to run nixpacks: {}", e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stderr_tx = log_tx.clone();
    let stderr_task = tokio::spawn(async move {
        if let Some(err) = stderr {
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(line).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut cancelled = false;
    if let Some(out) = stdout {
        let mut lines = BufReader::new(out).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if log_tx.send(line).await.is_err() {
                break;
            }
        }
    }

    if cancelled || cancel.is_cancelled() {
        let _ = child.kill().await;
        let _ = stderr_task.await;
        return Err(PloyerError::Cancelled);
    }

    let status = child
        .wait()
        .await
        .map_err(|e| PloyerError::Upstream(format!("nixpacks wait failed: {}", e)))?;
    let _ = stderr_task.await;

    if !status.success() {
        return Err(PloyerError::Upstream(format!(
            "nixpacks build failed with status {}",
            status.code().unwrap_or(-1)
        )));
    }

    Ok(())
}

/// The service a compose file designates as the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeService {
    pub name: String,
    /// Build context resolved against the working directory
    pub context: PathBuf,
    pub dockerfile: Option<String>,
}

/// Locate and parse the compose file in `workdir` and pick the application
/// service: the first one in document order with a `ports` entry.
async fn compose_app_service(workdir: &Path) -> Result<ComposeService> {
    for name in COMPOSE_FILES {
        let path = workdir.join(name);
        if path.exists() {
            let raw = tokio::fs::read_to_string(&path).await?;
            return select_compose_service(&raw, workdir);
        }
    }

    Err(PloyerError::Validation(
        "no compose file found in repository".to_string(),
    ))
}

/// Pure selection logic, split out for testing.
pub fn select_compose_service(raw: &str, workdir: &Path) -> Result<ComposeService> {
    let doc: serde_yaml::Value = serde_yaml::from_str(raw)
        .map_err(|e| PloyerError::Validation(format!("invalid compose file: {}", e)))?;

    let services = doc
        .get("services")
        .and_then(|s| s.as_mapping())
        .ok_or_else(|| PloyerError::Validation("compose file has no services".to_string()))?;

    // serde_yaml mappings preserve document order
    for (key, service) in services {
        let name = key.as_str().unwrap_or_default().to_string();

        let has_ports = service
            .get("ports")
            .and_then(|p| p.as_sequence())
            .map(|seq| !seq.is_empty())
            .unwrap_or(false);
        if !has_ports {
            continue;
        }

        let (context, dockerfile) = match service.get("build") {
            Some(serde_yaml::Value::String(context)) => (context.clone(), None),
            Some(serde_yaml::Value::Mapping(build)) => {
                let context = build
                    .get("context")
                    .and_then(|c| c.as_str())
                    .unwrap_or(".")
                    .to_string();
                let dockerfile = build
                    .get("dockerfile")
                    .and_then(|d| d.as_str())
                    .map(|d| d.to_string());
                (context, dockerfile)
            }
            _ => {
                return Err(PloyerError::Validation(format!(
                    "compose service '{}' has no build section",
                    name
                )))
            }
        };

        return Ok(ComposeService {
            name,
            context: workdir.join(context),
            dockerfile,
        });
    }

    Err(PloyerError::Validation(
        "no compose service declares a port mapping".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_service_with_ports_wins() {
        let raw = r#"
services:
  db:
    image: postgres:16
  web:
    build: .
    ports:
      - "3000:3000"
  worker:
    build: ./worker
    ports:
      - "4000:4000"
"#;
        let service = select_compose_service(raw, Path::new("/work")).unwrap();
        assert_eq!(service.name, "web");
        assert_eq!(service.context, Path::new("/work/."));
        assert_eq!(service.dockerfile, None);
    }

    #[test]
    fn test_build_mapping_with_dockerfile() {
        let raw = r#"
services:
  api:
    build:
      context: ./api
      dockerfile: Dockerfile.prod
    ports:
      - "8080:8080"
"#;
        let service = select_compose_service(raw, Path::new("/work")).unwrap();
        assert_eq!(service.context, Path::new("/work/./api"));
        assert_eq!(service.dockerfile.as_deref(), Some("Dockerfile.prod"));
    }

    #[test]
    fn test_no_ports_is_rejected() {
        let raw = r#"
services:
  db:
    image: postgres:16
"#;
        let result = select_compose_service(raw, Path::new("/work"));
        assert!(matches!(result, Err(PloyerError::Validation(_))));
    }
}
