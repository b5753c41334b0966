//! Docker CLI driver for the container daemon

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use crate::errors::{PloyerError, Result};
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, LabeledContainer, StatsSample, APP_ID_LABEL,
};
use crate::utils::CancelFlag;

pub struct DockerCli {
    socket_path: String,
}

impl DockerCli {
    pub fn new(socket_path: &str) -> Self {
        info!("Container runtime configured via {}", socket_path);
        Self {
            socket_path: socket_path.to_string(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.env("DOCKER_HOST", format!("unix://{}", self.socket_path));
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a docker command to completion; stdout on success, stderr as an
    /// `Upstream` error otherwise.
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("docker {}", args.join(" "));

        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| PloyerError::Upstream(format!("failed to run docker: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PloyerError::Upstream(format!(
                "docker {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build_image(
        &self,
        context_dir: &Path,
        dockerfile: Option<&str>,
        tag: &str,
        log_tx: mpsc::Sender<String>,
        cancel: &CancelFlag,
    ) -> Result<()> {
        info!("Building image {} from {:?}", tag, context_dir);

        let mut cmd = self.command();
        cmd.current_dir(context_dir)
            .args(["build", "--progress", "plain", "-t", tag]);
        if let Some(path) = dockerfile {
            cmd.args(["-f", path]);
        }
        cmd.arg(".");
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| PloyerError::Upstream(format!("failed to run docker build: {}", e)))?;

        // BuildKit writes progress to stderr, classic builds to stdout; both
        // feed the same log channel.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_tx = log_tx.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if stdout_tx.send(line).await.is_err() {
                        break;
                    }
                }
            }
        });

        let mut cancelled = false;
        if let Some(err) = stderr {
            let mut lines = BufReader::new(err).lines();
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
            let _ = stdout_task.await;
            return Err(PloyerError::Cancelled);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| PloyerError::Upstream(format!("docker build wait failed: {}", e)))?;
        let _ = stdout_task.await;

        if cancel.is_cancelled() {
            return Err(PloyerError::Cancelled);
        }

        if !status.success() {
            return Err(PloyerError::Upstream(format!(
                "image build failed with status {}",
                status.code().unwrap_or(-1)
            )));
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), spec.name.clone()];

        for (key, value) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        if let Some(port) = spec.container_port {
            // Publish on an ephemeral host port; read back with host_port()
            args.push("-p".into());
            args.push(format!("127.0.0.1::{}", port));
        }
        args.push("--restart".into());
        args.push("unless-stopped".into());
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let stdout = self.run(&arg_refs).await?;

        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(PloyerError::Upstream(
                "docker create returned no container id".to_string(),
            ));
        }

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run(&["start", id]).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: u64) -> Result<()> {
        let timeout = timeout_secs.to_string();
        self.run(&["stop", "-t", &timeout, id]).await?;
        Ok(())
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.run(&["restart", id]).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        if force {
            self.run(&["rm", "-f", id]).await?;
        } else {
            self.run(&["rm", id]).await?;
        }
        Ok(())
    }

    async fn inspect_state(&self, name_or_id: &str) -> Result<Option<ContainerState>> {
        let result = self
            .run(&["inspect", "--format", "{{.Id}} {{.State.Running}}", name_or_id])
            .await;

        match result {
            Ok(stdout) => {
                let text = stdout.trim();
                let mut parts = text.split_whitespace();
                let id = parts.next().unwrap_or_default().to_string();
                let running = parts.next() == Some("true");
                if id.is_empty() {
                    return Ok(None);
                }
                Ok(Some(ContainerState { id, running }))
            }
            // "No such object" is an answer, not a failure
            Err(PloyerError::Upstream(msg)) if msg.contains("No such") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn host_port(&self, id: &str, container_port: u16) -> Result<Option<u16>> {
        let spec = format!("{}/tcp", container_port);
        let stdout = match self.run(&["port", id, &spec]).await {
            Ok(out) => out,
            Err(PloyerError::Upstream(msg)) if msg.contains("No such") => return Ok(None),
            Err(e) => return Err(e),
        };

        // e.g. "127.0.0.1:49153"
        let port = stdout
            .lines()
            .next()
            .and_then(|line| line.trim().rsplit(':').next())
            .and_then(|p| p.parse().ok());

        Ok(port)
    }

    async fn container_logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        let tail = tail.to_string();

        let output = self
            .command()
            .args(["logs", "--tail", &tail, id])
            .output()
            .await
            .map_err(|e| PloyerError::Upstream(format!("failed to run docker logs: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PloyerError::Upstream(format!(
                "docker logs failed: {}",
                stderr.trim()
            )));
        }

        // Container stdout and stderr both count as log output
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(|l| l.to_string()),
        );

        Ok(lines)
    }

    async fn follow_logs(
        &self,
        id: &str,
        log_tx: mpsc::Sender<String>,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let mut child = self
            .command()
            .args(["logs", "--follow", "--tail", "50", id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PloyerError::Upstream(format!("failed to follow logs: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stderr_tx = log_tx.clone();
        tokio::spawn(async move {
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if stderr_tx.send(line).await.is_err() {
                        break;
                    }
                }
            }
        });

        if let Some(out) = stdout {
            let mut lines = BufReader::new(out).lines();
            loop {
                // Poll the cancel flag even when the container is quiet
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if cancel.is_cancelled() || log_tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        _ => break,
                    },
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                    }
                }
            }
        }

        let _ = child.kill().await;
        Ok(())
    }

    async fn sample_stats(&self, id: &str) -> Result<StatsSample> {
        let stdout = self
            .run(&["stats", "--no-stream", "--format", "{{json .}}", id])
            .await?;

        parse_stats_line(stdout.trim())
    }

    async fn list_owned(&self) -> Result<Vec<LabeledContainer>> {
        let filter = format!("label={}", APP_ID_LABEL);
        let format = format!("{{{{.ID}}}}\t{{{{.Names}}}}\t{{{{.Label \"{}\"}}}}", APP_ID_LABEL);

        let stdout = self
            .run(&["ps", "-a", "--filter", &filter, "--format", &format])
            .await?;

        let containers = stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\t');
                Some(LabeledContainer {
                    id: parts.next()?.to_string(),
                    name: parts.next()?.to_string(),
                    application_id: parts.next()?.to_string(),
                })
            })
            .filter(|c| !c.application_id.is_empty())
            .collect();

        Ok(containers)
    }

    async fn ping(&self) -> bool {
        match self.run(&["version", "--format", "{{.Server.Version}}"]).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Container daemon unreachable: {}", e);
                false
            }
        }
    }
}

/// Parse one line of `docker stats --format '{{json .}}'` output.
fn parse_stats_line(line: &str) -> Result<StatsSample> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| PloyerError::Upstream(format!("unparseable stats output: {}", e)))?;

    let cpu_percent = value
        .get("CPUPerc")
        .and_then(|v| v.as_str())
        .and_then(|s| s.trim_end_matches('%').parse().ok())
        .unwrap_or(0.0);

    // "MemUsage": "24.5MiB / 1.9GiB"
    let (memory_mb, memory_limit_mb) = match value.get("MemUsage").and_then(|v| v.as_str()) {
        Some(usage) => {
            let mut parts = usage.split('/');
            let used = parts.next().and_then(parse_size_mb).unwrap_or(0.0);
            let limit = parts.next().and_then(parse_size_mb);
            (used, limit)
        }
        None => (0.0, None),
    };

    // "NetIO": "1.2kB / 3.4kB"
    let (network_rx_mb, network_tx_mb) = match value.get("NetIO").and_then(|v| v.as_str()) {
        Some(io) => {
            let mut parts = io.split('/');
            (
                parts.next().and_then(parse_size_mb),
                parts.next().and_then(parse_size_mb),
            )
        }
        None => (None, None),
    };

    Ok(StatsSample {
        cpu_percent,
        memory_mb,
        memory_limit_mb,
        network_rx_mb,
        network_tx_mb,
    })
}

/// Parse a human-formatted size ("24.5MiB", "1.9GB", "512B") into megabytes.
fn parse_size_mb(raw: &str) -> Option<f64> {
    let text = raw.trim();
    let split = text.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = text.split_at(split);
    let value: f64 = number.trim().parse().ok()?;

    let bytes = match unit.trim() {
        "B" => value,
        "kB" | "KB" => value * 1_000.0,
        "KiB" => value * 1_024.0,
        "MB" => value * 1_000_000.0,
        "MiB" => value * 1_048_576.0,
        "GB" => value * 1_000_000_000.0,
        "GiB" => value * 1_073_741_824.0,
        _ => return None,
    };

    Some(bytes / 1_048_576.0)
}
