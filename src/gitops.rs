//! Git adapter
//!
//! Drives the `git` binary for clone and update, and `ssh-keygen` for deploy
//! key generation. SSH authentication for private repositories uses the
//! application's deploy key, written to a mode-0600 temp file for the
//! duration of the command.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::{PloyerError, Result};
use crate::utils::CancelFlag;

/// HEAD commit of a freshly cloned or updated working directory.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

/// A generated deploy key pair. The private half is encrypted before it ever
/// reaches the store.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

#[async_trait]
pub trait RepoSource: Send + Sync {
    /// Shallow-clone `url` at `branch` into `dest` and report HEAD.
    async fn clone_at(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        private_key: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<CommitInfo>;

    /// Generate a fresh RSA key pair for read-only repository access.
    async fn generate_keypair(&self, comment: &str) -> Result<KeyPair>;
}

pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    /// Fetch `branch` and fast-forward an existing working directory,
    /// reporting the new HEAD.
    pub async fn update(
        &self,
        dir: &Path,
        branch: &str,
        private_key: Option<&str>,
    ) -> Result<CommitInfo> {
        let key_file = write_key_file(private_key).await?;

        run_git(dir, &["fetch", "origin", branch], key_file.as_ref()).await?;
        run_git(dir, &["merge", "--ff-only", "FETCH_HEAD"], None).await?;

        head_commit(dir).await
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepoSource for GitCli {
    async fn clone_at(
        &self,
        url: &str,
        branch: &str,
        dest: &Path,
        private_key: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<CommitInfo> {
        info!("Cloning {} (branch: {}) to {:?}", url, branch, dest);

        let key_file = write_key_file(private_key).await?;

        if cancel.is_cancelled() {
            return Err(PloyerError::Cancelled);
        }

        let dest_str = dest.to_string_lossy().to_string();
        run_git(
            Path::new("."),
            &["clone", "--depth", "1", "--branch", branch, url, &dest_str],
            key_file.as_ref(),
        )
        .await?;

        if cancel.is_cancelled() {
            return Err(PloyerError::Cancelled);
        }

        head_commit(dest).await
    }

    async fn generate_keypair(&self, comment: &str) -> Result<KeyPair> {
        let dir = tempfile::tempdir()?;
        let key_path = dir.path().join("id_rsa");
        let key_path_str = key_path.to_string_lossy().to_string();

        debug!("Generating RSA deploy key ({})", comment);

        let output = Command::new("ssh-keygen")
            .args(["-t", "rsa", "-b", "4096", "-N", "", "-C", comment, "-q", "-f", &key_path_str])
            .output()
            .await
            .map_err(|e| PloyerError::Upstream(format!("failed to run ssh-keygen: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PloyerError::Upstream(format!(
                "ssh-keygen failed: {}",
                stderr.trim()
            )));
        }

        let private_key = tokio::fs::read_to_string(&key_path).await?;
        let public_key = tokio::fs::read_to_string(key_path.with_extension("pub")).await?;

        Ok(KeyPair {
            public_key: public_key.trim().to_string(),
            private_key,
        })
    }
}

/// Write the private key to a temp file the ssh client will accept.
async fn write_key_file(private_key: Option<&str>) -> Result<Option<KeyFile>> {
    let Some(key) = private_key else {
        return Ok(None);
    };

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("deploy_key");
    tokio::fs::write(&path, key).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    Ok(Some(KeyFile { _dir: dir, path }))
}

/// Temp key material; removed with the backing directory on drop.
struct KeyFile {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl KeyFile {
    fn ssh_command(&self) -> String {
        format!(
            "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
            self.path.to_string_lossy()
        )
    }
}

async fn run_git(dir: &Path, args: &[&str], key_file: Option<&KeyFile>) -> Result<()> {
    debug!("git {}", args.join(" "));

    let mut cmd = Command::new("git");
    cmd.current_dir(dir).args(args);
    if let Some(key) = key_file {
        cmd.env("GIT_SSH_COMMAND", key.ssh_command());
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| PloyerError::Upstream(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PloyerError::Upstream(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }

    Ok(())
}

async fn head_commit(dir: &Path) -> Result<CommitInfo> {
    let sha = git_stdout(dir, &["rev-parse", "HEAD"]).await?;
    let message = git_stdout(dir, &["log", "-1", "--pretty=%B"]).await?;

    Ok(CommitInfo {
        sha: sha.trim().to_string(),
        message: message.trim().to_string(),
    })
}

async fn git_stdout(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .await
        .map_err(|e| PloyerError::Upstream(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PloyerError::Upstream(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
