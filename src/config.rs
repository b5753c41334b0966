//! Server configuration
//!
//! Configuration is read from an optional JSON file (`PLOYER_CONFIG`) with
//! individual `PLOYER_*` environment variables taking precedence. Every field
//! has a default so a bare `ployer` starts on a fresh machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{PloyerError, Result};
use crate::logs::LogFormat;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    /// Log output format: `plain` or `json`
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            runtime: RuntimeConfig::default(),
            proxy: ProxyConfig::default(),
            deploy: DeployConfig::default(),
            log_format: LogFormat::Plain,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Domain suffix for auto-generated `{app-name}.{base_domain}` hostnames
    #[serde(default = "default_base_domain")]
    pub base_domain: String,

    /// Origin used when synthesizing webhook ingress URLs
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Comma-separated CORS allow list, `*` for permissive
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_base_domain() -> String {
    "localhost".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_allowed_origins() -> String {
    "*".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_domain: default_base_domain(),
            public_url: default_public_url(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// Embedded store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the sqlite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "ployer.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Auth configuration. The secret doubles as the SecretBox key root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_token_expiry_hours")]
    pub token_expiry_hours: u64,
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_token_expiry_hours() -> u64 {
    24
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_expiry_hours: default_token_expiry_hours(),
        }
    }
}

/// Container daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

fn default_socket_path() -> String {
    "/var/run/docker.sock".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

/// Reverse proxy admin endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_admin_url")]
    pub admin_url: String,
}

fn default_admin_url() -> String {
    "http://localhost:2019".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            admin_url: default_admin_url(),
        }
    }
}

/// Deployment pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Root directory for per-deployment working directories
    #[serde(default = "default_build_root")]
    pub build_root: String,

    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,

    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    #[serde(default = "default_start_timeout")]
    pub container_start_timeout_secs: u64,

    /// Delay before the post-start liveness probe
    #[serde(default = "default_startup_grace")]
    pub startup_grace_secs: u64,
}

fn default_build_root() -> String {
    "/tmp/ployer-builds".to_string()
}

fn default_clone_timeout() -> u64 {
    300
}

fn default_build_timeout() -> u64 {
    1800
}

fn default_start_timeout() -> u64 {
    60
}

fn default_startup_grace() -> u64 {
    5
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            build_root: default_build_root(),
            clone_timeout_secs: default_clone_timeout(),
            build_timeout_secs: default_build_timeout(),
            container_start_timeout_secs: default_start_timeout(),
            startup_grace_secs: default_startup_grace(),
        }
    }
}

impl DeployConfig {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn container_start_timeout(&self) -> Duration {
        Duration::from_secs(self.container_start_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }
}

impl Config {
    /// Load configuration: JSON file (if `PLOYER_CONFIG` points at one), then
    /// environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("PLOYER_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    PloyerError::Validation(format!("cannot read config {}: {}", path, e))
                })?;
                serde_json::from_str(&raw)
                    .map_err(|e| PloyerError::Validation(format!("invalid config: {}", e)))?
            }
            Err(_) => Config::default(),
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PLOYER_HOST") {
            self.http.host = v;
        }
        if let Ok(v) = std::env::var("PLOYER_PORT") {
            if let Ok(port) = v.parse() {
                self.http.port = port;
            }
        }
        if let Ok(v) = std::env::var("PLOYER_BASE_DOMAIN") {
            self.http.base_domain = v;
        }
        if let Ok(v) = std::env::var("PLOYER_PUBLIC_URL") {
            self.http.public_url = v;
        }
        if let Ok(v) = std::env::var("PLOYER_ALLOWED_ORIGINS") {
            self.http.allowed_origins = v;
        }
        if let Ok(v) = std::env::var("PLOYER_DATABASE_PATH") {
            self.database.path = v;
        }
        if let Ok(v) = std::env::var("PLOYER_JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("PLOYER_TOKEN_EXPIRY_HOURS") {
            if let Ok(hours) = v.parse() {
                self.auth.token_expiry_hours = hours;
            }
        }
        if let Ok(v) = std::env::var("PLOYER_CONTAINER_SOCKET") {
            self.runtime.socket_path = v;
        }
        if let Ok(v) = std::env::var("PLOYER_PROXY_ADMIN_URL") {
            self.proxy.admin_url = v;
        }
        if let Ok(v) = std::env::var("PLOYER_BUILD_ROOT") {
            self.deploy.build_root = v;
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            if let Ok(format) = v.parse() {
                self.log_format = format;
            }
        }
    }
}
