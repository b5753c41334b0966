//! Error types for the Ployer server

use thiserror::Error;

/// Main error type, partitioned by how the failure is surfaced to callers.
#[derive(Error, Debug)]
pub enum PloyerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PloyerError {
    /// HTTP status the error maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            PloyerError::NotFound(_) => 404,
            PloyerError::Conflict(_) => 409,
            PloyerError::Validation(_) => 400,
            PloyerError::Unauthorized(_) => 401,
            PloyerError::Forbidden(_) => 403,
            // 499: the request was abandoned before the server finished
            PloyerError::Timeout(_) | PloyerError::Cancelled => 499,
            PloyerError::Upstream(_) | PloyerError::Crypto(_) | PloyerError::Internal(_) => 500,
        }
    }
}

impl From<std::io::Error> for PloyerError {
    fn from(err: std::io::Error) -> Self {
        PloyerError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for PloyerError {
    fn from(err: serde_json::Error) -> Self {
        PloyerError::Validation(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for PloyerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PloyerError::NotFound("row not found".to_string()),
            sqlx::Error::Database(e) if e.is_unique_violation() => {
                PloyerError::Conflict(e.to_string())
            }
            other => PloyerError::Internal(format!("Database error: {}", other)),
        }
    }
}

impl From<reqwest::Error> for PloyerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PloyerError::Timeout(err.to_string())
        } else {
            PloyerError::Upstream(err.to_string())
        }
    }
}

impl From<anyhow::Error> for PloyerError {
    fn from(err: anyhow::Error) -> Self {
        PloyerError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PloyerError>;
