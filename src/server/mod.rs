//! HTTP surface: REST handlers and the real-time event stream

pub mod applications;
pub mod auth;
pub mod deployments;
pub mod domains;
pub mod envs;
pub mod events;
pub mod health;
pub mod serve;
pub mod state;
pub mod webhooks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::errors::PloyerError;

impl IntoResponse for PloyerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
