//! Bearer-token authentication
//!
//! Token issuance lives outside the core; the API and the event stream only
//! validate tokens signed with the shared secret.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::PloyerError;
use crate::server::state::SharedState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Expiry (seconds since epoch)
    pub exp: usize,
}

pub fn validate_token(token: &str, secret: &str) -> Result<Claims, PloyerError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| PloyerError::Unauthorized(format!("invalid token: {}", e)))
}

/// Extractor for authenticated endpoints.
pub struct AuthUser(pub Claims);

#[async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = PloyerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PloyerError::Unauthorized("missing authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| PloyerError::Unauthorized("malformed authorization header".to_string()))?;

        let claims = validate_token(token, &state.config.auth.jwt_secret)?;
        Ok(AuthUser(claims))
    }
}
