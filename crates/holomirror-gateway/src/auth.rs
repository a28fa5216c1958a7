//! Token gate for the inject channel.
//!
//! When `gateway.auth_required` is set, `GET /perturb/{worker_id}` must
//! carry the configured token, either as `Authorization: Bearer <token>` or
//! as a `?token=<token>` query parameter (browsers cannot set headers on a
//! `WebSocket` handshake). The check runs before the upgrade.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use holomirror_core::config::GatewaySection;

use crate::error::GatewayError;

/// Query parameters accepted on the inject endpoint.
#[derive(Debug, Default, serde::Deserialize)]
pub struct AuthQuery {
    /// Token passed in the query string.
    pub token: Option<String>,
}

/// Check the request credentials against the gateway settings.
pub fn authorize(
    settings: &GatewaySection,
    headers: &HeaderMap,
    query: &AuthQuery,
) -> Result<(), GatewayError> {
    if !settings.auth_required {
        return Ok(());
    }
    let Some(expected) = settings.auth_token.as_deref() else {
        return Err(GatewayError::Unauthorized(
            "authentication is required but no token is configured".to_owned(),
        ));
    };

    let presented = bearer_token(headers).or(query.token.as_deref());
    match presented {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(GatewayError::Unauthorized("invalid token".to_owned())),
        None => Err(GatewayError::Unauthorized("missing token".to_owned())),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}
