//! Bearer token authentication

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::security::{AuthContext, Transport, UserDirectory};

/// Extract the bearer token from the Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Caller context for a request, if its token belongs to a known user
pub fn web_context(headers: &HeaderMap, users: &UserDirectory) -> Option<AuthContext> {
    let token = bearer_token(headers)?;
    let Some(user) = users.authenticate_token(token) else {
        tracing::warn!("unknown API token");
        return None;
    };

    let origin = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map_or("http", str::trim);

    Some(
        AuthContext::new(Transport::Web, user)
            .with_origin(origin)
            .with_path("/api/command"),
    )
}
