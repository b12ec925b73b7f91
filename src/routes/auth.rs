//! Request authentication

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::AppState;
use crate::services::error::LogErr;
use crate::services::session;

// ============================================================================
// Auth Extractor - validates JWT cookie and extracts user_id
// ============================================================================

/// Extractor that validates the access_token cookie (or a Bearer header)
/// and returns the user_id
pub struct AuthUser(pub i64);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        let token = match jar.get("access_token") {
            Some(cookie) => cookie.value().to_string(),
            None => bearer_token(parts).ok_or(StatusCode::UNAUTHORIZED)?.to_string(),
        };

        let user_id = session::validate_access_token(&token, &state.jwt_secret)
            .log_status("JWT validation failed", StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser(user_id))
    }
}
