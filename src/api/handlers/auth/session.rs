//! Session cookie handling and logout.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::state::{AuthConfig, AuthState};
use super::storage::{delete_session, lookup_session, SessionRecord};
use super::types::BasicOk;
use super::utils::{extract_cookie, hash_token};
use crate::api::error::ApiError;

/// Build the `HttpOnly` session cookie.
pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let name = config.session_cookie_name();
    let ttl_seconds = config.session_ttl_seconds();
    let suffix = config.cookie().suffix();
    HeaderValue::from_str(&format!(
        "{name}={token}; Path=/; HttpOnly; Max-Age={ttl_seconds}{suffix}"
    ))
}

pub(super) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let name = config.session_cookie_name();
    let suffix = config.cookie().suffix();
    HeaderValue::from_str(&format!("{name}=; Path=/; HttpOnly; Max-Age=0{suffix}"))
}

/// Resolve the session cookie into a session record, if present and unexpired.
///
/// Returns `Ok(None)` when the cookie is missing or does not resolve; missing
/// cookies are indistinguishable from stale ones to avoid leaking auth state.
///
/// # Errors
/// `Internal` on storage failures.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    pool: &PgPool,
    config: &AuthConfig,
) -> Result<Option<SessionRecord>, ApiError> {
    let Some(token) = extract_cookie(headers, config.session_cookie_name()) else {
        return Ok(None);
    };
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_token(&token);
    Ok(lookup_session(pool, &token_hash).await?)
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = BasicOk)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_cookie(&headers, auth_state.config().session_cookie_name()) {
        let token_hash = hash_token(&token);
        if let Err(err) = delete_session(&pool, &token_hash).await {
            // Logout still succeeds; the cookie is cleared regardless.
            error!("Failed to delete session: {err}");
        }
    }

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((response_headers, Json(BasicOk::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prod_config() -> AuthConfig {
        AuthConfig::new(
            "https://api.klaso.dev".to_string(),
            "https://app.klaso.dev".to_string(),
            false,
        )
    }

    fn dev_config() -> AuthConfig {
        AuthConfig::new(
            "http://127.0.0.1:8080".to_string(),
            "http://localhost:5173".to_string(),
            true,
        )
    }

    #[test]
    fn production_session_cookie_attributes() {
        let cookie = session_cookie(&prod_config(), "token-value").expect("cookie");
        let value = cookie.to_str().expect("ascii");
        assert!(value.starts_with("session_id=token-value; "));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Path=/"));
        assert!(value.contains("Max-Age=7200"));
        assert!(value.contains("SameSite=None"));
        assert!(value.contains("Secure"));
    }

    #[test]
    fn development_session_cookie_is_relaxed() {
        let cookie = session_cookie(&dev_config(), "token-value").expect("cookie");
        let value = cookie.to_str().expect("ascii");
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(!value.contains("Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(&prod_config()).expect("cookie");
        let value = cookie.to_str().expect("ascii");
        assert!(value.starts_with("session_id=; "));
        assert!(value.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn authenticate_session_without_cookie_is_none() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool");
        let record = authenticate_session(&HeaderMap::new(), &pool, &prod_config())
            .await
            .expect("no error");
        assert!(record.is_none());
    }
}
