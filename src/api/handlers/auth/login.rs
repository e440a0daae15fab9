//! Login with optional TOTP step-up.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::password::verify_password_blocking;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::session_cookie;
use super::state::AuthState;
use super::storage::{insert_session, lookup_user_by_email};
use super::types::{BasicOk, LoginRequest};
use super::utils::{extract_client_ip, normalize_email};
use crate::api::csrf::issue_csrf;
use crate::api::error::ApiError;

/// Authenticate and establish a session.
///
/// Unknown email and wrong password produce the same response, and the
/// password check runs either way (against a dummy hash when the email is
/// unknown) so the two paths cost the same.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session established, cookies set", body = BasicOk),
        (status = 401, description = "Invalid credentials or missing/invalid MFA code"),
        (status = 403, description = "Email not verified"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload"));
    };

    let email = normalize_email(&request.email);
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }
    if auth_state
        .rate_limiter()
        .check_email(&email, RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }

    let user = lookup_user_by_email(&pool, &email).await?;

    let stored_hash = user
        .as_ref()
        .map_or_else(|| auth_state.dummy_hash().to_string(), |u| u.password_hash.clone());
    let password_ok = verify_password_blocking(request.password, stored_hash).await?;

    let Some(user) = user else {
        return Err(ApiError::InvalidCredentials);
    };
    if !password_ok {
        return Err(ApiError::InvalidCredentials);
    }

    if !user.email_verified {
        return Err(ApiError::EmailNotVerified);
    }

    // Only a confirmed secret gates login; a pending enrollment does not.
    if let Some(secret) = user.totp_secret.as_deref() {
        let code_ok = request
            .totp
            .as_deref()
            .is_some_and(|code| auth_state.totp().verify(secret, code));
        if !code_ok {
            return Err(ApiError::MfaRequired);
        }
    }

    let session_token =
        insert_session(&pool, user.id, auth_state.config().session_ttl_seconds()).await?;

    let mut response_headers = HeaderMap::new();
    let cookie = session_cookie(auth_state.config(), &session_token)
        .map_err(|err| ApiError::Internal(anyhow::anyhow!("invalid session cookie: {err}")))?;
    response_headers.append(SET_COOKIE, cookie);

    // A fresh browsing context gets a fresh CSRF token alongside the session.
    let (_csrf_token, csrf_cookie) = issue_csrf(auth_state.config())?;
    response_headers.append(SET_COOKIE, csrf_cookie);

    Ok((response_headers, Json(BasicOk::new())))
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{
        FixedWindowRateLimiter, NoopRateLimiter, RateLimiter,
    };
    use super::super::state::{AuthConfig, AuthState};
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state_with(limiter: Arc<dyn RateLimiter>) -> Arc<AuthState> {
        let config = AuthConfig::new(
            "https://api.klaso.dev".to_string(),
            "https://app.klaso.dev".to_string(),
            false,
        );
        Arc::new(AuthState::new(config, limiter).expect("state"))
    }

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn login_missing_payload() {
        let result = login(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state_with(Arc::new(NoopRateLimiter))),
            None,
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn login_rate_limited_by_email() {
        // Budget of zero limits the first keyed attempt.
        let state = auth_state_with(Arc::new(FixedWindowRateLimiter::new(0)));
        let result = login(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(state),
            Some(Json(LoginRequest {
                email: "a@b.com".to_string(),
                password: "Str0ng!Pass".to_string(),
                totp: None,
            })),
        )
        .await;
        assert!(matches!(result, Err(ApiError::RateLimited)));
    }
}
