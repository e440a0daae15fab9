//! Account signup.

use axum::{extract::Extension, http::HeaderMap, Json};
use sqlx::PgPool;
use std::sync::Arc;

use super::password::{hash_password_blocking, password_policy_ok};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{insert_user_and_verification, SignupOutcome};
use super::types::{BasicOk, SignupRequest};
use super::utils::{extract_client_ip, normalize_email, valid_email};
use crate::api::error::ApiError;

/// Create an unverified account and queue the verification email.
///
/// The response is the same whether or not the verification email could be
/// queued for delivery; mail trouble is an operations problem, not a signal
/// to hand to callers.
#[utoipa::path(
    post,
    path = "/api/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Account created, verification email queued", body = BasicOk),
        (status = 400, description = "Weak password, invalid email, or duplicate email"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<Json<BasicOk>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload"));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email"));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Signup)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }
    if auth_state
        .rate_limiter()
        .check_email(&email, RateLimitAction::Signup)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }

    // Policy is enforced before any expensive hashing.
    if !password_policy_ok(&request.password) {
        return Err(ApiError::WeakPassword);
    }

    let password_hash = hash_password_blocking(request.password).await?;

    match insert_user_and_verification(&pool, &email, &password_hash, auth_state.config()).await? {
        SignupOutcome::Created => Ok(Json(BasicOk::new())),
        SignupOutcome::Conflict => Err(ApiError::DuplicateEmail),
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::super::state::{AuthConfig, AuthState};
    use super::*;
    use axum::http::HeaderMap;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        let config = AuthConfig::new(
            "https://api.klaso.dev".to_string(),
            "https://app.klaso.dev".to_string(),
            false,
        );
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        Arc::new(AuthState::new(config, limiter).expect("state"))
    }

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn signup_missing_payload() {
        let result = signup(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            None,
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn signup_invalid_email() {
        let result = signup(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            Some(Json(SignupRequest {
                email: "not-an-email".to_string(),
                password: "Str0ng!Pass".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn signup_weak_password() {
        let result = signup(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            Some(Json(SignupRequest {
                email: "a@b.com".to_string(),
                password: "abc".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(ApiError::WeakPassword)));
    }
}
