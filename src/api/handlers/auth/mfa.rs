//! TOTP enrollment and verification.
//!
//! Enrollment stages the secret: it is written to a pending slot and only
//! promoted to active once the user proves possession with a correct code.
//! Login is never gated by a pending secret, so an abandoned enrollment
//! cannot lock anyone out.

use axum::{extract::Extension, http::HeaderMap, Json};
use sqlx::PgPool;
use std::sync::Arc;

use super::principal::require_auth;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{
    activate_pending_totp_secret, lookup_user_by_id, set_pending_totp_secret,
};
use super::tokens::{consume_token, issue_token, TokenPurpose};
use super::types::{BasicOk, MfaEnrollResponse, MfaVerifyRequest};
use super::utils::extract_client_ip;
use crate::api::error::ApiError;
use crate::totp::create_secret;

/// Begin TOTP enrollment for the authenticated user.
#[utoipa::path(
    post,
    path = "/api/auth/mfa/totp/enroll",
    responses(
        (status = 200, description = "Enrollment material", body = MfaEnrollResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "mfa"
)]
pub async fn enroll(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<MfaEnrollResponse>, ApiError> {
    let principal = require_auth(&headers, &pool, auth_state.config()).await?;

    let secret = create_secret()?;
    set_pending_totp_secret(&pool, principal.user_id, &secret).await?;

    let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;
    let mfa_token = issue_token(
        &mut tx,
        principal.user_id,
        TokenPurpose::Mfa,
        auth_state.config().mfa_token_ttl_seconds(),
    )
    .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    let otpauth = auth_state
        .totp()
        .provisioning_uri(&secret, &principal.email)?;
    let qr = auth_state.totp().qr_data_url(&secret, &principal.email)?;

    Ok(Json(MfaEnrollResponse {
        secret,
        otpauth,
        qr,
        mfa_token,
    }))
}

/// Confirm enrollment, or complete a step-up challenge, with a code.
#[utoipa::path(
    post,
    path = "/api/auth/mfa/totp/verify",
    request_body = MfaVerifyRequest,
    responses(
        (status = 200, description = "Code accepted", body = BasicOk),
        (status = 400, description = "Invalid token or code"),
        (status = 429, description = "Rate limited")
    ),
    tag = "mfa"
)]
pub async fn verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaVerifyRequest>>,
) -> Result<Json<BasicOk>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload"));
    };
    if request.mfa_token.trim().is_empty() {
        return Err(ApiError::BadRequest("MFA token required"));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::MfaVerify)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }

    // The token burns on first use whatever happens to the code check after.
    let Some(user_id) =
        consume_token(&pool, request.mfa_token.trim(), TokenPurpose::Mfa).await?
    else {
        return Err(ApiError::InvalidOrExpiredToken);
    };

    let Some(user) = lookup_user_by_id(&pool, user_id).await? else {
        return Err(ApiError::InvalidOrExpiredToken);
    };

    if let Some(pending) = user.totp_secret_pending.as_deref() {
        // Enrollment confirmation: prove possession, then activate.
        if !auth_state.totp().verify(pending, &request.code) {
            return Err(ApiError::BadRequest("Invalid code"));
        }
        if !activate_pending_totp_secret(&pool, user_id).await? {
            return Err(ApiError::InvalidOrExpiredToken);
        }
        return Ok(Json(BasicOk::new()));
    }

    // Step-up challenge against the active secret.
    let Some(active) = user.totp_secret.as_deref() else {
        return Err(ApiError::BadRequest("Invalid code"));
    };
    if !auth_state.totp().verify(active, &request.code) {
        return Err(ApiError::BadRequest("Invalid code"));
    }

    Ok(Json(BasicOk::new()))
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::super::state::{AuthConfig, AuthState};
    use super::*;
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
    async fn verify_missing_payload() {
        let result = verify(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            None,
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn verify_empty_token() {
        let result = verify(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            Some(Json(MfaVerifyRequest {
                mfa_token: "  ".to_string(),
                code: "123456".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn enroll_requires_session() {
        let result = enroll(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
