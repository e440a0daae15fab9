//! Password reset: request a link, then confirm with the emailed token.

use axum::{extract::Extension, http::HeaderMap, Json};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::password::{hash_password_blocking, password_policy_ok};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{insert_reset_records, lookup_user_by_email, update_password_hash};
use super::tokens::{consume_token, TokenPurpose};
use super::types::{BasicOk, ResetConfirmRequest, ResetRequest};
use super::utils::{extract_client_ip, normalize_email, valid_email};
use crate::api::error::ApiError;

/// Request a reset link.
///
/// Always answers with the same generic success, whether or not the address
/// maps to an account. Anything else would let a caller enumerate users.
#[utoipa::path(
    post,
    path = "/api/auth/reset",
    request_body = ResetRequest,
    responses(
        (status = 200, description = "Reset accepted", body = BasicOk)
    ),
    tag = "auth"
)]
pub async fn reset_request(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetRequest>>,
) -> Result<Json<BasicOk>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload"));
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Invalid shapes still get the opaque success.
        return Ok(Json(BasicOk::new()));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResetRequest)
        == RateLimitDecision::Limited
    {
        return Ok(Json(BasicOk::new()));
    }
    if auth_state
        .rate_limiter()
        .check_email(&email, RateLimitAction::ResetRequest)
        == RateLimitDecision::Limited
    {
        return Ok(Json(BasicOk::new()));
    }

    match issue_reset(&pool, &email, &auth_state).await {
        Ok(()) => {}
        Err(err) => {
            // Keep the response opaque even when the enqueue fails.
            error!("Failed to issue reset token: {err}");
        }
    }

    Ok(Json(BasicOk::new()))
}

async fn issue_reset(pool: &PgPool, email: &str, auth_state: &AuthState) -> anyhow::Result<()> {
    let Some(user) = lookup_user_by_email(pool, email).await? else {
        return Ok(());
    };

    let mut tx = pool.begin().await?;
    let _token = insert_reset_records(&mut tx, user.id, email, auth_state.config()).await?;
    tx.commit().await?;
    Ok(())
}

/// Redeem a reset token and set the new password.
#[utoipa::path(
    post,
    path = "/api/auth/reset/confirm",
    request_body = ResetConfirmRequest,
    responses(
        (status = 200, description = "Password updated", body = BasicOk),
        (status = 400, description = "Weak password or invalid/expired token")
    ),
    tag = "auth"
)]
pub async fn reset_confirm(
    pool: Extension<PgPool>,
    payload: Option<Json<ResetConfirmRequest>>,
) -> Result<Json<BasicOk>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload"));
    };

    // The policy holds here exactly as at signup.
    if !password_policy_ok(&request.new_password) {
        return Err(ApiError::WeakPassword);
    }

    let Some(user_id) = consume_token(&pool, request.token.trim(), TokenPurpose::Reset).await?
    else {
        return Err(ApiError::InvalidOrExpiredToken);
    };

    let password_hash = hash_password_blocking(request.new_password).await?;
    update_password_hash(&pool, user_id, &password_hash).await?;

    Ok(Json(BasicOk::new()))
}
