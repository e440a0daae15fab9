//! Email verification endpoints: JSON API and the HTML landing page.

use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    response::Html,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::mark_email_verified;
use super::tokens::{consume_token, TokenPurpose};
use super::types::{BasicOk, VerifyEmailQuery, VerifyEmailRequest};
use super::utils::extract_client_ip;
use crate::api::error::ApiError;

const VERIFIED_PAGE: &str = r#"<html>
  <head><title>Email verified</title></head>
  <body style="font-family: system-ui; text-align:center; margin-top:4rem;">
    <h1>Email verified</h1>
    <p>You can now return to Klaso and log in.</p>
  </body>
</html>
"#;

async fn verify_email_token(
    token: &str,
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<(), ApiError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::BadRequest("Missing token"));
    }

    // Rate limits are enforced before any token work to avoid amplification.
    let client_ip = extract_client_ip(headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::RateLimited);
    }

    // Replayed, expired, and unknown tokens all fail the same way.
    let Some(user_id) = consume_token(pool, token, TokenPurpose::Verify).await? else {
        return Err(ApiError::InvalidOrExpiredToken);
    };

    mark_email_verified(pool, user_id).await?;
    Ok(())
}

/// Verify the emailed token and activate the account.
#[utoipa::path(
    post,
    path = "/api/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = BasicOk),
        (status = 400, description = "Invalid or expired token"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> Result<Json<BasicOk>, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload"));
    };
    verify_email_token(&request.token, &headers, &pool, &auth_state).await?;
    Ok(Json(BasicOk::new()))
}

/// Human-facing form of the verification link from the email.
#[utoipa::path(
    get,
    path = "/api/auth/verify-email",
    params(
        ("token" = String, Query, description = "Verification token from the emailed link")
    ),
    responses(
        (status = 200, description = "Email verified, HTML landing page"),
        (status = 400, description = "Invalid or expired token")
    ),
    tag = "auth"
)]
pub async fn verify_email_page(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    query: Query<VerifyEmailQuery>,
) -> Result<Html<&'static str>, ApiError> {
    verify_email_token(&query.token, &headers, &pool, &auth_state).await?;
    Ok(Html(VERIFIED_PAGE))
}
