//! Authenticated profile endpoint.

use axum::{extract::Extension, http::HeaderMap, Json};
use sqlx::PgPool;
use std::sync::Arc;

use super::auth::principal::require_auth;
use super::auth::state::AuthState;
use super::auth::types::MeResponse;
use crate::api::error::ApiError;

#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "me"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<MeResponse>, ApiError> {
    let principal = require_auth(&headers, &pool, auth_state.config()).await?;

    Ok(Json(MeResponse {
        user_id: principal.user_id.to_string(),
        email: principal.email,
        role: principal.role.as_str().to_string(),
        email_verified: principal.email_verified,
        mfa_enabled: principal.mfa_enabled,
    }))
}
