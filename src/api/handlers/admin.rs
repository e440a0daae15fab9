//! Administrative user management.

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::principal::{require_auth, Role};
use super::auth::state::AuthState;
use super::auth::storage::update_user_role;
use super::auth::types::{BasicOk, RoleUpdateRequest};
use crate::api::error::ApiError;

/// Change a user's role. Admin only.
#[utoipa::path(
    post,
    path = "/api/admin/users/{id}/role",
    request_body = RoleUpdateRequest,
    params(
        ("id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "Role updated", body = BasicOk),
        (status = 400, description = "Unknown role"),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "No such user")
    ),
    tag = "admin"
)]
pub async fn set_user_role(
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RoleUpdateRequest>>,
) -> Result<Json<BasicOk>, ApiError> {
    let principal = require_auth(&headers, &pool, auth_state.config()).await?;
    principal.require_role(Role::Admin)?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload"));
    };
    let Some(role) = Role::parse(&request.role) else {
        return Err(ApiError::BadRequest("Unknown role"));
    };

    if update_user_role(&pool, user_id, role).await? {
        Ok(Json(BasicOk::new()))
    } else {
        Err(ApiError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::super::auth::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::super::auth::state::AuthConfig;
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn set_user_role_requires_session() {
        let config = AuthConfig::new(
            "https://api.klaso.dev".to_string(),
            "https://app.klaso.dev".to_string(),
            false,
        );
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        let state = Arc::new(AuthState::new(config, limiter).expect("state"));
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool");

        let result = set_user_role(
            HeaderMap::new(),
            Path(Uuid::nil()),
            Extension(pool),
            Extension(state),
            Some(Json(RoleUpdateRequest {
                role: "instructor".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
