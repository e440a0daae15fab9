//! Authenticated principal extraction and the fixed role hierarchy.

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use super::session::authenticate_session;
use super::state::AuthConfig;
use crate::api::error::ApiError;

/// Fixed role ladder: student < instructor < admin.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Instructor => "instructor",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "student" => Some(Self::Student),
            "instructor" => Some(Self::Instructor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Student => 0,
            Self::Instructor => 1,
            Self::Admin => 2,
        }
    }

    #[must_use]
    pub fn at_least(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }
}

/// Authenticated user context derived from the session cookie.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub mfa_enabled: bool,
}

impl Principal {
    /// # Errors
    /// Returns `Forbidden` when the principal's role is below `required`.
    pub fn require_role(&self, required: Role) -> Result<(), ApiError> {
        if self.role.at_least(required) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

/// Resolve the session cookie into a principal, or fail with 401.
///
/// # Errors
/// `Unauthorized` when the cookie is missing, unknown, or expired.
pub async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    config: &AuthConfig,
) -> Result<Principal, ApiError> {
    match authenticate_session(headers, pool, config).await? {
        Some(record) => Ok(Principal {
            user_id: record.user_id,
            email: record.email,
            role: record.role,
            email_verified: record.email_verified,
            mfa_enabled: record.mfa_enabled,
        }),
        None => Err(ApiError::Unauthorized),
    }
}
