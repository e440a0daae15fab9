//! Request-level error taxonomy.
//!
//! Core logic returns these variants instead of raising transport responses;
//! only the `IntoResponse` impl at the axum boundary decides status codes and
//! body shapes. Credential and token failures share deliberately generic
//! wording so callers cannot tell which check failed.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthorized,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email not verified")]
    EmailNotVerified,
    #[error("MFA TOTP required")]
    MfaRequired,
    #[error("Weak password")]
    WeakPassword,
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("CSRF check failed")]
    CsrfCheckFailed,
    #[error("Not found")]
    NotFound,
    #[error("Forbidden")]
    Forbidden,
    #[error("Rate limited")]
    RateLimited,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::InvalidCredentials | Self::MfaRequired => {
                StatusCode::UNAUTHORIZED
            }
            Self::EmailNotVerified | Self::CsrfCheckFailed | Self::Forbidden => {
                StatusCode::FORBIDDEN
            }
            Self::WeakPassword
            | Self::DuplicateEmail
            | Self::InvalidOrExpiredToken
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            Self::Internal(err) => {
                // Log the cause, return nothing about it to the caller.
                error!("internal error: {err:?}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn status_classification() {
        assert_eq!(ApiError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::MfaRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::EmailNotVerified.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::CsrfCheckFailed.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::WeakPassword.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::DuplicateEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::InvalidOrExpiredToken.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::Internal(anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn token_failures_share_generic_wording() {
        // One message for absent, expired, wrong purpose, and replayed tokens.
        assert_eq!(
            ApiError::InvalidOrExpiredToken.to_string(),
            "Invalid or expired token"
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let response = ApiError::Internal(anyhow!("dsn=postgres://secret")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
