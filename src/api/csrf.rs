//! CSRF double-submit guard.
//!
//! A third-party page can make the browser send our cookies but cannot read
//! them, so requiring a script-readable cookie echoed in a request header
//! stops cross-origin forgery. Safe methods bypass the check, and a fixed
//! allow-list exempts the bootstrap endpoints a client must reach before it
//! can hold a token.

use axum::{
    extract::{Extension, Request, State},
    http::{
        header::{InvalidHeaderValue, SET_COOKIE},
        HeaderMap, HeaderValue, Method,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::api::handlers::auth::state::{AuthConfig, AuthState};
use crate::api::handlers::auth::types::CsrfResponse;
use crate::api::handlers::auth::utils::{extract_cookie, generate_token};

pub(crate) const CSRF_HEADER: &str = "x-csrf-token";

// Endpoints reachable before the client holds a CSRF token. Matched by exact
// path or prefix, never by wildcard.
const EXACT_EXEMPT: &[&str] = &["/api/auth/csrf"];
const PREFIX_EXEMPT: &[&str] = &[
    "/api/auth/login",
    "/api/auth/signup",
    "/api/auth/verify-email",
    "/api/auth/reset",
    "/api/auth/logout",
];

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn is_exempt_path(path: &str) -> bool {
    EXACT_EXEMPT.contains(&path) || PREFIX_EXEMPT.iter().any(|prefix| path.starts_with(prefix))
}

fn tokens_match(cookie: &str, header: &str) -> bool {
    let cookie = cookie.as_bytes();
    let header = header.as_bytes();
    // Equal length is required for the constant-time comparison.
    if cookie.len() != header.len() {
        return false;
    }
    cookie.ct_eq(header).into()
}

/// Evaluate the double-submit check for one request.
///
/// # Errors
/// `CsrfCheckFailed` when cookie or header is missing or they differ. Every
/// failure mode collapses into the same generic condition.
pub(crate) fn check_request(
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    config: &AuthConfig,
) -> Result<(), ApiError> {
    if is_safe_method(method) || is_exempt_path(path) {
        return Ok(());
    }

    let cookie = extract_cookie(headers, config.csrf_cookie_name());
    let header = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match (cookie, header) {
        (Some(cookie), Some(header)) if tokens_match(&cookie, &header) => Ok(()),
        _ => Err(ApiError::CsrfCheckFailed),
    }
}

/// Middleware wrapping every route; rejects forged state-changing requests.
pub async fn protect(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let checked = check_request(
        request.method(),
        request.uri().path(),
        request.headers(),
        state.config(),
    );
    match checked {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

/// Script-readable CSRF cookie. Not `HttpOnly`: the client must read it back
/// into the request header.
pub(crate) fn csrf_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let name = config.csrf_cookie_name();
    let suffix = config.cookie().suffix();
    HeaderValue::from_str(&format!("{name}={token}; Path=/{suffix}"))
}

/// Mint a token and its cookie header.
pub(crate) fn issue_csrf(config: &AuthConfig) -> Result<(String, HeaderValue), ApiError> {
    let token = generate_token()?;
    let cookie = csrf_cookie(config, &token)
        .map_err(|err| ApiError::Internal(anyhow::anyhow!("invalid csrf cookie: {err}")))?;
    Ok((token, cookie))
}

/// Hand the client a CSRF token, both as a cookie and in the body.
#[utoipa::path(
    get,
    path = "/api/auth/csrf",
    responses(
        (status = 200, description = "Fresh CSRF token", body = CsrfResponse)
    ),
    tag = "auth"
)]
pub async fn get_csrf(
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let (token, cookie) = issue_csrf(auth_state.config())?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok((headers, Json(CsrfResponse { csrf: token })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://api.klaso.dev".to_string(),
            "https://app.klaso.dev".to_string(),
            false,
        )
    }

    fn headers_with(cookie: Option<&str>, header: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = cookie {
            headers.insert(
                axum::http::header::COOKIE,
                HeaderValue::from_str(&format!("csrf_token={value}")).expect("cookie"),
            );
        }
        if let Some(value) = header {
            headers.insert(CSRF_HEADER, HeaderValue::from_str(value).expect("header"));
        }
        headers
    }

    #[test]
    fn safe_methods_bypass() {
        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            let result = check_request(&method, "/api/classrooms", &HeaderMap::new(), &config());
            assert!(result.is_ok());
        }
    }

    #[test]
    fn post_without_cookie_fails() {
        let result = check_request(
            &Method::POST,
            "/api/classrooms",
            &headers_with(None, Some("anything")),
            &config(),
        );
        assert!(matches!(result, Err(ApiError::CsrfCheckFailed)));
    }

    #[test]
    fn post_without_header_fails() {
        let result = check_request(
            &Method::POST,
            "/api/classrooms",
            &headers_with(Some("token"), None),
            &config(),
        );
        assert!(matches!(result, Err(ApiError::CsrfCheckFailed)));
    }

    #[test]
    fn matching_pair_passes() {
        let result = check_request(
            &Method::POST,
            "/api/classrooms",
            &headers_with(Some("token-value"), Some("token-value")),
            &config(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn mismatched_pair_fails() {
        let result = check_request(
            &Method::POST,
            "/api/classrooms",
            &headers_with(Some("token-value"), Some("other-value")),
            &config(),
        );
        assert!(matches!(result, Err(ApiError::CsrfCheckFailed)));

        // Different lengths short-circuit before the constant-time compare.
        let result = check_request(
            &Method::POST,
            "/api/classrooms",
            &headers_with(Some("token-value"), Some("token")),
            &config(),
        );
        assert!(matches!(result, Err(ApiError::CsrfCheckFailed)));
    }

    #[test]
    fn bootstrap_endpoints_are_exempt() {
        for path in [
            "/api/auth/csrf",
            "/api/auth/login",
            "/api/auth/signup",
            "/api/auth/verify-email",
            "/api/auth/reset",
            "/api/auth/reset/confirm",
            "/api/auth/logout",
        ] {
            let result = check_request(&Method::POST, path, &HeaderMap::new(), &config());
            assert!(result.is_ok(), "expected exemption for {path}");
        }
    }

    #[test]
    fn non_exempt_paths_are_protected() {
        for path in ["/api/me", "/api/auth/mfa/totp/enroll", "/api/admin/users/x/role"] {
            let result = check_request(&Method::POST, path, &HeaderMap::new(), &config());
            assert!(
                matches!(result, Err(ApiError::CsrfCheckFailed)),
                "expected protection for {path}"
            );
        }
    }

    #[test]
    fn csrf_cookie_is_script_readable() {
        let cookie = csrf_cookie(&config(), "token-value").expect("cookie");
        let value = cookie.to_str().expect("ascii");
        assert!(value.starts_with("csrf_token=token-value; "));
        assert!(!value.contains("HttpOnly"));
        assert!(value.contains("SameSite=None"));
        assert!(value.contains("Secure"));
    }

    #[test]
    fn issue_csrf_returns_cookie_matching_token() {
        let (token, cookie) = issue_csrf(&config()).expect("issue");
        let value = cookie.to_str().expect("ascii");
        assert!(value.contains(&token));
    }
}
