//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct BasicOk {
    pub ok: bool,
}

impl BasicOk {
    #[must_use]
    pub fn new() -> Self {
        Self { ok: true }
    }
}

impl Default for BasicOk {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CsrfResponse {
    pub csrf: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Required when the account has MFA enrolled.
    #[serde(default)]
    pub totp: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailQuery {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaEnrollResponse {
    /// Base32 secret for manual authenticator entry.
    pub secret: String,
    /// otpauth:// URI for QR provisioning.
    pub otpauth: String,
    /// PNG data URL rendering of the otpauth URI.
    pub qr: String,
    /// Single-use token the client must echo back to confirm enrollment.
    pub mfa_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaVerifyRequest {
    pub mfa_token: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub email_verified: bool,
    pub mfa_enabled: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RoleUpdateRequest {
    pub role: String,
}
