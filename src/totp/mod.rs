//! Time-based one-time passwords for the MFA step-up flow.
//!
//! Codes are standard RFC 6238: SHA-1, 6 digits, 30 second steps, and a
//! one-step skew window in both directions to absorb clock drift between the
//! server and the authenticator app. A wider window would stretch the replay
//! surface, none at all locks out phones that are a few seconds off.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Generate a new random TOTP secret, base32-encoded for authenticator apps.
pub fn create_secret() -> Result<String> {
    match Secret::generate_secret().to_encoded() {
        Secret::Encoded(value) => Ok(value),
        Secret::Raw(_) => Err(anyhow!("failed to encode TOTP secret")),
    }
}

/// TOTP code generation and verification bound to an issuer label.
#[derive(Clone, Debug)]
pub struct TotpEngine {
    issuer: String,
}

impl TotpEngine {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    fn totp(&self, secret_base32: &str, account: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("invalid TOTP secret: {e}"))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    /// Build the otpauth:// URI embedded in enrollment QR codes.
    ///
    /// # Errors
    /// Returns an error if the secret does not decode as base32.
    pub fn provisioning_uri(&self, secret_base32: &str, account: &str) -> Result<String> {
        Ok(self.totp(secret_base32, account)?.get_url())
    }

    /// Render the provisioning URI as a PNG data URL for inline QR display.
    ///
    /// # Errors
    /// Returns an error if the secret is invalid or QR rendering fails.
    pub fn qr_data_url(&self, secret_base32: &str, account: &str) -> Result<String> {
        let qr = self
            .totp(secret_base32, account)?
            .get_qr_base64()
            .map_err(|e| anyhow!("QR gen error: {e}"))?;
        Ok(format!("data:image/png;base64,{qr}"))
    }

    /// Check a code against the current time step, accepting one step of skew.
    #[must_use]
    pub fn verify(&self, secret_base32: &str, code: &str) -> bool {
        let Ok(totp) = self.totp(secret_base32, "account") else {
            return false;
        };
        totp.check_current(code).unwrap_or(false)
    }

    /// Check a code at an explicit unix timestamp. Used by tests so the skew
    /// window can be exercised without touching the wall clock.
    #[must_use]
    pub fn verify_at(&self, secret_base32: &str, code: &str, time: u64) -> bool {
        let Ok(totp) = self.totp(secret_base32, "account") else {
            return false;
        };
        totp.check(code, time)
    }

    /// Generate the expected code for an explicit timestamp. Test helper.
    ///
    /// # Errors
    /// Returns an error if the secret does not decode as base32.
    pub fn generate_at(&self, secret_base32: &str, time: u64) -> Result<String> {
        Ok(self.totp(secret_base32, "account")?.generate(time))
    }
}
