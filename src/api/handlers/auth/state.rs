//! Auth configuration and shared request state.
//!
//! Everything here is resolved once at startup and injected through an
//! `Extension<Arc<AuthState>>`. Core logic never reads ambient process state.

use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;

use super::password::hash_password;
use super::rate_limit::RateLimiter;
use crate::totp::TotpEngine;

const DEFAULT_SESSION_TTL_MINUTES: i64 = 120;
const DEFAULT_VERIFY_TOKEN_TTL_MINUTES: i64 = 60;
const DEFAULT_RESET_TOKEN_TTL_MINUTES: i64 = 30;
const DEFAULT_MFA_TOKEN_TTL_MINUTES: i64 = 10;
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 120;
const DEFAULT_SESSION_COOKIE_NAME: &str = "session_id";
const DEFAULT_CSRF_COOKIE_NAME: &str = "csrf_token";
const TOTP_ISSUER: &str = "Klaso";

/// Cookie attributes for the current environment, decided once at startup.
///
/// Production cookies are cross-site (`SameSite=None`) and therefore must be
/// `Secure`; development mode keeps plain-HTTP logins working with
/// `SameSite=Lax` and no `Secure` flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CookieSettings {
    secure: bool,
    same_site: &'static str,
}

impl CookieSettings {
    #[must_use]
    pub fn production() -> Self {
        Self {
            secure: true,
            same_site: "None",
        }
    }

    #[must_use]
    pub fn development() -> Self {
        Self {
            secure: false,
            same_site: "Lax",
        }
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub fn same_site(&self) -> &'static str {
        self.same_site
    }

    /// Attribute suffix appended to every cookie this service sets.
    #[must_use]
    pub fn suffix(&self) -> String {
        let mut suffix = format!("; SameSite={}", self.same_site);
        if self.secure {
            suffix.push_str("; Secure");
        }
        suffix
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    frontend_origin: String,
    dev_mode: bool,
    cookie: CookieSettings,
    session_cookie_name: String,
    csrf_cookie_name: String,
    session_ttl_minutes: i64,
    verify_token_ttl_minutes: i64,
    reset_token_ttl_minutes: i64,
    mfa_token_ttl_minutes: i64,
    rate_limit_per_minute: u32,
    admin_email: Option<String>,
    admin_password: Option<SecretString>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String, frontend_origin: String, dev_mode: bool) -> Self {
        let cookie = if dev_mode {
            CookieSettings::development()
        } else {
            CookieSettings::production()
        };
        Self {
            base_url,
            frontend_origin,
            dev_mode,
            cookie,
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            csrf_cookie_name: DEFAULT_CSRF_COOKIE_NAME.to_string(),
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            verify_token_ttl_minutes: DEFAULT_VERIFY_TOKEN_TTL_MINUTES,
            reset_token_ttl_minutes: DEFAULT_RESET_TOKEN_TTL_MINUTES,
            mfa_token_ttl_minutes: DEFAULT_MFA_TOKEN_TTL_MINUTES,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            admin_email: None,
            admin_password: None,
        }
    }

    #[must_use]
    pub fn with_session_ttl_minutes(mut self, minutes: i64) -> Self {
        self.session_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_verify_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.verify_token_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.reset_token_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_mfa_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.mfa_token_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = limit;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: String) -> Self {
        self.session_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_csrf_cookie_name(mut self, name: String) -> Self {
        self.csrf_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_admin_seed(mut self, email: String, password: SecretString) -> Self {
        self.admin_email = Some(email);
        self.admin_password = Some(password);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn frontend_origin(&self) -> &str {
        &self.frontend_origin
    }

    #[must_use]
    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    #[must_use]
    pub fn cookie(&self) -> &CookieSettings {
        &self.cookie
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    #[must_use]
    pub fn csrf_cookie_name(&self) -> &str {
        &self.csrf_cookie_name
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_minutes * 60
    }

    #[must_use]
    pub fn verify_token_ttl_seconds(&self) -> i64 {
        self.verify_token_ttl_minutes * 60
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_minutes * 60
    }

    #[must_use]
    pub fn mfa_token_ttl_seconds(&self) -> i64 {
        self.mfa_token_ttl_minutes * 60
    }

    #[must_use]
    pub fn rate_limit_per_minute(&self) -> u32 {
        self.rate_limit_per_minute
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &'static str {
        TOTP_ISSUER
    }

    pub(crate) fn admin_seed(&self) -> Option<(&str, &SecretString)> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password)),
            _ => None,
        }
    }
}

pub struct AuthState {
    config: AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
    totp: TotpEngine,
    // Verified against when login hits an unknown email, so the response
    // time matches the wrong-password path.
    dummy_hash: String,
}

impl AuthState {
    /// # Errors
    /// Returns an error if the timing-equalization hash cannot be computed.
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>) -> Result<Self> {
        let dummy_hash = hash_password("klaso-credential-padding")?;
        let totp = TotpEngine::new(config.totp_issuer());
        Ok(Self {
            config,
            rate_limiter,
            totp,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn totp(&self) -> &TotpEngine {
        &self.totp
    }

    pub(crate) fn dummy_hash(&self) -> &str {
        &self.dummy_hash
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::*;

    #[test]
    fn cookie_settings_per_environment() {
        let prod = CookieSettings::production();
        assert!(prod.secure());
        assert_eq!(prod.same_site(), "None");
        assert_eq!(prod.suffix(), "; SameSite=None; Secure");

        let dev = CookieSettings::development();
        assert!(!dev.secure());
        assert_eq!(dev.same_site(), "Lax");
        assert_eq!(dev.suffix(), "; SameSite=Lax");
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new(
            "https://api.klaso.dev".to_string(),
            "https://app.klaso.dev".to_string(),
            false,
        );

        assert_eq!(config.base_url(), "https://api.klaso.dev");
        assert_eq!(config.frontend_origin(), "https://app.klaso.dev");
        assert!(!config.dev_mode());
        assert_eq!(config.session_cookie_name(), "session_id");
        assert_eq!(config.csrf_cookie_name(), "csrf_token");
        assert_eq!(config.session_ttl_seconds(), 120 * 60);
        assert_eq!(config.verify_token_ttl_seconds(), 60 * 60);
        assert_eq!(config.reset_token_ttl_seconds(), 30 * 60);
        assert_eq!(config.mfa_token_ttl_seconds(), 10 * 60);
        assert_eq!(config.rate_limit_per_minute(), 120);
        assert!(config.cookie().secure());
        assert!(config.admin_seed().is_none());

        let config = config
            .with_session_ttl_minutes(5)
            .with_verify_token_ttl_minutes(1)
            .with_reset_token_ttl_minutes(2)
            .with_mfa_token_ttl_minutes(3)
            .with_rate_limit_per_minute(10)
            .with_session_cookie_name("sid".to_string())
            .with_csrf_cookie_name("csrf".to_string());

        assert_eq!(config.session_ttl_seconds(), 300);
        assert_eq!(config.verify_token_ttl_seconds(), 60);
        assert_eq!(config.reset_token_ttl_seconds(), 120);
        assert_eq!(config.mfa_token_ttl_seconds(), 180);
        assert_eq!(config.rate_limit_per_minute(), 10);
        assert_eq!(config.session_cookie_name(), "sid");
        assert_eq!(config.csrf_cookie_name(), "csrf");
    }

    #[test]
    fn dev_mode_relaxes_cookies() {
        let config = AuthConfig::new(
            "http://127.0.0.1:8080".to_string(),
            "http://localhost:5173".to_string(),
            true,
        );
        assert!(config.dev_mode());
        assert!(!config.cookie().secure());
        assert_eq!(config.cookie().same_site(), "Lax");
    }

    #[test]
    fn auth_state_holds_dummy_hash() {
        let config = AuthConfig::new(
            "https://api.klaso.dev".to_string(),
            "https://app.klaso.dev".to_string(),
            false,
        );
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        let state = AuthState::new(config, limiter).expect("state");
        assert!(state.dummy_hash().starts_with("$argon2id$"));
        assert_eq!(state.config().totp_issuer(), "Klaso");
    }
}
