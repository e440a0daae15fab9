//! Auth handlers and supporting modules.
//!
//! This module coordinates credentials, sessions, single-use tokens, and the
//! TOTP step-up flow. Raw session and token values are only ever returned to
//! the client; the database holds SHA-256 digests, so a leaked table cannot
//! be replayed against the API.

pub mod login;
pub mod mfa;
pub mod password;
pub mod principal;
pub mod rate_limit;
pub mod reset;
pub mod session;
pub mod signup;
pub mod state;
pub mod storage;
pub mod tokens;
pub mod types;
pub mod utils;
pub mod verification;

pub use principal::{Principal, Role};
pub use rate_limit::{FixedWindowRateLimiter, NoopRateLimiter, RateLimiter};
pub use state::{AuthConfig, AuthState, CookieSettings};
