//! Rate limiting primitives for auth flows.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug)]
pub enum RateLimitAction {
    Signup,
    Login,
    VerifyEmail,
    ResetRequest,
    MfaVerify,
}

impl RateLimitAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Login => "login",
            Self::VerifyEmail => "verify_email",
            Self::ResetRequest => "reset_request",
            Self::MfaVerify => "mfa_verify",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// In-memory fixed-window limiter: a per-minute budget per key and action.
///
/// State is process-local by design; the budget bounds abuse per instance and
/// needs no coordination with the persistence layer.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    per_minute: u32,
    windows: Mutex<HashMap<String, (u64, u32)>>,
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn check_key(&self, key: String) -> RateLimitDecision {
        if self.per_minute == 0 {
            return RateLimitDecision::Limited;
        }
        let minute = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() / 60)
            .unwrap_or(0);

        let Ok(mut windows) = self.windows.lock() else {
            // A poisoned lock fails open; limiting is best-effort.
            return RateLimitDecision::Allowed;
        };
        // Drop stale windows so the map stays bounded by active keys.
        windows.retain(|_, (window, _)| *window == minute);

        let entry = windows.entry(key).or_insert((minute, 0));
        if entry.1 >= self.per_minute {
            return RateLimitDecision::Limited;
        }
        entry.1 += 1;
        RateLimitDecision::Allowed
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        // Without a client address there is nothing to key the window on.
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };
        self.check_key(format!("ip:{}:{}", action.as_str(), ip))
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check_key(format!("email:{}:{}", action.as_str(), email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Signup),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("user@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn fixed_window_limits_after_budget() {
        let limiter = FixedWindowRateLimiter::new(2);
        let ip = Some("1.2.3.4");
        assert_eq!(
            limiter.check_ip(ip, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(ip, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(ip, RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn fixed_window_keys_are_independent() {
        let limiter = FixedWindowRateLimiter::new(1);
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        // Different address, different action: both get their own budget.
        assert_eq!(
            limiter.check_ip(Some("5.6.7.8"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("user@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Signup),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn missing_ip_is_not_limited() {
        let limiter = FixedWindowRateLimiter::new(0);
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }
}
