//! Classroom management API: accounts, sessions, and MFA.
//!
//! The crate is organized around three layers:
//!
//! - [`cli`] parses arguments/environment and boots telemetry.
//! - [`api`] owns the HTTP surface: router, middleware, handlers, and the
//!   email outbox worker.
//! - [`totp`] implements time-based one-time password enrollment and
//!   verification for the MFA step-up flow.

pub mod api;
pub mod cli;
pub mod totp;
