//! Database helpers for users, sessions, and notification enqueueing.

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::principal::Role;
use super::state::AuthConfig;
use super::tokens::{issue_token, TokenPurpose};
use super::utils::{
    build_reset_url, build_verify_url, generate_token, hash_token, is_unique_violation,
};

/// Outcome when attempting to create a new user + verification record.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created,
    Conflict,
}

pub(crate) struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) email: String,
    pub(crate) password_hash: String,
    pub(crate) email_verified: bool,
    pub(crate) totp_secret: Option<String>,
    pub(crate) totp_secret_pending: Option<String>,
}

/// Minimal data returned for a valid session cookie.
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) role: Role,
    pub(crate) email_verified: bool,
    pub(crate) mfa_enabled: bool,
}

fn user_from_row(row: &PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
        totp_secret: row.get("totp_secret"),
        totp_secret_pending: row.get("totp_secret_pending"),
    }
}

const USER_COLUMNS: &str = r"
    id, email, password_hash,
    email_verified_at IS NOT NULL AS email_verified,
    totp_secret, totp_secret_pending
";

pub(super) async fn lookup_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;
    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn lookup_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;
    Ok(row.as_ref().map(user_from_row))
}

/// Create the user, its verification token, and the email outbox row in one
/// transaction so a half-created account can never exist.
pub(super) async fn insert_user_and_verification(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    config: &AuthConfig,
) -> Result<SignupOutcome> {
    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let query = r"
        INSERT INTO users (email, password_hash)
        VALUES ($1, $2)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(SignupOutcome::Conflict);
            }
            return Err(err).context("failed to insert user");
        }
    };

    let _token = insert_verification_records(&mut tx, user_id, email, config).await?;

    tx.commit().await.context("commit signup transaction")?;

    Ok(SignupOutcome::Created)
}

/// Issue a `verify` token and enqueue the verification email.
pub(super) async fn insert_verification_records(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    email: &str,
    config: &AuthConfig,
) -> Result<String> {
    let token = issue_token(
        tx,
        user_id,
        TokenPurpose::Verify,
        config.verify_token_ttl_seconds(),
    )
    .await?;

    let verify_url = build_verify_url(config.base_url(), &token);
    enqueue_email(
        tx,
        email,
        "verify_email",
        &json!({ "email": email, "verify_url": verify_url }),
    )
    .await?;

    Ok(token)
}

/// Issue a `reset` token and enqueue the reset email.
pub(super) async fn insert_reset_records(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    email: &str,
    config: &AuthConfig,
) -> Result<String> {
    let token = issue_token(
        tx,
        user_id,
        TokenPurpose::Reset,
        config.reset_token_ttl_seconds(),
    )
    .await?;

    let reset_url = build_reset_url(config.base_url(), &token);
    enqueue_email(
        tx,
        email,
        "reset_password",
        &json!({ "email": email, "reset_url": reset_url }),
    )
    .await?;

    Ok(token)
}

async fn enqueue_email(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    to_email: &str,
    template: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_text = serde_json::to_string(payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

pub(super) async fn mark_email_verified(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE users
        SET email_verified_at = COALESCE(email_verified_at, NOW()),
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;
    Ok(())
}

pub(super) async fn update_password_hash(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password hash")?;
    Ok(())
}

/// Stage a TOTP secret for enrollment. The pending column never gates login;
/// only [`activate_pending_totp_secret`] makes MFA effective.
pub(super) async fn set_pending_totp_secret(
    pool: &PgPool,
    user_id: Uuid,
    secret: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET totp_secret_pending = $2, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(secret)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to stage TOTP secret")?;
    Ok(())
}

/// Promote the pending TOTP secret to active. Returns false when there was
/// nothing staged.
pub(super) async fn activate_pending_totp_secret(pool: &PgPool, user_id: Uuid) -> Result<bool> {
    let query = r"
        UPDATE users
        SET totp_secret = totp_secret_pending,
            totp_secret_pending = NULL,
            updated_at = NOW()
        WHERE id = $1
          AND totp_secret_pending IS NOT NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to activate TOTP secret")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    // Generate a random token, store only its hash, and return the raw value
    // so the caller can set the session cookie.
    let query = r"
        INSERT INTO user_sessions (user_id, session_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(super) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    // Sessions are valid only until expiry; rows are read, never refreshed.
    let query = r"
        SELECT users.id, users.email, users.role,
               users.email_verified_at IS NOT NULL AS email_verified,
               users.totp_secret IS NOT NULL AS mfa_enabled
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let role_text: String = row.get("role");
    let role = Role::parse(&role_text).ok_or_else(|| anyhow!("unknown role: {role_text}"))?;

    Ok(Some(SessionRecord {
        user_id: row.get("id"),
        email: row.get("email"),
        role,
        email_verified: row.get("email_verified"),
        mfa_enabled: row.get("mfa_enabled"),
    }))
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

pub(crate) async fn update_user_role(pool: &PgPool, user_id: Uuid, role: Role) -> Result<bool> {
    let query = r"
        UPDATE users
        SET role = $2, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(role.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update user role")?;
    Ok(result.rows_affected() > 0)
}

/// Delete expired sessions and tokens. Resolution already ignores expired
/// rows; the sweep just keeps the tables from growing without bound.
pub(crate) async fn purge_expired(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM user_sessions WHERE expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let sessions = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to purge expired sessions")?;

    let query = "DELETE FROM auth_tokens WHERE expires_at <= NOW() OR consumed_at IS NOT NULL";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let tokens = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to purge expired tokens")?;

    Ok(sessions.rows_affected() + tokens.rows_affected())
}

/// Create or repair the seed admin: correct role, email pre-verified.
pub(crate) async fn ensure_seed_admin(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO users (email, password_hash, role, email_verified_at)
        VALUES ($1, $2, 'admin', NOW())
        ON CONFLICT (email) DO UPDATE
        SET role = 'admin',
            email_verified_at = COALESCE(users.email_verified_at, NOW()),
            updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to ensure seed admin")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{SessionRecord, SignupOutcome, UserRecord};
    use crate::api::handlers::auth::principal::Role;
    use uuid::Uuid;

    #[test]
    fn signup_outcome_debug_names() {
        assert_eq!(format!("{:?}", SignupOutcome::Created), "Created");
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn user_record_holds_values() {
        let record = UserRecord {
            id: Uuid::nil(),
            email: "a@b.com".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            email_verified: false,
            totp_secret: None,
            totp_secret_pending: Some("SECRET".to_string()),
        };
        assert_eq!(record.id, Uuid::nil());
        assert!(!record.email_verified);
        assert!(record.totp_secret.is_none());
        assert_eq!(record.totp_secret_pending.as_deref(), Some("SECRET"));
    }

    #[test]
    fn session_record_holds_values() {
        let record = SessionRecord {
            user_id: Uuid::nil(),
            email: "a@b.com".to_string(),
            role: Role::Instructor,
            email_verified: true,
            mfa_enabled: false,
        };
        assert_eq!(record.role, Role::Instructor);
        assert!(record.email_verified);
        assert!(!record.mfa_enabled);
    }
}
