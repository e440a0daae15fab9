//! Single-use, purpose-scoped tokens backing the email verification,
//! password reset, and MFA confirmation flows.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{generate_token, hash_token};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TokenPurpose {
    Verify,
    Reset,
    Mfa,
}

impl TokenPurpose {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Reset => "reset",
            Self::Mfa => "mfa",
        }
    }
}

/// Issue a fresh token for the user and purpose, returning the raw value.
///
/// Outstanding unconsumed tokens of the same purpose are invalidated first,
/// so at most one redeemable token per user/purpose is ever in flight.
pub(crate) async fn issue_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    purpose: TokenPurpose,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        DELETE FROM auth_tokens
        WHERE user_id = $1
          AND purpose = $2
          AND consumed_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to invalidate outstanding tokens")?;

    // Only the digest is stored; the raw value goes into the email link or
    // enrollment response and is never recoverable server-side.
    let token = generate_token()?;
    let token_hash = hash_token(&token);

    let query = r"
        INSERT INTO auth_tokens (user_id, token_hash, purpose, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(purpose.as_str())
        .bind(ttl_seconds)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert token")?;

    Ok(token)
}

/// Redeem a token, returning the owning user on success.
///
/// The conditional UPDATE makes consumption atomic: when two requests race on
/// the same value, exactly one sees a row. Absent, expired, already-consumed,
/// and wrong-purpose tokens are indistinguishable to the caller.
pub(crate) async fn consume_token(
    pool: &PgPool,
    token: &str,
    purpose: TokenPurpose,
) -> Result<Option<Uuid>> {
    let token_hash = hash_token(token);

    let query = r"
        UPDATE auth_tokens
        SET consumed_at = NOW()
        WHERE token_hash = $1
          AND purpose = $2
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(purpose.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume token")?;

    Ok(row.map(|row| row.get("user_id")))
}

#[cfg(test)]
mod tests {
    use super::TokenPurpose;

    #[test]
    fn purpose_tags_are_distinct() {
        assert_eq!(TokenPurpose::Verify.as_str(), "verify");
        assert_eq!(TokenPurpose::Reset.as_str(), "reset");
        assert_eq!(TokenPurpose::Mfa.as_str(), "mfa");
    }
}
