//! Postgres-backed store.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE accounts (
//!     id                      UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     username                TEXT NOT NULL UNIQUE,
//!     email                   TEXT NOT NULL UNIQUE,
//!     password_hash           TEXT NOT NULL,
//!     role                    TEXT NOT NULL DEFAULT 'USER',
//!     is_active               BOOLEAN NOT NULL DEFAULT FALSE,
//!     email_verified          BOOLEAN NOT NULL DEFAULT FALSE,
//!     verification_token_hash BYTEA,
//!     verification_expires    TIMESTAMPTZ,
//!     reset_token_hash        BYTEA,
//!     reset_expires           TIMESTAMPTZ,
//!     failed_logins           INTEGER NOT NULL DEFAULT 0,
//!     locked_until            TIMESTAMPTZ,
//!     last_login              TIMESTAMPTZ,
//!     created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE sessions (
//!     id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     account_id UUID NOT NULL REFERENCES accounts (id),
//!     token_hash BYTEA NOT NULL UNIQUE,
//!     ip         TEXT,
//!     user_agent TEXT,
//!     expires_at TIMESTAMPTZ NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE audit_events (
//!     id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     account_id UUID,
//!     action     TEXT NOT NULL,
//!     success    BOOLEAN NOT NULL,
//!     detail     TEXT,
//!     ip         TEXT,
//!     user_agent TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE security_settings (
//!     setting_key   TEXT PRIMARY KEY,
//!     setting_value TEXT NOT NULL
//! );
//! ```
//!
//! One-time-token claims are single conditional `UPDATE ... RETURNING`
//! statements, so two concurrent presentations of the same token cannot both
//! succeed even across multiple service instances.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::audit::{AuditSink, NewAuditEvent};
use crate::auth::types::{Account, Role, Session};

use super::{AuthStore, NewAccount, NewSession};

const ACCOUNT_COLUMNS: &str = "id, username, email, password_hash, role, is_active, \
     email_verified, verification_token_hash, verification_expires, reset_token_hash, \
     reset_expires, failed_logins, locked_until, last_login, created_at";

pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_account(&self, query: String, bind: &str) -> Result<Option<Account>> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(bind)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up account")?;
        row.map(|row| account_from_row(&row)).transpose()
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let role: String = row.try_get("role")?;
    let role = Role::parse(&role).ok_or_else(|| anyhow!("unknown role in account row: {role}"))?;
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role,
        is_active: row.try_get("is_active")?,
        email_verified: row.try_get("email_verified")?,
        verification_token_hash: row.try_get("verification_token_hash")?,
        verification_expires: row.try_get("verification_expires")?,
        reset_token_hash: row.try_get("reset_token_hash")?,
        reset_expires: row.try_get("reset_expires")?,
        failed_logins: row.try_get("failed_logins")?,
        locked_until: row.try_get("locked_until")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1");
        self.find_account(query, username).await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        self.find_account(query, email).await
    }

    async fn find_account_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<Account>> {
        let query =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1 OR email = $2");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(username)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up account by username or email")?;
        row.map(|row| account_from_row(&row)).transpose()
    }

    async fn find_account_by_verification_token(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<Account>> {
        let query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE verification_token_hash = $1 AND email_verified = FALSE"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up account by verification token")?;
        row.map(|row| account_from_row(&row)).transpose()
    }

    async fn find_account_by_reset_token(&self, token_hash: &[u8]) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE reset_token_hash = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up account by reset token")?;
        row.map(|row| account_from_row(&row)).transpose()
    }

    async fn insert_account(&self, account: NewAccount) -> Result<Option<Account>> {
        let query = format!(
            "INSERT INTO accounts \
                 (username, email, password_hash, role, verification_token_hash, \
                  verification_expires) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(&account.username)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(account.role.as_str())
            .bind(&account.verification_token_hash)
            .bind(account.verification_expires)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(Some(account_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(err).context("failed to insert account"),
        }
    }

    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET failed_logins = 0, locked_until = NULL, last_login = $2
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login success")?;
        Ok(())
    }

    async fn register_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        locked_until: DateTime<Utc>,
    ) -> Result<i32> {
        // Increment and conditional lockout in one statement, so two racing
        // failures each advance the counter.
        let query = r"
            UPDATE accounts
            SET failed_logins = failed_logins + 1,
                locked_until = CASE
                    WHEN failed_logins + 1 >= $2 THEN $3
                    ELSE locked_until
                END
            WHERE id = $1
            RETURNING failed_logins
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .bind(max_attempts)
            .bind(locked_until)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to register failed login")?;
        Ok(row.try_get("failed_logins")?)
    }

    async fn reset_lockout(&self, id: Uuid) -> Result<()> {
        let query = "UPDATE accounts SET failed_logins = 0, locked_until = NULL WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear lockout state")?;
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let query = "UPDATE accounts SET password_hash = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update password hash")?;
        Ok(())
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET verification_token_hash = $2, verification_expires = $3
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set verification token")?;
        Ok(())
    }

    async fn claim_verification_token(&self, token_hash: &[u8]) -> Result<Option<Account>> {
        let query = format!(
            "UPDATE accounts \
             SET verification_token_hash = NULL, verification_expires = NULL \
             WHERE verification_token_hash = $1 AND email_verified = FALSE \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to claim verification token")?;
        row.map(|row| account_from_row(&row)).transpose()
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET email_verified = TRUE, is_active = TRUE
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to mark email verified")?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET reset_token_hash = $2, reset_expires = $3
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set reset token")?;
        Ok(())
    }

    async fn claim_reset_token(&self, token_hash: &[u8]) -> Result<Option<Account>> {
        let query = format!(
            "UPDATE accounts \
             SET reset_token_hash = NULL, reset_expires = NULL \
             WHERE reset_token_hash = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to claim reset token")?;
        row.map(|row| account_from_row(&row)).transpose()
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<()> {
        let query = "UPDATE accounts SET is_active = $2 WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update account status")?;
        Ok(())
    }

    async fn create_session(&self, session: NewSession) -> Result<Session> {
        let query = r"
            INSERT INTO sessions (account_id, token_hash, ip, user_agent, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, account_id, token_hash, ip, user_agent, expires_at, created_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session.account_id)
            .bind(&session.token_hash)
            .bind(&session.ip)
            .bind(&session.user_agent)
            .bind(session.expires_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to create session")?;
        Ok(Session {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            token_hash: row.try_get("token_hash")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        // Revocation is idempotent; it's fine if no rows are deleted.
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn load_security_settings(&self) -> Result<HashMap<String, String>> {
        let query = "SELECT setting_key, setting_value FROM security_settings";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load security settings")?;
        rows.into_iter()
            .map(|row| Ok((row.try_get("setting_key")?, row.try_get("setting_value")?)))
            .collect()
    }
}

#[async_trait]
impl AuditSink for PgAuthStore {
    async fn append(&self, event: NewAuditEvent) -> Result<()> {
        let query = r"
            INSERT INTO audit_events (account_id, action, success, detail, ip, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(event.account_id)
            .bind(event.action.as_str())
            .bind(event.success)
            .bind(&event.detail)
            .bind(&event.ip)
            .bind(&event.user_agent)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to append audit event")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
