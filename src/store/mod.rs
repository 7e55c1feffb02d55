//! Persistence contract consumed, not owned, by the auth orchestrator.
//!
//! The orchestrator only ever talks to `AuthStore` (and the companion
//! `AuditSink` capability); the Postgres implementation lives in
//! [`postgres`], and [`memory`] provides an in-process store for tests and
//! local development. Methods take explicit values computed by the caller;
//! the store applies state, it does not decide policy.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::types::{Account, Role, Session};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgAuthStore;

/// Insert payload for a new account. The verification token is part of the
/// insert so an account never exists without a pending verification.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub verification_token_hash: Vec<u8>,
    pub verification_expires: DateTime<Utc>,
}

/// Insert payload for a session-ledger row.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub account_id: Uuid,
    pub token_hash: Vec<u8>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Combined lookup used by registration duplicate checks and login,
    /// where one identifier may be either a username or an email.
    async fn find_account_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<Account>>;

    /// Match a pending (unverified) verification-token hash.
    async fn find_account_by_verification_token(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<Account>>;

    async fn find_account_by_reset_token(&self, token_hash: &[u8]) -> Result<Option<Account>>;

    /// Insert a new account. Returns `None` when the username or email is
    /// already taken (unique-violation race past the pre-check).
    async fn insert_account(&self, account: NewAccount) -> Result<Option<Account>>;

    /// Successful login in one write: counter to zero, lockout cleared,
    /// last-login stamped.
    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Apply one failed login atomically: increment the counter and, when
    /// the post-increment value reaches `max_attempts`, start a lockout
    /// window ending at `locked_until`. Read, increment and write form one
    /// store operation so concurrent failures cannot lose counts. Returns
    /// the counter after the increment.
    async fn register_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        locked_until: DateTime<Utc>,
    ) -> Result<i32>;

    /// Clear the failed-attempt counter and lockout window.
    async fn reset_lockout(&self, id: Uuid) -> Result<()>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()>;

    /// Store (or rotate) a pending verification token.
    async fn set_verification_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Atomically consume a pending verification token: clears the stored
    /// hash and expiry in one step and returns the account, or `None` when
    /// the token was already consumed (e.g. by a concurrent request).
    async fn claim_verification_token(&self, token_hash: &[u8]) -> Result<Option<Account>>;

    /// Mark the email verified and activate the account.
    async fn mark_email_verified(&self, id: Uuid) -> Result<()>;

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Atomically consume a reset token; same contract as
    /// [`claim_verification_token`](AuthStore::claim_verification_token).
    async fn claim_reset_token(&self, token_hash: &[u8]) -> Result<Option<Account>>;

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<()>;

    async fn create_session(&self, session: NewSession) -> Result<Session>;

    /// Idempotent: deleting an unknown token is not an error.
    async fn delete_session(&self, token_hash: &[u8]) -> Result<()>;

    /// Current policy values as a key/value map; parsed fresh per operation.
    async fn load_security_settings(&self) -> Result<HashMap<String, String>>;
}
