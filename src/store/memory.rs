//! In-process store used by tests and local development.
//!
//! A single async mutex guards all state, which makes every store method
//! (one-time-token claims and failed-login increments included) atomic from
//! the orchestrator's point of view, mirroring the transactional guarantees
//! of the Postgres store.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::audit::{AuditEvent, AuditSink, NewAuditEvent};
use crate::auth::types::{Account, Session};

use super::{AuthStore, NewAccount, NewSession};

#[derive(Default)]
struct Inner {
    accounts: Vec<Account>,
    sessions: Vec<Session>,
    audit: Vec<AuditEvent>,
    settings: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the settings map (defaults apply for missing keys).
    #[must_use]
    pub fn with_settings(settings: HashMap<String, String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                settings,
                ..Inner::default()
            }),
        }
    }

    /// Snapshot of the audit trail, oldest first.
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.inner.lock().await.audit.clone()
    }

    /// Snapshot of the account records, in insertion order.
    pub async fn accounts(&self) -> Vec<Account> {
        self.inner.lock().await.accounts.clone()
    }

    /// Snapshot of the session ledger.
    pub async fn sessions(&self) -> Vec<Session> {
        self.inner.lock().await.sessions.clone()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn find_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .iter()
            .find(|account| account.username == username)
            .cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .iter()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_account_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .iter()
            .find(|account| account.username == username || account.email == email)
            .cloned())
    }

    async fn find_account_by_verification_token(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .iter()
            .find(|account| {
                !account.email_verified
                    && account.verification_token_hash.as_deref() == Some(token_hash)
            })
            .cloned())
    }

    async fn find_account_by_reset_token(&self, token_hash: &[u8]) -> Result<Option<Account>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .iter()
            .find(|account| account.reset_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn insert_account(&self, account: NewAccount) -> Result<Option<Account>> {
        let mut inner = self.inner.lock().await;
        let duplicate = inner
            .accounts
            .iter()
            .any(|existing| existing.username == account.username || existing.email == account.email);
        if duplicate {
            return Ok(None);
        }

        let record = Account {
            id: Uuid::new_v4(),
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            role: account.role,
            is_active: false,
            email_verified: false,
            verification_token_hash: Some(account.verification_token_hash),
            verification_expires: Some(account.verification_expires),
            reset_token_hash: None,
            reset_expires: None,
            failed_logins: 0,
            locked_until: None,
            last_login: None,
            created_at: Utc::now(),
        };
        inner.accounts.push(record.clone());
        Ok(Some(record))
    }

    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.iter_mut().find(|account| account.id == id) {
            account.failed_logins = 0;
            account.locked_until = None;
            account.last_login = Some(now);
        }
        Ok(())
    }

    async fn register_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        locked_until: DateTime<Utc>,
    ) -> Result<i32> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.iter_mut().find(|account| account.id == id) else {
            return Ok(0);
        };
        account.failed_logins = account.failed_logins.saturating_add(1);
        if account.failed_logins >= max_attempts {
            account.locked_until = Some(locked_until);
        }
        Ok(account.failed_logins)
    }

    async fn reset_lockout(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.iter_mut().find(|account| account.id == id) {
            account.failed_logins = 0;
            account.locked_until = None;
        }
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.iter_mut().find(|account| account.id == id) {
            account.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn set_verification_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.iter_mut().find(|account| account.id == id) {
            account.verification_token_hash = Some(token_hash.to_vec());
            account.verification_expires = Some(expires_at);
        }
        Ok(())
    }

    async fn claim_verification_token(&self, token_hash: &[u8]) -> Result<Option<Account>> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.iter_mut().find(|account| {
            !account.email_verified
                && account.verification_token_hash.as_deref() == Some(token_hash)
        }) else {
            return Ok(None);
        };
        account.verification_token_hash = None;
        account.verification_expires = None;
        Ok(Some(account.clone()))
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.iter_mut().find(|account| account.id == id) {
            account.email_verified = true;
            account.is_active = true;
        }
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.iter_mut().find(|account| account.id == id) {
            account.reset_token_hash = Some(token_hash.to_vec());
            account.reset_expires = Some(expires_at);
        }
        Ok(())
    }

    async fn claim_reset_token(&self, token_hash: &[u8]) -> Result<Option<Account>> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner
            .accounts
            .iter_mut()
            .find(|account| account.reset_token_hash.as_deref() == Some(token_hash))
        else {
            return Ok(None);
        };
        account.reset_token_hash = None;
        account.reset_expires = None;
        Ok(Some(account.clone()))
    }

    async fn set_account_active(&self, id: Uuid, active: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.iter_mut().find(|account| account.id == id) {
            account.is_active = active;
        }
        Ok(())
    }

    async fn create_session(&self, session: NewSession) -> Result<Session> {
        let mut inner = self.inner.lock().await;
        let record = Session {
            id: Uuid::new_v4(),
            account_id: session.account_id,
            token_hash: session.token_hash,
            ip: session.ip,
            user_agent: session.user_agent,
            expires_at: session.expires_at,
            created_at: Utc::now(),
        };
        inner.sessions.push(record.clone());
        Ok(record)
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .sessions
            .retain(|session| session.token_hash != token_hash);
        Ok(())
    }

    async fn load_security_settings(&self) -> Result<HashMap<String, String>> {
        let inner = self.inner.lock().await;
        Ok(inner.settings.clone())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, event: NewAuditEvent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.audit.push(AuditEvent {
            account_id: event.account_id,
            action: event.action,
            success: event.success,
            detail: event.detail,
            ip: event.ip,
            user_agent: event.user_agent,
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::Role;
    use anyhow::Result;
    use chrono::Duration;

    fn new_account(username: &str, email: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$x".to_string(),
            role: Role::User,
            verification_token_hash: vec![1; 32],
            verification_expires: Utc::now() + Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_username_or_email() -> Result<()> {
        let store = MemoryStore::new();
        assert!(store
            .insert_account(new_account("alice", "alice@example.com"))
            .await?
            .is_some());
        assert!(store
            .insert_account(new_account("alice", "other@example.com"))
            .await?
            .is_none());
        assert!(store
            .insert_account(new_account("other", "alice@example.com"))
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_login_increments_and_trips_at_threshold() -> Result<()> {
        let store = MemoryStore::new();
        let account = store
            .insert_account(new_account("alice", "alice@example.com"))
            .await?
            .expect("inserted");
        let until = Utc::now() + Duration::minutes(30);

        assert_eq!(store.register_failed_login(account.id, 3, until).await?, 1);
        assert_eq!(store.register_failed_login(account.id, 3, until).await?, 2);
        assert_eq!(store.accounts().await[0].locked_until, None);

        assert_eq!(store.register_failed_login(account.id, 3, until).await?, 3);
        assert_eq!(store.accounts().await[0].locked_until, Some(until));

        store.reset_lockout(account.id).await?;
        let account = &store.accounts().await[0];
        assert_eq!(account.failed_logins, 0);
        assert_eq!(account.locked_until, None);
        Ok(())
    }

    #[tokio::test]
    async fn claim_is_single_use() -> Result<()> {
        let store = MemoryStore::new();
        store
            .insert_account(new_account("alice", "alice@example.com"))
            .await?;
        assert!(store.claim_verification_token(&[1; 32]).await?.is_some());
        assert!(store.claim_verification_token(&[1; 32]).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn verified_accounts_do_not_match_verification_lookups() -> Result<()> {
        let store = MemoryStore::new();
        let account = store
            .insert_account(new_account("alice", "alice@example.com"))
            .await?
            .expect("inserted");
        store.mark_email_verified(account.id).await?;
        assert!(store
            .find_account_by_verification_token(&[1; 32])
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn delete_session_is_idempotent() -> Result<()> {
        let store = MemoryStore::new();
        let account = store
            .insert_account(new_account("alice", "alice@example.com"))
            .await?
            .expect("inserted");
        store
            .create_session(NewSession {
                account_id: account.id,
                token_hash: vec![9; 32],
                ip: None,
                user_agent: None,
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await?;
        store.delete_session(&[9; 32]).await?;
        store.delete_session(&[9; 32]).await?;
        assert!(store.sessions().await.is_empty());
        Ok(())
    }
}
