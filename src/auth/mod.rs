//! Auth orchestrator: coordinated credential and session operations.
//!
//! Every operation fetches a fresh policy snapshot from the store, so
//! security settings can change at runtime without a restart. Every
//! operation also emits an audit event regardless of outcome; audit
//! failures are swallowed at the call site and only logged.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tracing::{error, warn};
use uuid::Uuid;

pub mod audit;
pub mod error;
pub mod hasher;
pub mod lockout;
pub mod policy;
pub mod token;
pub mod types;

use crate::email::Mailer;
use crate::store::{AuthStore, NewAccount, NewSession};

use audit::{AuditAction, AuditSink, NewAuditEvent};
use error::AuthError;
use hasher::{hash_password, verify_password};
use policy::{normalize_email, valid_email, validate_password, SecuritySettings};
use token::{
    generate_one_time_token, hash_one_time_token, hash_session_token, BearerClaims, TokenCodec,
    TokenVerification,
};
use types::{LoginRequest, LoginSuccess, NewRegistration, PublicAccount, Role};

const VERIFICATION_TOKEN_TTL_HOURS: i64 = 24;
const RESET_TOKEN_TTL_HOURS: i64 = 1;

/// Top-level credential and session authority.
///
/// Transport-agnostic: operations take plain values and return typed
/// results; mapping to HTTP (or anything else) is the embedder's concern.
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    audit: Arc<dyn AuditSink>,
    mailer: Arc<dyn Mailer>,
    codec: TokenCodec,
}

impl AuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn AuthStore>,
        audit: Arc<dyn AuditSink>,
        mailer: Arc<dyn Mailer>,
        codec: TokenCodec,
    ) -> Self {
        Self {
            store,
            audit,
            mailer,
            codec,
        }
    }

    /// Create a new account with a pending email verification.
    ///
    /// The account row is committed before the verification email is sent;
    /// a delivery failure surfaces as an internal error, but the account
    /// stands. Callers treat registration as "account created, notification
    /// best-effort".
    ///
    /// # Errors
    ///
    /// `Validation` for missing fields, a malformed email, or policy
    /// violations (all accumulated); `DuplicateIdentity` when the username
    /// or email is taken.
    pub async fn register(&self, request: NewRegistration) -> Result<PublicAccount, AuthError> {
        let username = request.username.trim();
        let email = normalize_email(&request.email);
        if username.is_empty() || email.is_empty() || request.password.is_empty() {
            return Err(AuthError::Validation(vec![
                "username, email and password are required".to_string(),
            ]));
        }
        if !valid_email(&email) {
            return Err(AuthError::Validation(vec![
                "email address is malformed".to_string(),
            ]));
        }

        let settings = self.settings().await?;
        if self
            .store
            .find_account_by_username_or_email(username, &email)
            .await
            .context("failed to check for existing account")?
            .is_some()
        {
            return Err(AuthError::DuplicateIdentity);
        }

        let violations = validate_password(&request.password, &settings);
        if !violations.is_empty() {
            return Err(AuthError::Validation(violations));
        }

        let password_hash = hash_password(&request.password)?;
        let token = generate_one_time_token()?;
        let new_account = NewAccount {
            username: username.to_string(),
            email: email.clone(),
            password_hash,
            role: Role::User,
            verification_token_hash: hash_one_time_token(&token),
            verification_expires: Utc::now() + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS),
        };
        let Some(account) = self
            .store
            .insert_account(new_account)
            .await
            .context("failed to insert account")?
        else {
            // Lost a race past the pre-check; same outcome for the caller.
            return Err(AuthError::DuplicateIdentity);
        };

        self.record(
            Some(account.id),
            AuditAction::Register,
            true,
            None,
            None,
            None,
        )
        .await;

        let public = PublicAccount::from(&account);
        self.mailer
            .send_verification_email(&public, &token)
            .await
            .context("failed to send verification email")?;
        Ok(public)
    }

    /// Authenticate and open a session.
    ///
    /// The `username` field accepts a username or an email address. Unknown
    /// accounts and wrong passwords both come back as `InvalidCredentials`;
    /// the audit trail records the distinction, the caller never sees it.
    ///
    /// # Errors
    ///
    /// `AccountInactive` for deactivated or not-yet-verified accounts,
    /// `AccountLocked` while a lockout window is open (no password
    /// comparison happens in that case), `InvalidCredentials` otherwise.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginSuccess, AuthError> {
        let identifier = request.username.trim();
        if identifier.is_empty() || request.password.is_empty() {
            return Err(AuthError::Validation(vec![
                "username and password are required".to_string(),
            ]));
        }

        let settings = self.settings().await?;
        let ip = request.ip.as_deref();
        let agent = request.user_agent.as_deref();

        let lookup_email = normalize_email(identifier);
        let Some(mut account) = self
            .store
            .find_account_by_username_or_email(identifier, &lookup_email)
            .await
            .context("failed to look up account")?
        else {
            self.record(
                None,
                AuditAction::LoginFailed,
                false,
                Some("account not found"),
                ip,
                agent,
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        };

        if !account.is_active {
            self.record(
                Some(account.id),
                AuditAction::LoginFailed,
                false,
                Some("account deactivated"),
                ip,
                agent,
            )
            .await;
            return Err(AuthError::AccountInactive);
        }

        let now = Utc::now();
        if lockout::is_locked(account.locked_until, now) {
            // Short-circuit: the password hash is never consulted for a
            // locked account.
            self.record(
                Some(account.id),
                AuditAction::LoginFailed,
                false,
                Some("account locked"),
                ip,
                agent,
            )
            .await;
            return Err(AuthError::AccountLocked);
        }

        if !verify_password(&request.password, &account.password_hash)? {
            let penalty = lockout::failure_penalty(&settings, now);
            self.store
                .register_failed_login(account.id, penalty.max_attempts, penalty.locked_until)
                .await
                .context("failed to register failed login")?;
            self.record(
                Some(account.id),
                AuditAction::LoginFailed,
                false,
                Some("password mismatch"),
                ip,
                agent,
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        }

        self.store
            .record_login_success(account.id, now)
            .await
            .context("failed to record login success")?;
        account.failed_logins = 0;
        account.locked_until = None;
        account.last_login = Some(now);

        let token = self.codec.issue(&account, settings.session_ttl())?;
        self.store
            .create_session(NewSession {
                account_id: account.id,
                token_hash: hash_session_token(&token),
                ip: request.ip.clone(),
                user_agent: request.user_agent.clone(),
                expires_at: now + settings.session_ttl(),
            })
            .await
            .context("failed to create session")?;

        self.record(
            Some(account.id),
            AuditAction::LoginSuccess,
            true,
            None,
            ip,
            agent,
        )
        .await;

        Ok(LoginSuccess {
            token,
            account: PublicAccount::from(&account),
        })
    }

    /// Revoke the session for a presented bearer token.
    ///
    /// Always succeeds from the caller's perspective: unknown tokens are a
    /// no-op and store failures are logged, not surfaced.
    pub async fn logout(&self, token: &str) {
        if let Err(err) = self.store.delete_session(&hash_session_token(token)).await {
            error!("failed to delete session on logout: {err}");
            return;
        }
        let account_id = match self.codec.verify(token) {
            TokenVerification::Valid(claims) => Some(claims.sub),
            TokenVerification::Invalid(_) => None,
        };
        self.record(account_id, AuditAction::Logout, true, None, None, None)
            .await;
    }

    /// Consume a verification token, mark the email verified, and activate
    /// the account.
    ///
    /// # Errors
    ///
    /// `InvalidOrUsedToken` when no pending token matches (including a token
    /// that was already consumed), `TokenExpired` when the match's expiry has
    /// passed (the stored token is left in place and stays unusable).
    pub async fn verify_email(&self, token: &str) -> Result<PublicAccount, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidOrUsedToken);
        }
        let token_hash = hash_one_time_token(token);

        let Some(account) = self
            .store
            .find_account_by_verification_token(&token_hash)
            .await
            .context("failed to look up verification token")?
        else {
            self.record(
                None,
                AuditAction::EmailVerified,
                false,
                Some("invalid or used token"),
                None,
                None,
            )
            .await;
            return Err(AuthError::InvalidOrUsedToken);
        };

        if token_expired(account.verification_expires) {
            self.record(
                Some(account.id),
                AuditAction::EmailVerified,
                false,
                Some("token expired"),
                None,
                None,
            )
            .await;
            return Err(AuthError::TokenExpired);
        }

        // The claim clears the stored hash atomically; a concurrent request
        // presenting the same token loses here.
        if self
            .store
            .claim_verification_token(&token_hash)
            .await
            .context("failed to claim verification token")?
            .is_none()
        {
            return Err(AuthError::InvalidOrUsedToken);
        }
        self.store
            .mark_email_verified(account.id)
            .await
            .context("failed to mark email verified")?;

        self.record(
            Some(account.id),
            AuditAction::EmailVerified,
            true,
            None,
            None,
            None,
        )
        .await;

        let mut account = account;
        account.email_verified = true;
        account.is_active = true;
        account.verification_token_hash = None;
        account.verification_expires = None;
        Ok(PublicAccount::from(&account))
    }

    /// Start a password reset for the given email.
    ///
    /// The success shape is identical whether or not the account exists, so
    /// the response can never be used to probe for registered addresses.
    /// Email delivery failures are logged without changing the outcome.
    ///
    /// # Errors
    ///
    /// Only `Internal`, for store failures.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(account) = self
            .store
            .find_account_by_email(&email)
            .await
            .context("failed to look up account by email")?
        else {
            return Ok(());
        };

        let token = generate_one_time_token()?;
        self.store
            .set_reset_token(
                account.id,
                &hash_one_time_token(&token),
                Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS),
            )
            .await
            .context("failed to store reset token")?;

        if let Err(err) = self
            .mailer
            .send_password_reset_email(&PublicAccount::from(&account), &token)
            .await
        {
            error!("failed to send password reset email: {err}");
        }

        self.record(
            Some(account.id),
            AuditAction::PasswordResetRequested,
            true,
            None,
            None,
            None,
        )
        .await;
        Ok(())
    }

    /// Complete a password reset with a previously issued token.
    ///
    /// A successful reset is treated as proof of ownership: it clears any
    /// standing lockout along with the failed-attempt counter. A stale or
    /// invalid token never mutates the account.
    ///
    /// # Errors
    ///
    /// `InvalidOrUsedToken`, `TokenExpired`, or `Validation` with every
    /// policy violation of the new password.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidOrUsedToken);
        }

        let settings = self.settings().await?;
        let token_hash = hash_one_time_token(token);
        let Some(account) = self
            .store
            .find_account_by_reset_token(&token_hash)
            .await
            .context("failed to look up reset token")?
        else {
            self.record(
                None,
                AuditAction::PasswordReset,
                false,
                Some("invalid or used token"),
                None,
                None,
            )
            .await;
            return Err(AuthError::InvalidOrUsedToken);
        };

        if token_expired(account.reset_expires) {
            self.record(
                Some(account.id),
                AuditAction::PasswordReset,
                false,
                Some("token expired"),
                None,
                None,
            )
            .await;
            return Err(AuthError::TokenExpired);
        }

        // Validate before claiming so a rejected password leaves the token
        // usable for another attempt.
        let violations = validate_password(new_password, &settings);
        if !violations.is_empty() {
            return Err(AuthError::Validation(violations));
        }

        if self
            .store
            .claim_reset_token(&token_hash)
            .await
            .context("failed to claim reset token")?
            .is_none()
        {
            return Err(AuthError::InvalidOrUsedToken);
        }

        let password_hash = hash_password(new_password)?;
        self.store
            .update_password(account.id, &password_hash)
            .await
            .context("failed to update password hash")?;
        self.store
            .reset_lockout(account.id)
            .await
            .context("failed to clear lockout state")?;

        self.record(
            Some(account.id),
            AuditAction::PasswordReset,
            true,
            None,
            None,
            None,
        )
        .await;
        Ok(())
    }

    /// Change the password of an authenticated account.
    ///
    /// Lockout state is untouched: an already-authenticated change is
    /// orthogonal to failed-login tracking.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` when the current password does not match,
    /// `Validation` for new-password policy violations.
    pub async fn change_password(
        &self,
        claims: &BearerClaims,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if current_password.is_empty() || new_password.is_empty() {
            return Err(AuthError::Validation(vec![
                "current and new password are required".to_string(),
            ]));
        }

        let settings = self.settings().await?;
        let Some(account) = self
            .store
            .find_account_by_username(&claims.username)
            .await
            .context("failed to look up account")?
        else {
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password(current_password, &account.password_hash)? {
            self.record(
                Some(account.id),
                AuditAction::PasswordChanged,
                false,
                Some("current password mismatch"),
                None,
                None,
            )
            .await;
            return Err(AuthError::InvalidCredentials);
        }

        let violations = validate_password(new_password, &settings);
        if !violations.is_empty() {
            return Err(AuthError::Validation(violations));
        }

        let password_hash = hash_password(new_password)?;
        self.store
            .update_password(account.id, &password_hash)
            .await
            .context("failed to update password hash")?;

        self.record(
            Some(account.id),
            AuditAction::PasswordChanged,
            true,
            None,
            None,
            None,
        )
        .await;
        Ok(())
    }

    /// Rotate and resend the verification token for an authenticated,
    /// not-yet-verified account.
    ///
    /// # Errors
    ///
    /// `Validation` when the email is already verified,
    /// `InvalidCredentials` when the claims no longer match an account.
    pub async fn resend_verification(&self, claims: &BearerClaims) -> Result<(), AuthError> {
        let Some(account) = self
            .store
            .find_account_by_username(&claims.username)
            .await
            .context("failed to look up account")?
        else {
            return Err(AuthError::InvalidCredentials);
        };
        if account.email_verified {
            return Err(AuthError::Validation(vec![
                "email address is already verified".to_string(),
            ]));
        }

        let token = generate_one_time_token()?;
        self.store
            .set_verification_token(
                account.id,
                &hash_one_time_token(&token),
                Utc::now() + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS),
            )
            .await
            .context("failed to rotate verification token")?;

        self.mailer
            .send_verification_email(&PublicAccount::from(&account), &token)
            .await
            .context("failed to send verification email")?;
        Ok(())
    }

    /// Activate or deactivate an account. Requires an admin bearer.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-admin claims.
    pub async fn set_account_active(
        &self,
        claims: &BearerClaims,
        account_id: Uuid,
        active: bool,
    ) -> Result<(), AuthError> {
        if claims.role != Role::Admin {
            return Err(AuthError::Forbidden);
        }
        self.store
            .set_account_active(account_id, active)
            .await
            .context("failed to update account status")?;
        self.record(
            Some(account_id),
            AuditAction::StatusChanged,
            true,
            Some(if active { "activated" } else { "deactivated" }),
            None,
            None,
        )
        .await;
        Ok(())
    }

    /// Verify a presented bearer token. Pure and synchronous; failure is a
    /// value to branch on, never an error.
    #[must_use]
    pub fn verify_bearer_token(&self, token: &str) -> TokenVerification {
        self.codec.verify(token)
    }

    async fn settings(&self) -> Result<SecuritySettings, AuthError> {
        let map = self
            .store
            .load_security_settings()
            .await
            .context("failed to load security settings")?;
        Ok(SecuritySettings::from_map(&map))
    }

    /// Append an audit event, absorbing sink failures: audit must never take
    /// the primary operation down.
    async fn record(
        &self,
        account_id: Option<Uuid>,
        action: AuditAction,
        success: bool,
        detail: Option<&str>,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) {
        let event = NewAuditEvent {
            account_id,
            action,
            success,
            detail: detail.map(str::to_string),
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
        };
        if let Err(err) = self.audit.append(event).await {
            warn!(action = action.as_str(), "failed to append audit event: {err}");
        }
    }
}

fn token_expired(expires_at: Option<chrono::DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|expires| expires <= Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::LogMailer;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use secrecy::SecretString;

    fn service() -> (Arc<MemoryStore>, AuthService) {
        let store = Arc::new(MemoryStore::new());
        let service = AuthService::new(
            store.clone(),
            store.clone(),
            Arc::new(LogMailer),
            TokenCodec::new(SecretString::from("unit-test-secret".to_string())),
        );
        (store, service)
    }

    fn registration(username: &str, email: &str) -> NewRegistration {
        NewRegistration {
            username: username.to_string(),
            email: email.to_string(),
            password: "Str0ng!Pass".to_string(),
        }
    }

    #[tokio::test]
    async fn register_rejects_missing_fields() {
        let (_, service) = service();
        let result = service
            .register(NewRegistration {
                username: String::new(),
                email: "a@example.com".to_string(),
                password: "Str0ng!Pass".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn register_rejects_malformed_email() {
        let (_, service) = service();
        let result = service.register(registration("alice", "not-an-email")).await;
        assert!(matches!(result, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn register_normalizes_email_and_reports_duplicates() -> Result<()> {
        let (_, service) = service();
        let account = service
            .register(registration("alice", " Alice@Example.COM "))
            .await?;
        assert_eq!(account.email, "alice@example.com");

        let result = service
            .register(registration("other", "ALICE@example.com"))
            .await;
        assert!(matches!(result, Err(AuthError::DuplicateIdentity)));
        Ok(())
    }

    #[tokio::test]
    async fn register_accumulates_policy_violations() {
        let (_, service) = service();
        let result = service
            .register(NewRegistration {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "short".to_string(),
            })
            .await;
        match result {
            Err(AuthError::Validation(errors)) => assert!(errors.len() > 1),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unverified_account_cannot_log_in() -> Result<()> {
        let (_, service) = service();
        service
            .register(registration("alice", "alice@example.com"))
            .await?;
        let result = service
            .login(LoginRequest {
                username: "alice".to_string(),
                password: "Str0ng!Pass".to_string(),
                ip: None,
                user_agent: None,
            })
            .await;
        assert!(matches!(result, Err(AuthError::AccountInactive)));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_account_yields_invalid_credentials_and_audit() -> Result<()> {
        let (store, service) = service();
        let result = service
            .login(LoginRequest {
                username: "ghost".to_string(),
                password: "whatever".to_string(),
                ip: Some("10.0.0.1".to_string()),
                user_agent: None,
            })
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));

        let events = store.audit_events().await;
        let event = events.last().expect("audit event recorded");
        assert_eq!(event.action, AuditAction::LoginFailed);
        assert_eq!(event.account_id, None);
        assert_eq!(event.detail.as_deref(), Some("account not found"));
        assert_eq!(event.ip.as_deref(), Some("10.0.0.1"));
        Ok(())
    }
}
