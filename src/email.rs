//! Outbound email capability.
//!
//! Delivery is fire-and-report: implementations return an error to signal
//! failure, and each orchestrated operation decides whether that error is
//! surfaced (registration) or only logged (password-reset requests, where the
//! response shape must not change). No operation is rolled back because an
//! email failed.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::auth::types::PublicAccount;

/// Email delivery abstraction consumed by the orchestrator.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send the email-verification link carrying the raw one-time token.
    async fn send_verification_email(&self, account: &PublicAccount, token: &str) -> Result<()>;

    /// Send the password-reset link carrying the raw one-time token.
    async fn send_password_reset_email(&self, account: &PublicAccount, token: &str) -> Result<()>;
}

/// Local dev mailer that logs instead of sending real email.
#[derive(Clone, Copy, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification_email(&self, account: &PublicAccount, token: &str) -> Result<()> {
        info!(
            to_email = %account.email,
            token_len = token.len(),
            "verification email send stub"
        );
        Ok(())
    }

    async fn send_password_reset_email(&self, account: &PublicAccount, token: &str) -> Result<()> {
        info!(
            to_email = %account.email,
            token_len = token.len(),
            "password reset email send stub"
        );
        Ok(())
    }
}
