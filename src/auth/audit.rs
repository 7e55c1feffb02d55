//! Append-only audit trail for security-relevant events.
//!
//! The sink is a capability injected into the orchestrator. Its failures are
//! caught at the call site and logged, never propagated: a broken audit
//! pipeline must not take logins or registrations down with it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Enumerated action tags as written to the audit trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    Register,
    LoginSuccess,
    LoginFailed,
    Logout,
    EmailVerified,
    PasswordResetRequested,
    PasswordReset,
    PasswordChanged,
    StatusChanged,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "REGISTER",
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::Logout => "LOGOUT",
            Self::EmailVerified => "EMAIL_VERIFIED",
            Self::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::PasswordChanged => "PASSWORD_CHANGED",
            Self::StatusChanged => "STATUS_CHANGED",
        }
    }
}

/// One security-relevant fact to append. `account_id` is `None` for failures
/// where no account could be resolved (e.g. unknown username at login).
#[derive(Clone, Debug)]
pub struct NewAuditEvent {
    pub account_id: Option<Uuid>,
    pub action: AuditAction,
    pub success: bool,
    pub detail: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// A persisted audit record. Never mutated or deleted by this crate.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub account_id: Option<Uuid>,
    pub action: AuditAction,
    pub success: bool,
    pub detail: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit persistence capability.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one event. Errors are reported to the caller, which swallows
    /// and logs them.
    async fn append(&self, event: NewAuditEvent) -> Result<()>;
}

/// Local dev sink that logs events instead of persisting them.
#[derive(Clone, Copy, Debug)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn append(&self, event: NewAuditEvent) -> Result<()> {
        info!(
            account_id = ?event.account_id,
            action = event.action.as_str(),
            success = event.success,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_tags_match_wire_names() {
        assert_eq!(AuditAction::Register.as_str(), "REGISTER");
        assert_eq!(AuditAction::LoginFailed.as_str(), "LOGIN_FAILED");
        assert_eq!(
            AuditAction::PasswordResetRequested.as_str(),
            "PASSWORD_RESET_REQUESTED"
        );
        assert_eq!(AuditAction::StatusChanged.as_str(), "STATUS_CHANGED");
    }

    #[tokio::test]
    async fn log_sink_accepts_events() -> anyhow::Result<()> {
        let sink = LogAuditSink;
        sink.append(NewAuditEvent {
            account_id: None,
            action: AuditAction::LoginFailed,
            success: false,
            detail: Some("account not found".to_string()),
            ip: None,
            user_agent: None,
        })
        .await
    }
}
