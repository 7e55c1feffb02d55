//! Typed failure classification for auth operations.

use thiserror::Error;

/// Outcome classification for every orchestrated operation.
///
/// Validation and credential variants are safe to translate into user-facing
/// messages. `Internal` renders as an opaque message; the underlying cause is
/// logged server-side and must never reach a client.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed or missing input, or a password-policy violation.
    /// Carries every violation at once, not just the first.
    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("username or email already in use")]
    DuplicateIdentity,
    /// Deliberately identical for unknown accounts and wrong passwords to
    /// prevent account enumeration.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is deactivated")]
    AccountInactive,
    #[error("account temporarily locked after repeated failed logins")]
    AccountLocked,
    #[error("token is invalid or has already been used")]
    InvalidOrUsedToken,
    #[error("token has expired")]
    TokenExpired,
    #[error("insufficient role")]
    Forbidden,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// True for failures the caller can correct; false for `Internal`.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::AuthError;
    use anyhow::anyhow;

    #[test]
    fn validation_joins_all_violations() {
        let err = AuthError::Validation(vec![
            "too short".to_string(),
            "missing digit".to_string(),
        ]);
        assert_eq!(err.to_string(), "too short, missing digit");
    }

    #[test]
    fn internal_message_is_opaque() {
        let err = AuthError::Internal(anyhow!("connection refused: db:5432"));
        assert_eq!(err.to_string(), "internal error");
        assert!(!err.is_user_error());
    }

    #[test]
    fn credential_errors_are_user_errors() {
        assert!(AuthError::InvalidCredentials.is_user_error());
        assert!(AuthError::AccountLocked.is_user_error());
        assert!(AuthError::TokenExpired.is_user_error());
    }
}
