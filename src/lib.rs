//! Credential and session authority.
//!
//! `tessera` owns account registration, login with timestamp-gated lockout,
//! email verification and password reset via hashed one-time tokens, signed
//! bearer tokens, a session ledger, and a non-blocking audit trail. It is a
//! library core: persistence, email delivery, and auditing are capability
//! traits, and no transport is assumed.

pub mod auth;
pub mod email;
pub mod store;

pub use auth::audit::{AuditAction, AuditSink, LogAuditSink};
pub use auth::error::AuthError;
pub use auth::policy::SecuritySettings;
pub use auth::token::{BearerClaims, InvalidTokenReason, TokenCodec, TokenVerification};
pub use auth::types::{
    Account, LoginRequest, LoginSuccess, NewRegistration, PublicAccount, Role, Session,
};
pub use auth::AuthService;
pub use email::{LogMailer, Mailer};
pub use store::{AuthStore, MemoryStore, PgAuthStore};
