//! Account and session records shared across the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role used for simple role comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(Self::User),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Full account record as held by the store.
///
/// One-time tokens are stored hashed; raw values only ever travel in the
/// email links sent to the account owner.
#[derive(Clone, Debug)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    pub verification_token_hash: Option<Vec<u8>>,
    pub verification_expires: Option<DateTime<Utc>>,
    pub reset_token_hash: Option<Vec<u8>>,
    pub reset_expires: Option<DateTime<Utc>>,
    pub failed_logins: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Caller-visible account fields. Never carries the password hash or any
/// one-time token material.
#[derive(Clone, Debug, Serialize)]
pub struct PublicAccount {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&Account> for PublicAccount {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            role: account.role,
            is_active: account.is_active,
            email_verified: account.email_verified,
            last_login: account.last_login,
        }
    }
}

/// A persisted login session. The store keeps a hash of the bearer token,
/// never the raw value.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: Uuid,
    pub account_id: Uuid,
    pub token_hash: Vec<u8>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for `AuthService::register`.
#[derive(Clone, Debug, Deserialize)]
pub struct NewRegistration {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Input for `AuthService::login`. The `username` field accepts either a
/// username or an email address.
#[derive(Clone, Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Successful login payload: the signed bearer token plus public fields.
#[derive(Clone, Debug, Serialize)]
pub struct LoginSuccess {
    pub token: String,
    pub account: PublicAccount,
}
