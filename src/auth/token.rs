//! Bearer token codec and opaque one-time tokens.
//!
//! Bearer tokens are signed three-part compact tokens (HS256) carrying
//! exactly four identity claims plus issued-at/expiry. Verification is pure
//! and returns a variant to branch on; it never panics or errors for
//! malformed input. One-time tokens carry no claims at all: 32 bytes of
//! OS randomness whose validity is decided purely by a stored hash and its
//! paired expiry.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::types::{Account, Role};

/// Claims embedded in a signed bearer token.
///
/// Exactly these fields; raw account rows never reach the payload, so the
/// password hash and one-time tokens cannot leak into a client-visible,
/// signed document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BearerClaims {
    /// Account id.
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Why a bearer token failed verification. Callers must not surface the
/// distinction verbatim to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidTokenReason {
    Expired,
    Invalid,
}

/// Result of bearer-token verification; failure is a value, not an error.
#[derive(Clone, Debug)]
pub enum TokenVerification {
    Valid(BearerClaims),
    Invalid(InvalidTokenReason),
}

impl TokenVerification {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    #[must_use]
    pub fn claims(&self) -> Option<&BearerClaims> {
        match self {
            Self::Valid(claims) => Some(claims),
            Self::Invalid(_) => None,
        }
    }
}

/// Signs and verifies bearer tokens with a shared secret.
pub struct TokenCodec {
    secret: SecretString,
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Issue a signed bearer token for the account, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Fails only when signing itself fails; surfaced as an internal error.
    pub fn issue(&self, account: &Account, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = BearerClaims {
            sub: account.id,
            username: account.username.clone(),
            email: account.email.clone(),
            role: account.role,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .context("failed to sign bearer token")
    }

    /// Verify a bearer token. Signature mismatch, malformed input, and expiry
    /// all come back as `Invalid`; callers branch on the variant.
    #[must_use]
    pub fn verify(&self, token: &str) -> TokenVerification {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        match decode::<BearerClaims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        ) {
            Ok(data) => TokenVerification::Valid(data.claims),
            Err(err) => match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    TokenVerification::Invalid(InvalidTokenReason::Expired)
                }
                _ => TokenVerification::Invalid(InvalidTokenReason::Invalid),
            },
        }
    }
}

/// Generate an opaque one-time token for verification/reset links.
///
/// The raw value is only sent to the account owner; the store keeps a hash.
pub fn generate_one_time_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate one-time token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a one-time token so raw values never touch the database.
#[must_use]
pub fn hash_one_time_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Hash a bearer token into the session-ledger reference.
#[must_use]
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::Utc;

    fn account() -> Account {
        Account {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$irrelevant".to_string(),
            role: Role::Admin,
            is_active: true,
            email_verified: true,
            verification_token_hash: None,
            verification_expires: None,
            reset_token_hash: None,
            reset_expires: None,
            failed_logins: 0,
            locked_until: None,
            last_login: None,
            created_at: Utc::now(),
        }
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(SecretString::from("test-signing-secret".to_string()))
    }

    #[test]
    fn issue_then_verify_round_trips_claims() -> Result<()> {
        let account = account();
        let token = codec().issue(&account, Duration::hours(1))?;
        // Compact three-part format: header.payload.signature
        assert_eq!(token.split('.').count(), 3);

        match codec().verify(&token) {
            TokenVerification::Valid(claims) => {
                assert_eq!(claims.sub, account.id);
                assert_eq!(claims.username, "alice");
                assert_eq!(claims.email, "alice@example.com");
                assert_eq!(claims.role, Role::Admin);
                assert!(claims.exp > claims.iat);
            }
            TokenVerification::Invalid(reason) => panic!("expected valid token, got {reason:?}"),
        }
        Ok(())
    }

    #[test]
    fn expired_token_is_invalid_with_expired_reason() -> Result<()> {
        let token = codec().issue(&account(), Duration::seconds(-120))?;
        match codec().verify(&token) {
            TokenVerification::Invalid(InvalidTokenReason::Expired) => Ok(()),
            other => panic!("expected expired, got {other:?}"),
        }
    }

    #[test]
    fn wrong_secret_is_invalid_without_panicking() -> Result<()> {
        let token = codec().issue(&account(), Duration::hours(1))?;
        let other = TokenCodec::new(SecretString::from("different-secret".to_string()));
        match other.verify(&token) {
            TokenVerification::Invalid(InvalidTokenReason::Invalid) => Ok(()),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn garbage_input_is_invalid() {
        assert!(!codec().verify("not-a-token").is_valid());
        assert!(!codec().verify("").is_valid());
    }

    #[test]
    fn one_time_tokens_are_unique_and_high_entropy() -> Result<()> {
        let first = generate_one_time_token()?;
        let second = generate_one_time_token()?;
        assert_ne!(first, second);
        let decoded = URL_SAFE_NO_PAD.decode(first.as_bytes())?;
        assert_eq!(decoded.len(), 32);
        Ok(())
    }

    #[test]
    fn token_hashes_are_stable_and_distinct() {
        assert_eq!(hash_one_time_token("token"), hash_one_time_token("token"));
        assert_ne!(hash_one_time_token("token"), hash_one_time_token("other"));
    }
}
