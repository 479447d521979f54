//! API keys and timing-safe verification.
//!
//! Keys are compared by hashing both sides with SHA-256 and comparing the
//! digests in constant time, so neither match position nor key length
//! shapes the timing. Every configured key is checked on every attempt.

use crate::error::AuthError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A configured API credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    /// The opaque key string.
    pub key: String,
    /// Human-readable owner name, attached to authenticated requests.
    pub name: String,
    /// Scopes this credential carries.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Optional expiration.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// Credential owner name.
    pub name: String,
    /// Scopes granted to the caller.
    pub scopes: Vec<String>,
}

/// Compares two secrets in constant time via fixed-length digests.
#[must_use]
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    let digest_a = Sha256::digest(a.as_bytes());
    let digest_b = Sha256::digest(b.as_bytes());
    digest_a.as_slice().ct_eq(digest_b.as_slice()).unwrap_u8() == 1
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
/// The prefix is case-insensitive and surrounding spaces are trimmed.
#[must_use]
pub fn extract_bearer(authorization: &str) -> Option<&str> {
    let trimmed = authorization.trim();
    if trimmed.len() < 7 || !trimmed[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = trimmed[7..].trim();
    (!token.is_empty()).then_some(token)
}

/// The configured set of API credentials.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<ApiKey>,
}

impl KeySet {
    /// Creates a key set.
    #[must_use]
    pub fn new(keys: Vec<ApiKey>) -> Self {
        Self { keys }
    }

    /// Returns true when no keys are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Authenticates a presented key.
    ///
    /// Every configured key is compared regardless of earlier matches, so
    /// valid and invalid attempts do comparable work.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKey` when nothing matches, `Expired` when the
    /// matching credential is past its expiration.
    pub fn authenticate(
        &self,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<UserContext, AuthError> {
        let mut matched: Option<&ApiKey> = None;
        for key in &self.keys {
            if timing_safe_eq(&key.key, presented) {
                matched = Some(key);
            }
        }

        let key = matched.ok_or(AuthError::UnknownKey)?;
        if let Some(expires_at) = key.expires_at {
            if expires_at <= now {
                return Err(AuthError::Expired {
                    name: key.name.clone(),
                });
            }
        }
        Ok(UserContext {
            name: key.name.clone(),
            scopes: key.scopes.clone(),
        })
    }
}
