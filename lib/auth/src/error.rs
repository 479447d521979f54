//! Error types for the auth crate.

use std::fmt;

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented.
    MissingCredential,
    /// The presented key matches no configured credential.
    UnknownKey,
    /// The matched credential is past its expiration.
    Expired { name: String },
    /// The key arrived as a URL query parameter, which access logs would
    /// capture.
    QueryParameterKey,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "missing credential"),
            Self::UnknownKey => write!(f, "invalid credential"),
            Self::Expired { name } => write!(f, "credential '{name}' has expired"),
            Self::QueryParameterKey => {
                write!(
                    f,
                    "api_key query parameters are not accepted; use the Authorization header"
                )
            }
        }
    }
}

impl std::error::Error for AuthError {}
