//! Token authentication against a remote, rotating key set.
//!
//! This module provides:
//! - [`KeyCache`]: a TTL cache of RSA verification keys fetched from a JWKS endpoint
//! - [`TokenVerifier`]: validation of RS/PS-signed bearer tokens into an [`Identity`]
//!
//! Verification keys are never taken from the token itself. The `kid` header
//! only selects which published key to use.

mod error;
pub mod jwks;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AuthError, KeyParseError, KeySetError};
pub use jwks::{HttpKeySetSource, JwkSet, KeyCache, KeySetSource, RawJwk};
pub use verifier::TokenVerifier;

use serde::{Deserialize, Serialize};

/// Verified subject of a token.
///
/// Only produced by [`TokenVerifier::verify`] in production code; the `From`
/// impls exist for tests and for collaborators addressing a known user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity from a subject string.
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    /// Returns the subject string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Extracts the bearer token from an Authorization header value.
#[must_use]
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
