//! Authentication error types.

use thiserror::Error;

/// Failure to obtain a verification key.
///
/// Fetch failures leave previously cached keys in place.
#[derive(Debug, Clone, Error)]
pub enum KeySetError {
    /// Network error or timeout talking to the key set endpoint
    #[error("key set request failed: {0}")]
    Transport(String),

    /// Key set endpoint answered with a non-success status
    #[error("key set endpoint returned HTTP {0}")]
    Status(u16),

    /// Key set document was not valid JSON or lacked a `keys` array
    #[error("key set document is malformed: {0}")]
    Decode(String),

    /// Every entry of the fetched document was skipped
    #[error("key set contained no usable signing keys")]
    NoUsableKeys,

    /// The requested key id is not in a freshly fetched key set
    #[error("signing key '{0}' not found")]
    KeyNotFound(String),
}

/// Failure to turn a single key set entry into a verification key.
///
/// These are logged and the entry is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    /// Entry has no `kid`
    #[error("entry has no key id")]
    MissingKeyId,

    /// Entry is not an RSA key
    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    /// Entry is published for a use other than signatures
    #[error("key use '{0}' is not 'sig'")]
    NotSigningKey(String),

    /// Entry has neither a certificate chain nor modulus/exponent
    #[error("entry has neither x5c nor n/e")]
    MissingComponents,

    /// A base64 field could not be decoded
    #[error("field '{field}' is not valid base64: {reason}")]
    InvalidEncoding {
        /// Name of the JWK field
        field: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Public exponent is empty or does not fit a signed 32-bit integer
    #[error("public exponent out of range")]
    ExponentOutOfRange,

    /// Certificate could not be turned into an RSA key
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
}

/// Token rejection reason.
///
/// Each variant is distinct so callers can, for instance, prompt for
/// re-authentication on [`AuthError::Expired`] but hard-reject the rest.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Token could not be parsed or failed a structural check
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Token header names a non-RSA algorithm
    #[error("unexpected signing method: {0}")]
    UnexpectedSigningMethod(String),

    /// Token header has no `kid`
    #[error("token header has no key id")]
    MissingKeyId,

    /// Verification key could not be resolved
    #[error("verification key unavailable: {0}")]
    KeyUnavailable(#[from] KeySetError),

    /// Signature does not match the resolved key
    #[error("invalid token signature")]
    InvalidSignature,

    /// `exp` is in the past
    #[error("token has expired")]
    Expired,

    /// `nbf` is in the future
    #[error("token is not yet valid")]
    NotYetValid,

    /// `iss` does not match the configured issuer
    #[error("invalid token issuer")]
    InvalidIssuer,

    /// `aud` does not match the configured audience
    #[error("invalid token audience")]
    InvalidAudience,

    /// `sub` is absent, empty or not a string
    #[error("token has no subject")]
    MissingSubject,
}

impl AuthError {
    /// Returns true if the token was well-formed but has expired.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }

    /// Short machine-readable reason, used in logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnexpectedSigningMethod(_) => "unexpected_signing_method",
            Self::MissingKeyId => "missing_kid",
            Self::KeyUnavailable(_) => "key_unavailable",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidAudience => "invalid_audience",
            Self::MissingSubject => "missing_subject",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::InvalidAlgorithm => Self::UnexpectedSigningMethod(err.to_string()),
            _ => Self::Malformed(err.to_string()),
        }
    }
}
