//! Bearer token verification.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::Identity;
use super::error::AuthError;
use super::jwks::KeyCache;
use crate::config::JwksConfig;

/// Algorithms accepted for signatures. Anything else is rejected before a
/// key is looked up.
const RSA_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// The header fields read before the signature is checked.
#[derive(Debug, Deserialize)]
struct UnverifiedHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Verifies RSA-signed bearer tokens against a [`KeyCache`].
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: Arc<KeyCache>,
    issuer: Option<String>,
    audience: Option<String>,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Creates a verifier with no issuer/audience checks and the default leeway.
    #[must_use]
    pub fn new(keys: Arc<KeyCache>) -> Self {
        Self {
            keys,
            issuer: None,
            audience: None,
            leeway_secs: 60,
        }
    }

    /// Creates a verifier configured from `config`.
    #[must_use]
    pub fn from_config(keys: Arc<KeyCache>, config: &JwksConfig) -> Self {
        Self {
            keys,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            leeway_secs: config.leeway_secs,
        }
    }

    /// Requires the `iss` claim to equal `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Requires the `aud` claim to contain `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Sets the clock-skew allowance applied to `exp` and `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Returns the key cache backing this verifier.
    #[must_use]
    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Validates `token` and returns its subject.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = read_header(token)?;

        let alg = Algorithm::from_str(&header.alg)
            .ok()
            .filter(|alg| RSA_ALGORITHMS.contains(alg))
            .ok_or_else(|| AuthError::UnexpectedSigningMethod(header.alg.clone()))?;

        let kid = header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(AuthError::MissingKeyId)?;

        let key = self.keys.get_key(kid).await?;

        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway_secs;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp"]);
        match &self.issuer {
            Some(issuer) => validation.set_issuer(&[issuer]),
            None => validation.iss = None,
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation)?;

        let subject = data
            .claims
            .get("sub")
            .and_then(serde_json::Value::as_str)
            .filter(|sub| !sub.is_empty())
            .ok_or(AuthError::MissingSubject)?;

        debug!(kid, sub = subject, "Token verified");
        Ok(Identity::new(subject))
    }
}

/// Decodes the header segment without trusting any of it.
fn read_header(token: &str) -> Result<UnverifiedHeader, AuthError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthError::Malformed("expected three segments".to_string()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| AuthError::Malformed(format!("header encoding: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::Malformed(format!("header json: {e}")))
}
