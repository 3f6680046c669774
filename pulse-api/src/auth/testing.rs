//! Test fixtures: RSA/EC keys, token signing and an in-memory key source.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::error::KeySetError;
use super::jwks::{JwkSet, KeySetSource};

pub(crate) const K1_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/rsa_k1.pem");
pub(crate) const K2_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/rsa_k2.pem");
pub(crate) const EC_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/ec_p256.pem");
pub(crate) const K1_MODULUS: &str = include_str!("../../tests/fixtures/rsa_k1_n.txt");
pub(crate) const K2_MODULUS: &str = include_str!("../../tests/fixtures/rsa_k2_n.txt");
pub(crate) const K1_CERT: &str = include_str!("../../tests/fixtures/rsa_k1_cert.b64");

pub(crate) fn rsa_jwk(kid: &str, modulus: &str) -> Value {
    json!({
        "kid": kid,
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "n": modulus.trim(),
        "e": "AQAB",
    })
}

pub(crate) fn cert_jwk(kid: &str, cert: &str) -> Value {
    json!({
        "kid": kid,
        "kty": "RSA",
        "x5c": [cert.trim()],
    })
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims for a token valid for the next hour.
pub(crate) fn valid_claims(sub: &str) -> Value {
    json!({
        "sub": sub,
        "iat": now(),
        "exp": now() + 3600,
    })
}

pub(crate) fn sign(alg: Algorithm, kid: Option<&str>, claims: &Value, pem: &str) -> String {
    let key = match alg {
        Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem.as_bytes()).unwrap(),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            EncodingKey::from_secret(pem.as_bytes())
        }
        _ => EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    };
    let mut header = Header::new(alg);
    header.kid = kid.map(str::to_string);
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// RS256 token signed with the k1 fixture key.
pub(crate) fn sign_k1(claims: &Value) -> String {
    sign(Algorithm::RS256, Some("k1"), claims, K1_PRIVATE_PEM)
}

enum Behaviour {
    Serve(Vec<Value>),
    Fail(KeySetError),
}

/// In-memory key source that counts fetches.
pub(crate) struct MockKeySource {
    behaviour: Mutex<Behaviour>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl std::fmt::Debug for MockKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockKeySource")
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

impl MockKeySource {
    pub(crate) fn with_keys(keys: Vec<Value>) -> Self {
        Self {
            behaviour: Mutex::new(Behaviour::Serve(keys)),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(error: KeySetError) -> Self {
        Self {
            behaviour: Mutex::new(Behaviour::Fail(error)),
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn set_keys(&self, keys: Vec<Value>) {
        *self.behaviour.lock() = Behaviour::Serve(keys);
    }

    pub(crate) fn fail_with(&self, error: KeySetError) {
        *self.behaviour.lock() = Behaviour::Fail(error);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetSource for MockKeySource {
    async fn fetch(&self) -> Result<JwkSet, KeySetError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &*self.behaviour.lock() {
            Behaviour::Serve(keys) => Ok(JwkSet { keys: keys.clone() }),
            Behaviour::Fail(error) => Err(error.clone()),
        }
    }
}
