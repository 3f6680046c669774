//! Shared fixtures for integration tests.

#![allow(dead_code)]

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};

pub const K1_PRIVATE_PEM: &str = include_str!("../fixtures/rsa_k1.pem");
pub const K2_PRIVATE_PEM: &str = include_str!("../fixtures/rsa_k2.pem");
pub const K1_MODULUS: &str = include_str!("../fixtures/rsa_k1_n.txt");
pub const K2_MODULUS: &str = include_str!("../fixtures/rsa_k2_n.txt");

pub fn rsa_jwk(kid: &str, modulus: &str) -> Value {
    json!({
        "kid": kid,
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "n": modulus.trim(),
        "e": "AQAB",
    })
}

pub fn jwks(keys: &[Value]) -> Value {
    json!({ "keys": keys })
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// RS256 token for `sub`, valid for an hour.
pub fn token_for(sub: &str, kid: &str, pem: &str) -> String {
    let claims = json!({ "sub": sub, "iat": now(), "exp": now() + 3600 });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, &claims, &key).unwrap()
}

pub fn k1_token(sub: &str) -> String {
    token_for(sub, "k1", K1_PRIVATE_PEM)
}
