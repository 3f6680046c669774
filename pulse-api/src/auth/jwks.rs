//! JWKS fetching and key caching.
//!
//! The cache holds one snapshot of `kid -> key` plus a single expiry. Lookups
//! read the snapshot without waiting. Misses and expiry funnel into one async
//! refresh section so that concurrent misses cost a single fetch.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::DecodingKey;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::error::{KeyParseError, KeySetError};

/// Source of key set documents.
#[async_trait]
pub trait KeySetSource: Send + Sync + fmt::Debug {
    /// Fetches the current key set document.
    async fn fetch(&self) -> Result<JwkSet, KeySetError>;
}

/// A key set document: `{"keys": [...]}`.
///
/// Entries are kept as raw JSON so that one odd entry cannot fail the whole
/// document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    /// Raw key entries
    pub keys: Vec<serde_json::Value>,
}

/// The JWK fields the cache understands.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJwk {
    /// Key id
    #[serde(default)]
    pub kid: Option<String>,
    /// Key type (`RSA`, `EC`, ...)
    #[serde(default)]
    pub kty: String,
    /// Public key use (`sig` / `enc`)
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    /// Declared algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// RSA modulus, base64url
    #[serde(default)]
    pub n: Option<String>,
    /// RSA public exponent, base64url
    #[serde(default)]
    pub e: Option<String>,
    /// Certificate chain, standard base64 DER, leaf first
    #[serde(default)]
    pub x5c: Option<Vec<String>>,
}

/// Fetches key sets over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySetSource {
    /// Creates a source for `url` whose requests give up after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeySetError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeySetError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Returns the key set URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<JwkSet, KeySetError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| KeySetError::Transport(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(KeySetError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| KeySetError::Transport(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| KeySetError::Decode(e.to_string()))
    }
}

/// One immutable view of the cache.
struct KeySnapshot {
    keys: HashMap<String, Arc<DecodingKey>>,
    expires_at: Instant,
    /// Bumped on every successful refresh.
    generation: u64,
}

impl KeySnapshot {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }

    fn fresh_key(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        if self.is_fresh() {
            self.keys.get(kid).cloned()
        } else {
            None
        }
    }
}

/// TTL cache of RSA verification keys keyed by `kid`.
pub struct KeyCache {
    source: Arc<dyn KeySetSource>,
    ttl: Duration,
    snapshot: RwLock<Arc<KeySnapshot>>,
    refresh_lock: Mutex<()>,
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("KeyCache")
            .field("source", &self.source)
            .field("ttl", &self.ttl)
            .field("keys", &snapshot.keys.len())
            .field("generation", &snapshot.generation)
            .finish_non_exhaustive()
    }
}

impl KeyCache {
    /// Creates an empty cache. The first lookup triggers a fetch.
    pub fn new(source: Arc<dyn KeySetSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: RwLock::new(Arc::new(KeySnapshot {
                keys: HashMap::new(),
                expires_at: Instant::now(),
                generation: 0,
            })),
            refresh_lock: Mutex::new(()),
        }
    }

    fn snapshot(&self) -> Arc<KeySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Returns the verification key for `kid`, refreshing the key set if needed.
    ///
    /// A fetch failure falls back to a stale cached key when one exists for `kid`.
    #[instrument(skip(self))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<DecodingKey>, KeySetError> {
        let seen = self.snapshot();
        if let Some(key) = seen.fresh_key(kid) {
            return Ok(key);
        }

        let _refresh = self.refresh_lock.lock().await;

        let current = self.snapshot();
        if let Some(key) = current.fresh_key(kid) {
            return Ok(key);
        }
        if current.generation != seen.generation && current.is_fresh() {
            // Another caller refreshed while we waited and the key is not in it.
            return Err(KeySetError::KeyNotFound(kid.to_string()));
        }

        match self.refresh(&current).await {
            Ok(refreshed) => refreshed
                .keys
                .get(kid)
                .cloned()
                .ok_or_else(|| KeySetError::KeyNotFound(kid.to_string())),
            Err(err) => match current.keys.get(kid) {
                Some(stale) => {
                    warn!(kid, error = %err, "Key set refresh failed, using cached key");
                    Ok(Arc::clone(stale))
                }
                None => Err(err),
            },
        }
    }

    /// Fetches and installs a new snapshot. Caller must hold `refresh_lock`.
    async fn refresh(&self, previous: &KeySnapshot) -> Result<Arc<KeySnapshot>, KeySetError> {
        let document = self.source.fetch().await.inspect_err(|err| {
            warn!(error = %err, "Key set fetch failed");
        })?;

        let keys = parse_key_set(&document)?;
        let next = Arc::new(KeySnapshot {
            keys,
            expires_at: Instant::now() + self.ttl,
            generation: previous.generation + 1,
        });

        *self.snapshot.write() = Arc::clone(&next);
        info!(
            keys = next.keys.len(),
            generation = next.generation,
            "Key set refreshed"
        );
        Ok(next)
    }

    /// Key ids in the current snapshot, sorted.
    #[must_use]
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns true if the next lookup will have to refresh.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        !self.snapshot().is_fresh()
    }
}

/// Parses every usable entry of `document`.
///
/// Bad entries are skipped; the refresh fails only when nothing usable remains.
pub fn parse_key_set(document: &JwkSet) -> Result<HashMap<String, Arc<DecodingKey>>, KeySetError> {
    let mut keys = HashMap::with_capacity(document.keys.len());

    for entry in &document.keys {
        let jwk: RawJwk = match serde_json::from_value(entry.clone()) {
            Ok(jwk) => jwk,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable key set entry");
                continue;
            }
        };

        match parse_jwk(&jwk) {
            Ok((kid, key)) => {
                keys.insert(kid, Arc::new(key));
            }
            Err(KeyParseError::UnsupportedKeyType(kty)) => {
                debug!(kid = ?jwk.kid, %kty, "Skipping non-RSA key");
            }
            Err(e) => {
                warn!(kid = ?jwk.kid, error = %e, "Skipping key set entry");
            }
        }
    }

    if keys.is_empty() {
        return Err(KeySetError::NoUsableKeys);
    }
    Ok(keys)
}

/// Builds a verification key from one JWK.
pub fn parse_jwk(jwk: &RawJwk) -> Result<(String, DecodingKey), KeyParseError> {
    if jwk.kty != "RSA" {
        return Err(KeyParseError::UnsupportedKeyType(jwk.kty.clone()));
    }
    let kid = jwk
        .kid
        .as_deref()
        .filter(|kid| !kid.is_empty())
        .ok_or(KeyParseError::MissingKeyId)?;
    if let Some(key_use) = jwk.key_use.as_deref()
        && key_use != "sig"
    {
        return Err(KeyParseError::NotSigningKey(key_use.to_string()));
    }

    let leaf = jwk.x5c.as_ref().and_then(|chain| chain.first());
    let components = jwk.n.as_deref().zip(jwk.e.as_deref());

    let key = match (leaf, components) {
        (Some(cert), None) => key_from_certificate(cert)?,
        (Some(cert), Some((n, e))) => key_from_certificate(cert).or_else(|err| {
            debug!(kid, error = %err, "Certificate unusable, falling back to n/e");
            key_from_components(n, e)
        })?,
        (None, Some((n, e))) => key_from_components(n, e)?,
        (None, None) => return Err(KeyParseError::MissingComponents),
    };

    Ok((kid.to_string(), key))
}

fn key_from_components(n: &str, e: &str) -> Result<DecodingKey, KeyParseError> {
    let modulus = decode_base64url("n", n)?;
    let exponent = decode_base64url("e", e)?;

    if modulus.iter().all(|b| *b == 0) {
        return Err(KeyParseError::MissingComponents);
    }
    check_exponent(&exponent)?;

    Ok(DecodingKey::from_rsa_raw_components(&modulus, &exponent))
}

/// Rejects an exponent that is empty or larger than `i32::MAX`.
fn check_exponent(bytes: &[u8]) -> Result<(), KeyParseError> {
    let significant: &[u8] = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => return Err(KeyParseError::ExponentOutOfRange),
    };
    if significant.len() > 4 {
        return Err(KeyParseError::ExponentOutOfRange);
    }

    let value = significant
        .iter()
        .fold(0_u64, |acc, b| (acc << 8) | u64::from(*b));
    if value > u64::from(i32::MAX.unsigned_abs()) {
        return Err(KeyParseError::ExponentOutOfRange);
    }
    Ok(())
}

fn key_from_certificate(cert: &str) -> Result<DecodingKey, KeyParseError> {
    let der = STANDARD
        .decode(cert.trim())
        .map_err(|e| KeyParseError::InvalidEncoding {
            field: "x5c",
            reason: e.to_string(),
        })?;

    let body = STANDARD.encode(&der);
    let mut pem = String::with_capacity(body.len() + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for line in body.as_bytes().chunks(64) {
        // base64 output is ASCII
        pem.push_str(std::str::from_utf8(line).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");

    DecodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| KeyParseError::InvalidCertificate(e.to_string()))
}

fn decode_base64url(field: &'static str, value: &str) -> Result<Vec<u8>, KeyParseError> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| KeyParseError::InvalidEncoding {
            field,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::{
        K1_CERT, K1_MODULUS, K2_MODULUS, MockKeySource, cert_jwk, rsa_jwk,
    };
    use futures::future::join_all;
    use serde_json::json;

    fn cache_for(source: &Arc<MockKeySource>) -> KeyCache {
        KeyCache::new(
            Arc::clone(source) as Arc<dyn KeySetSource>,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_cached_key_served_without_fetch() {
        let source = Arc::new(MockKeySource::with_keys(vec![rsa_jwk("k1", K1_MODULUS)]));
        let cache = cache_for(&source);

        assert!(cache.is_expired());
        cache.get_key("k1").await.unwrap();
        cache.get_key("k1").await.unwrap();
        cache.get_key("k1").await.unwrap();

        assert_eq!(source.fetch_count(), 1);
        assert!(!cache.is_expired());
        assert_eq!(cache.key_ids(), vec!["k1".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_kid_fails_after_one_refresh() {
        let source = Arc::new(MockKeySource::with_keys(vec![rsa_jwk("k1", K1_MODULUS)]));
        let cache = cache_for(&source);

        cache.get_key("k1").await.unwrap();
        assert_eq!(source.fetch_count(), 1);

        let Err(err) = cache.get_key("k2").await else {
            panic!("expected k2 to be missing");
        };
        assert!(matches!(err, KeySetError::KeyNotFound(ref kid) if kid == "k2"));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce_into_one_fetch() {
        let source = Arc::new(
            MockKeySource::with_keys(vec![rsa_jwk("k1", K1_MODULUS)])
                .with_delay(Duration::from_millis(50)),
        );
        let cache = cache_for(&source);

        let results = join_all((0..16).map(|_| cache.get_key("k1"))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_for_absent_kid_fetch_once() {
        let source = Arc::new(
            MockKeySource::with_keys(vec![rsa_jwk("k1", K1_MODULUS)])
                .with_delay(Duration::from_millis(50)),
        );
        let cache = cache_for(&source);

        let results = join_all((0..8).map(|_| cache.get_key("missing"))).await;

        assert!(
            results
                .iter()
                .all(|r| matches!(r, Err(KeySetError::KeyNotFound(_))))
        );
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_cache_wholesale() {
        let source = Arc::new(MockKeySource::with_keys(vec![rsa_jwk("k1", K1_MODULUS)]));
        let cache = KeyCache::new(
            Arc::clone(&source) as Arc<dyn KeySetSource>,
            Duration::ZERO,
        );

        cache.get_key("k1").await.unwrap();
        source.set_keys(vec![rsa_jwk("k2", K2_MODULUS)]);

        cache.get_key("k2").await.unwrap();
        assert_eq!(cache.key_ids(), vec!["k2".to_string()]);
        assert!(matches!(
            cache.get_key("k1").await,
            Err(KeySetError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_on_empty_cache_fails() {
        let source = Arc::new(MockKeySource::failing(KeySetError::Status(503)));
        let cache = cache_for(&source);

        let Err(err) = cache.get_key("k1").await else {
            panic!("expected fetch failure to surface");
        };
        assert!(matches!(err, KeySetError::Status(503)));
        assert!(cache.key_ids().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_stale_keys() {
        let source = Arc::new(MockKeySource::with_keys(vec![rsa_jwk("k1", K1_MODULUS)]));
        let cache = KeyCache::new(
            Arc::clone(&source) as Arc<dyn KeySetSource>,
            Duration::ZERO,
        );

        cache.get_key("k1").await.unwrap();
        source.fail_with(KeySetError::Transport("connection refused".to_string()));

        // Expired, refresh fails, stale key still served.
        cache.get_key("k1").await.unwrap();
        assert_eq!(cache.key_ids(), vec!["k1".to_string()]);

        // Unknown kid surfaces the fetch error.
        assert!(matches!(
            cache.get_key("k2").await,
            Err(KeySetError::Transport(_))
        ));
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_by_next_caller() {
        let source = Arc::new(MockKeySource::failing(KeySetError::Status(500)));
        let cache = cache_for(&source);

        assert!(cache.get_key("k1").await.is_err());
        source.set_keys(vec![rsa_jwk("k1", K1_MODULUS)]);
        assert!(cache.get_key("k1").await.is_ok());
        assert_eq!(source.fetch_count(), 2);
    }

    #[test]
    fn test_parse_key_set_skips_bad_entries() {
        let document = JwkSet {
            keys: vec![
                json!({"kid": "ec", "kty": "EC", "crv": "P-256", "x": "AA", "y": "AA"}),
                json!({"kid": "enc", "kty": "RSA", "use": "enc", "n": K1_MODULUS, "e": "AQAB"}),
                json!({"kty": "RSA", "n": K1_MODULUS, "e": "AQAB"}),
                json!({"kid": "bad-n", "kty": "RSA", "n": "!!!", "e": "AQAB"}),
                json!({"kid": "k1", "kty": "RSA", "n": K1_MODULUS, "e": "AQAB"}),
                json!("not an object"),
            ],
        };

        let keys = parse_key_set(&document).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("k1"));
    }

    #[test]
    fn test_parse_key_set_with_no_usable_keys_fails() {
        let document = JwkSet {
            keys: vec![json!({"kid": "ec", "kty": "EC"})],
        };
        assert!(matches!(
            parse_key_set(&document),
            Err(KeySetError::NoUsableKeys)
        ));
        assert!(matches!(
            parse_key_set(&JwkSet { keys: vec![] }),
            Err(KeySetError::NoUsableKeys)
        ));
    }

    #[test]
    fn test_parse_jwk_prefers_certificate() {
        let jwk: RawJwk = serde_json::from_value(cert_jwk("k1", K1_CERT)).unwrap();
        let (kid, _key) = parse_jwk(&jwk).unwrap();
        assert_eq!(kid, "k1");
    }

    #[test]
    fn test_parse_jwk_falls_back_to_components() {
        let jwk = RawJwk {
            kid: Some("k1".to_string()),
            kty: "RSA".to_string(),
            n: Some(K1_MODULUS.to_string()),
            e: Some("AQAB".to_string()),
            x5c: Some(vec!["bm90IGEgY2VydGlmaWNhdGU=".to_string()]),
            ..RawJwk::default()
        };
        assert!(parse_jwk(&jwk).is_ok());
    }

    #[test]
    fn test_parse_jwk_tolerates_padding() {
        let jwk = RawJwk {
            kid: Some("k1".to_string()),
            kty: "RSA".to_string(),
            n: Some(format!("{K1_MODULUS}==")),
            e: Some("AQAB".to_string()),
            ..RawJwk::default()
        };
        assert!(parse_jwk(&jwk).is_ok());
    }

    #[test]
    fn test_parse_jwk_rejects_missing_material() {
        let jwk = RawJwk {
            kid: Some("k1".to_string()),
            kty: "RSA".to_string(),
            ..RawJwk::default()
        };
        assert_eq!(parse_jwk(&jwk).err(), Some(KeyParseError::MissingComponents));
    }

    #[test]
    fn test_exponent_range() {
        assert!(check_exponent(&[0x01, 0x00, 0x01]).is_ok());
        assert!(check_exponent(&[0x00, 0x00, 0x01, 0x00, 0x01]).is_ok());
        assert!(check_exponent(&[0x7f, 0xff, 0xff, 0xff]).is_ok());
        assert_eq!(
            check_exponent(&[0x80, 0x00, 0x00, 0x00]),
            Err(KeyParseError::ExponentOutOfRange)
        );
        assert_eq!(
            check_exponent(&[0x01, 0x00, 0x00, 0x00, 0x01]),
            Err(KeyParseError::ExponentOutOfRange)
        );
        assert_eq!(check_exponent(&[]), Err(KeyParseError::ExponentOutOfRange));
        assert_eq!(check_exponent(&[0x00]), Err(KeyParseError::ExponentOutOfRange));
    }
}
