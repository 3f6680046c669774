//! API configuration types.
//!
//! This module provides configuration for the API server including:
//! - Server binding address and port
//! - Key set endpoint and token validation settings
//! - CORS settings
//! - WebSocket settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ws::WsConfig;

/// API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Key set and token validation configuration
    #[serde(default)]
    pub jwks: JwksConfig,

    /// WebSocket configuration
    #[serde(default)]
    pub websocket: WsConfig,

    /// CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            jwks: JwksConfig::default(),
            websocket: WsConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Returns the server bind address.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where verification keys come from and how tokens are checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwksConfig {
    /// URL of the JSON Web Key Set document
    #[serde(default)]
    pub url: String,

    /// How long a fetched key set is trusted, in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Timeout for a key set request, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Required `iss` claim, if any
    #[serde(default)]
    pub issuer: Option<String>,

    /// Required `aud` claim, if any
    #[serde(default)]
    pub audience: Option<String>,

    /// Clock skew allowance for `exp`/`nbf`, in seconds
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            cache_ttl_secs: default_cache_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
            issuer: None,
            audience: None,
            leeway_secs: default_leeway(),
        }
    }
}

impl JwksConfig {
    /// Returns the cache TTL as a Duration.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Returns the fetch timeout as a Duration.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Enable CORS
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed origins (empty means all origins)
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Allowed headers
    #[serde(default = "default_headers")]
    pub allowed_headers: Vec<String>,

    /// Max age for preflight cache in seconds
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec![],
            allowed_headers: default_headers(),
            max_age_secs: default_max_age(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_leeway() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "Authorization".to_string()]
}

fn default_max_age() -> u64 {
    3600
}
