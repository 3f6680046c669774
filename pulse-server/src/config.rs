//! Server configuration.
//!
//! Configuration is read from a YAML file, then `PULSE_*` environment
//! variables are applied on top, then the result is validated.
//!
//! ```yaml
//! api:
//!   host: 0.0.0.0
//!   port: 8080
//!   jwks:
//!     url: https://idp.example/.well-known/jwks.json
//!     audience: pulse
//!   websocket:
//!     queue_capacity: 256
//! logging:
//!   level: info
//!   format: json
//! shutdown:
//!   timeout_secs: 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use pulse_api::ApiConfig;
use pulse_telemetry::logging::LogConfig;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "PULSE";

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP, key set and WebSocket settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,

    /// Shutdown settings
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl ServerConfig {
    /// Loads, overrides from the environment, and validates a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_yaml(&text)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML document without applying overrides or validation.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Applies `PULSE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides resolved through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let env = EnvOverride::new(ENV_PREFIX, lookup);

        env.apply_string("HOST", &mut self.api.host);
        env.apply_number("PORT", &mut self.api.port);

        let jwks = &mut self.api.jwks;
        env.apply_string("JWKS_URL", &mut jwks.url);
        env.apply_number("JWKS_CACHE_TTL_SECS", &mut jwks.cache_ttl_secs);
        env.apply_number("JWKS_FETCH_TIMEOUT_SECS", &mut jwks.fetch_timeout_secs);
        env.apply_optional_string("JWKS_ISSUER", &mut jwks.issuer);
        env.apply_optional_string("JWKS_AUDIENCE", &mut jwks.audience);
        env.apply_number("JWKS_LEEWAY_SECS", &mut jwks.leeway_secs);

        let ws = &mut self.api.websocket;
        env.apply_number("WS_QUEUE_CAPACITY", &mut ws.queue_capacity);
        env.apply_number("WS_HEARTBEAT_INTERVAL_SECS", &mut ws.heartbeat_interval_secs);
        env.apply_number("WS_CONNECTION_TIMEOUT_SECS", &mut ws.connection_timeout_secs);
        env.apply_number("WS_WRITE_TIMEOUT_SECS", &mut ws.write_timeout_secs);

        env.apply_string("LOG_LEVEL", &mut self.logging.level);
        env.apply_number("LOG_FORMAT", &mut self.logging.format);

        env.apply_number("SHUTDOWN_TIMEOUT_SECS", &mut self.shutdown.timeout_secs);
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let jwks = &self.api.jwks;
        if jwks.url.trim().is_empty() {
            return Err(ConfigError::invalid("api.jwks.url", "is required"));
        }
        if !(jwks.url.starts_with("https://") || jwks.url.starts_with("http://")) {
            return Err(ConfigError::invalid("api.jwks.url", "must be an http(s) URL"));
        }
        require_non_zero("api.jwks.cache_ttl_secs", jwks.cache_ttl_secs)?;
        require_non_zero("api.jwks.fetch_timeout_secs", jwks.fetch_timeout_secs)?;

        let ws = &self.api.websocket;
        if ws.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "api.websocket.queue_capacity",
                "must be greater than zero",
            ));
        }
        require_non_zero(
            "api.websocket.heartbeat_interval_secs",
            ws.heartbeat_interval_secs,
        )?;
        require_non_zero("api.websocket.write_timeout_secs", ws.write_timeout_secs)?;
        if ws.connection_timeout_secs <= ws.heartbeat_interval_secs {
            return Err(ConfigError::invalid(
                "api.websocket.connection_timeout_secs",
                "must exceed heartbeat_interval_secs",
            ));
        }

        require_non_zero("shutdown.timeout_secs", self.shutdown.timeout_secs)?;
        Ok(())
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Grace period for open connections after a shutdown signal, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    /// Returns the shutdown timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn require_non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

/// Environment variable helper for applying overrides.
struct EnvOverride<'a, F> {
    prefix: &'a str,
    lookup: F,
}

impl<'a, F> EnvOverride<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(prefix: &'a str, lookup: F) -> Self {
        Self { prefix, lookup }
    }

    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}_{name}", self.prefix))
    }

    fn apply_string(&self, name: &str, target: &mut String) {
        if let Some(value) = self.get(name) {
            *target = value;
        }
    }

    fn apply_optional_string(&self, name: &str, target: &mut Option<String>) {
        if let Some(value) = self.get(name) {
            *target = Some(value).filter(|v| !v.is_empty());
        }
    }

    fn apply_number<T: std::str::FromStr>(&self, name: &str, target: &mut T) {
        if let Some(value) = self.get(name)
            && let Ok(parsed) = value.parse()
        {
            *target = parsed;
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path of the file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Document is not valid YAML for this schema
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value failed validation
    #[error("Invalid configuration: {field} {reason}")]
    Invalid {
        /// Dotted path of the offending field
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}
