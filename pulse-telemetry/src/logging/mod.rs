//! Structured logging system for Pulse.
//!
//! Provides configurable logging with support for:
//! - JSON and pretty-print formats
//! - Multiple output targets (stdout, file)
//! - Log rotation
//! - Sensitive data masking

mod config;
mod writer;

pub use config::{LogConfig, LogFormat, LogOutput, RotationConfig};
pub use writer::{MaskingMakeWriter, MaskingWriter};

use crate::masking::SensitiveDataMasker;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Initialize the logging system with the given configuration.
///
/// Returns guards that must be kept alive for the duration of the program
/// to ensure all file logs are flushed.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`.
///
/// # Example
///
/// ```no_run
/// use pulse_telemetry::logging::{init_logging, LogConfig};
///
/// let config = LogConfig::default();
/// let _guards = init_logging(&config).expect("Failed to initialize logging");
/// ```
pub fn init_logging(config: &LogConfig) -> Result<Vec<WorkerGuard>, LoggingError> {
    let mut guards = Vec::new();
    let masker = Arc::new(SensitiveDataMasker::new());

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| LoggingError::InvalidConfig(format!("bad level '{}': {e}", config.level)))?,
    };

    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();

    for output in &config.outputs {
        match output {
            LogOutput::Stdout => {
                let writer = MaskingMakeWriter::new(std::io::stdout, Arc::clone(&masker));
                layers.push(build_layer(config, writer));
            }
            LogOutput::File { path, rotation } => {
                std::fs::create_dir_all(path)?;
                let appender = match rotation.unwrap_or(RotationConfig::Daily) {
                    RotationConfig::Hourly => tracing_appender::rolling::hourly(path, "pulse.log"),
                    RotationConfig::Daily => tracing_appender::rolling::daily(path, "pulse.log"),
                    RotationConfig::Never => tracing_appender::rolling::never(path, "pulse.log"),
                };
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let writer = MaskingMakeWriter::new(non_blocking, Arc::clone(&masker));
                layers.push(build_layer(config, writer));
                guards.push(guard);
            }
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(guards)
}

fn build_layer<S, W>(config: &LogConfig, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(config.include_thread_id)
        .with_file(config.include_file_info)
        .with_line_number(config.include_file_info)
        .with_span_events(span_events);

    match config.format {
        LogFormat::Json => base.json().flatten_event(true).boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to create log directory
    #[error("Failed to create log directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid logging configuration: {0}")]
    InvalidConfig(String),

    /// A global subscriber was already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
