//! # Pulse Telemetry
//!
//! Logging for the Pulse real-time activity server.
//!
//! This crate provides:
//! - Structured logging with JSON and pretty formats
//! - Optional rolling file output
//! - Masking of bearer tokens and other credentials before they reach a log sink
//!
//! Handshake tokens travel in query strings, which makes them easy to leak
//! through request tracing. Every writer installed by [`logging::init_logging`]
//! runs its output through [`masking::SensitiveDataMasker`] first.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

/// Logging configuration and initialization
pub mod logging;

/// Sensitive data masking
pub mod masking;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::logging::{LogConfig, LogFormat, LogOutput, init_logging};
    pub use crate::masking::{Sensitive, SensitiveDataMasker};
}
