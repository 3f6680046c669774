//! # Pulse Server
//!
//! Process entry point for the Pulse activity notification service.
//!
//! This crate provides:
//! - YAML configuration with `PULSE_*` environment overrides
//! - Logging initialization
//! - API server startup
//! - Graceful shutdown on SIGINT/SIGTERM

pub mod config;
pub mod server;
pub mod shutdown;

pub use config::{ConfigError, ServerConfig};
pub use server::{PulseServer, ServerError};
pub use shutdown::ShutdownController;
