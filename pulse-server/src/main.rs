//! # Pulse Server
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration file
//! pulse-server
//!
//! # Run with custom configuration file
//! pulse-server --config /path/to/config.yaml
//!
//! # Run with environment variable overrides
//! PULSE_JWKS_URL=https://idp.example/jwks.json PULSE_SERVER_PORT=9090 pulse-server
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use pulse_server::{PulseServer, ServerConfig};

/// Pulse activity notification server
#[derive(Parser, Debug)]
#[command(name = "pulse-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override server host
    #[arg(long, env = "PULSE_SERVER_HOST")]
    host: Option<String>,

    /// Override server port
    #[arg(long, env = "PULSE_SERVER_PORT")]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    if args.validate {
        println!("Configuration is valid");
        return;
    }

    if let Err(e) = run_server(config).await {
        error!("Server error: {e:#}");
        eprintln!("Server error: {e:#}");
        std::process::exit(1);
    }
}

/// Loads configuration from file and applies overrides.
fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = if args.config.exists() {
        ServerConfig::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        eprintln!(
            "Configuration file not found: {}, using defaults",
            args.config.display()
        );
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        config
    };

    if let Some(host) = &args.host {
        config.api.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    config.validate().context("validating configuration")?;
    Ok(config)
}

/// Creates and runs the server.
async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let mut server = PulseServer::new(config)?;
    server.init_logging()?;
    server.run().await?;

    info!("Pulse server stopped");
    Ok(())
}
