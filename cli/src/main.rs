//! OCPP CSMS - CLI Server
//!
//! Headless OCPP 1.6 central system suitable for deployment as a systemd
//! service, Docker container, or standalone process.
//!
//! ```sh
//! # Run with default config (~/.config/ocpp-csms/config.toml)
//! ocpp-csms
//!
//! # Custom config path
//! ocpp-csms --config /etc/ocpp-csms/config.toml
//!
//! # Override the WebSocket port
//! ocpp-csms --ws-port 9000
//!
//! # Validate config without starting
//! ocpp-csms --check
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use ocpp_csms::config::AppConfig;
use ocpp_csms::server::{init_tracing, ServerHandle, ServerOptions};

/// OCPP 1.6 central system for EV charging stations.
#[derive(Parser, Debug)]
#[command(
    name = "ocpp-csms",
    version,
    about = "OCPP 1.6 central system for EV charging station management",
    long_about = "WebSocket server speaking OCPP-J 1.6 to charging stations.\n\n\
                  Default config: ~/.config/ocpp-csms/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "OCPP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the WebSocket listen port.
    #[arg(long)]
    ws_port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,

    /// Skip database migrations on startup.
    #[arg(long)]
    no_migrate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.unwrap_or_else(ocpp_csms::default_config_path);

    let loaded = AppConfig::load(&config_path);
    if cli.check {
        // Validation mode reports the error instead of falling back
        let mut config = loaded?;
        apply_overrides(&mut config, cli.ws_port, cli.log_level.as_deref());
        config.validate()?;
        println!("Configuration is valid");
        println!("   Config file : {}", config_path.display());
        println!("   WS address  : {}", config.server.ws_address());
        println!("   Database    : {}", config.database.url);
        println!("   Log level   : {}", config.logging.level);
        println!("   Accounts    : {}", config.accounts.len());
        return Ok(());
    }

    let config = match loaded {
        Ok(mut cfg) => {
            apply_overrides(&mut cfg, cli.ws_port, cli.log_level.as_deref());
            // Init tracing first so subsequent logs are formatted properly
            init_tracing(&cfg);
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            // Fallback tracing init
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
            let mut cfg = AppConfig::default();
            apply_overrides(&mut cfg, cli.ws_port, cli.log_level.as_deref());
            cfg
        }
    };

    // ── Start server ───────────────────────────────────────────
    let handle = ServerHandle::start(ServerOptions {
        config,
        auto_migrate: !cli.no_migrate,
    })
    .await?;

    // Install OS signal handlers (SIGTERM, SIGINT)
    handle.install_signal_handler();

    info!(ws_port = handle.ws_port, "Press Ctrl+C to shutdown gracefully.");

    // Wait for shutdown signal, then clean up
    handle.shutdown_signal().wait().await;
    handle.wait().await;

    Ok(())
}

fn apply_overrides(config: &mut AppConfig, ws_port: Option<u16>, log_level: Option<&str>) {
    if let Some(port) = ws_port {
        config.server.ws_port = port;
    }
    if let Some(level) = log_level {
        config.logging.level = level.to_string();
    }
}
