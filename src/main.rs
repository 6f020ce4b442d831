/// Main entry point for the UART bridge server
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use uart_bridge::{
    AppState,
    config::{ConfigLoader, init_logging},
    server::run_with_graceful_shutdown,
    uart::create_backend,
};

/// Bridge UART devices onto TCP sessions
#[derive(Debug, Parser)]
#[command(name = "uart_bridge", version, about)]
struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Force debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = ConfigLoader::new()
        .load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let _log_guard = init_logging(&config.logging, cli.debug).context("Failed to initialise logging")?;
    info!(
        "Starting UART bridge: {} devices, command listener on {}",
        config.uart.device_count, config.server.command_addr
    );

    let backend = create_backend(&config.uart).context("Failed to create UART backend")?;
    let app_state = AppState::new(config, backend);

    run_with_graceful_shutdown(app_state)
        .await
        .context("Server failed")?;
    Ok(())
}
