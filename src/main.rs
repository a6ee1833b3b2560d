//! tcp-daemon demo server
//!
//! Frames the byte stream (5-byte words by default) and answers each word:
//! - `00000` with `11111`
//! - alphabetic words with their upper and lower case forms
//! - numeric words with their digits sorted ascending and descending
//! - anything else with `unknown message`
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod demo;

use config::Config;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        framing = ?config.framing,
        max_connections = config.max_connections,
        write_timeout_ms = config.write_timeout.as_millis() as u64,
        tick_interval = ?config.tick_interval,
        "Starting tcp-daemon server"
    );

    let server = Arc::new(demo::build(&config));

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, shutting down");
                if let Err(e) = signal_server.stop() {
                    error!(error = %e, "Shutdown failed");
                }
            }
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
        }
    });

    server.start(&config.listen).await?;
    Ok(())
}
