//! Tagwire relay
//!
//! Headless message relay built on `tagwire-net`. Clients are greeted on
//! validation, pings are echoed, and broadcast requests are forwarded to
//! every other client.

use std::path::PathBuf;
use std::process::ExitCode;

use tagwire_net::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod relay;

use config::AppConfig;
use relay::RelayHandler;

fn main() -> ExitCode {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tagwire-relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!("Starting Tagwire relay");

    let mut server = Server::new(config.server.clone(), RelayHandler);
    if let Err(e) = server.start() {
        tracing::error!("Failed to start server: {}", e);
        return ExitCode::FAILURE;
    }

    loop {
        relay::tick(&server, relay::SWEEP_INTERVAL);
    }
}
