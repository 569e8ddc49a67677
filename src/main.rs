//! RAX DAV Server - Entry Point
//!
//! Loads `config.toml` (with `RAX_DAV_` environment overrides) and serves the
//! control protocol until killed.

use log::{error, info};
use std::process::ExitCode;

use rax_dav_server::middleware::logging::init_logger;
use rax_dav_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    // The log target comes from the config, so load it before the logger exists
    let loaded = ServerConfig::load();
    let log_file = loaded
        .as_ref()
        .ok()
        .and_then(|config| config.core.errors_log.clone());

    if let Err(e) = init_logger(log_file.as_deref()) {
        eprintln!("Cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Launching RAX DAV server...");

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    server.run().await;
    ExitCode::SUCCESS
}
