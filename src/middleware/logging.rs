//! Logging middleware
//!
//! Logger setup and request logging.

use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Installs env_logger (`RUST_LOG` aware), appending to `log_file` when set.
pub fn init_logger(log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(path) = log_file {
        builder.target(env_logger::Target::Pipe(Box::new(open_log_file(path)?)));
    }
    builder.init();
    Ok(())
}

/// Opens a log file for appending, creating it and its directory if needed
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Log a client connection
pub fn log_connection(client_addr: &str) {
    info!("Client connected: {}", client_addr);
}

/// Log a client disconnection
pub fn log_disconnection(client_addr: &str, user: Option<&str>) {
    match user {
        Some(user) => info!("Client {} ({}) disconnected", client_addr, user),
        None => info!("Client {} disconnected", client_addr),
    }
}

/// Log a client command
pub fn log_command(client_addr: &str, command: &str) {
    debug!("Client {} executed: {}", client_addr, redact(command));
}

/// Hides credentials in a command line
pub fn redact(command: &str) -> String {
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some(verb) if verb.eq_ignore_ascii_case("LOGIN") => {
            format!("{verb} {} ****", parts.next().unwrap_or(""))
        }
        Some(verb) if verb.eq_ignore_ascii_case("TOKEN") => format!("{verb} ****"),
        _ => command.to_string(),
    }
}
