//! RAX DAV Server
//!
//! Quota-enforced, multi-user file storage with session authentication.

pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod gate;
pub mod middleware;
pub mod protocol;
pub mod quota;
pub mod server;
pub mod session;
pub mod storage;

pub use crate::config::ServerConfig;
pub use crate::gate::AccessGate;
pub use crate::server::Server;
