//! Server core functionality
//!
//! Wires configuration, storage and the access gate together and runs the
//! control listener.

pub mod core;

pub use core::Server;
