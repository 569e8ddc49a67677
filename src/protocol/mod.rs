//! Control protocol implementation
//!
//! Handles command parsing, dispatch to the access gate, and response
//! generation for the line-oriented TCP front end.

pub mod commands;
pub mod handlers;
pub mod links;
pub mod responses;

pub use commands::{Command, CommandResult, CommandStatus, FileBody, parse_command};
pub use handlers::{ProtocolContext, handle_command};
pub use links::Links;
