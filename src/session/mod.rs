//! Session management
//!
//! Signed, expiring session tokens.

pub mod manager;
pub mod token;

pub use manager::{Session, SessionManager, SessionState};
pub use token::TokenSigner;
