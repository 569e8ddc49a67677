//! Access gate
//!
//! Authorizes and executes storage operations on behalf of a session.

pub mod operations;
pub mod results;

pub use operations::AccessGate;
pub use results::Destination;
