//! Authentication system
//!
//! User provisioning, credential hashing and input validation.

pub mod credentials;
pub mod directory;
pub mod validator;

pub use directory::UserDirectory;
pub use validator::{validate_password, validate_username};
