//! Authentication input validation
//!
//! Sanity checks applied to usernames and passwords before they reach the
//! credential store.

use crate::error::AuthError;
use crate::storage::validation::validate_user_id;

/// Longest password accepted at login or provisioning
pub const MAX_PASSWORD_LENGTH: usize = 256;

/// Performs basic input sanitation to check for malicious or malformed usernames/passwords.
fn is_valid_input(input: &str, max_length: usize) -> bool {
    !input.trim().is_empty() && input.len() <= max_length && !input.contains(['\r', '\n', '\0'])
}

/// Validates the format of a username.
///
/// Usernames double as storage directory names, so they must also pass the
/// storage identifier rules.
pub fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.contains(['@', '#', ',', '%']) || username.starts_with(char::is_numeric) {
        return Err(AuthError::InvalidUsername(username.to_string()));
    }

    validate_user_id(username).map_err(|_| AuthError::InvalidUsername(username.to_string()))
}

/// Validates the format of a password.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if !is_valid_input(password, MAX_PASSWORD_LENGTH) {
        return Err(AuthError::MalformedInput("Invalid password format".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_usernames() {
        for name in ["alice", "bob_2", "carol.d", "dave-e"] {
            assert!(validate_username(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_bad_usernames() {
        for name in ["", "1alice", "a@b", "a/b", "..", ".hidden", "a%2e"] {
            assert!(
                matches!(validate_username(name), Err(AuthError::InvalidUsername(_))),
                "{name}"
            );
        }
    }

    #[test]
    fn rejects_bad_passwords() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password("   ").is_err());
        assert!(validate_password("a\nb").is_err());
        assert!(validate_password(&"x".repeat(MAX_PASSWORD_LENGTH + 1)).is_err());
    }
}
