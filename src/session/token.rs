//! Session tokens
//!
//! A token is `hex(id) "." hex(HMAC-SHA256(key, id))` where `id` is 32 bytes
//! from the system CSPRNG. New tokens are signed with the current key; keys
//! listed as previous are still accepted when verifying.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::SessionError;

const ID_LEN: usize = 32;

/// Signs and verifies session tokens
pub struct TokenSigner {
    current: hmac::Key,
    previous: Vec<hmac::Key>,
    rng: SystemRandom,
}

impl TokenSigner {
    pub fn new(secret_key: &str, previous_keys: &[String]) -> Self {
        Self {
            current: hmac::Key::new(hmac::HMAC_SHA256, secret_key.as_bytes()),
            previous: previous_keys
                .iter()
                .map(|k| hmac::Key::new(hmac::HMAC_SHA256, k.as_bytes()))
                .collect(),
            rng: SystemRandom::new(),
        }
    }

    /// Generates a fresh session id and its signed token.
    ///
    /// Returns `(id, token)`, both hex.
    pub fn issue(&self) -> Result<(String, String), SessionError> {
        let mut id = [0u8; ID_LEN];
        self.rng.fill(&mut id).map_err(|_| SessionError::Random)?;

        let tag = hmac::sign(&self.current, &id);
        let id_hex = hex::encode(id);
        let token = format!("{}.{}", id_hex, hex::encode(tag.as_ref()));
        Ok((id_hex, token))
    }

    /// Returns the session id carried by a correctly signed token.
    pub fn verify(&self, token: &str) -> Option<String> {
        let (id_hex, tag_hex) = token.split_once('.')?;
        let id = hex::decode(id_hex).ok()?;
        if id.len() != ID_LEN {
            return None;
        }
        let tag = hex::decode(tag_hex).ok()?;

        std::iter::once(&self.current)
            .chain(self.previous.iter())
            .any(|key| hmac::verify(key, &id, &tag).is_ok())
            .then(|| id_hex.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123";

    #[test]
    fn issued_tokens_verify() {
        let signer = TokenSigner::new(KEY, &[]);
        let (id, token) = signer.issue().unwrap();
        assert_eq!(signer.verify(&token), Some(id));
    }

    #[test]
    fn tokens_are_unique() {
        let signer = TokenSigner::new(KEY, &[]);
        let (a, _) = signer.issue().unwrap();
        let (b, _) = signer.issue().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_tokens_fail() {
        let signer = TokenSigner::new(KEY, &[]);
        let (_, token) = signer.issue().unwrap();

        let mut bytes = token.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert_eq!(signer.verify(&tampered), None);
        assert_eq!(signer.verify("garbage"), None);
        assert_eq!(signer.verify("abcd.ef"), None);
    }

    #[test]
    fn rotated_keys_still_verify() {
        let old = TokenSigner::new("old-secret-key-0000", &[]);
        let (id, token) = old.issue().unwrap();

        let rotated = TokenSigner::new(KEY, &["old-secret-key-0000".to_string()]);
        assert_eq!(rotated.verify(&token), Some(id));

        let dropped = TokenSigner::new(KEY, &[]);
        assert_eq!(dropped.verify(&token), None);
    }
}
