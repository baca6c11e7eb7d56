//! Lobby credentials
//!
//! The lobby never sees a plaintext password: it receives the base64 of the
//! MD5 digest.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};

/// Hash a plaintext password the way the lobby server expects it
pub fn encode_password(password: &str) -> String {
    let digest = Md5::digest(password.as_bytes());
    STANDARD.encode(digest)
}

/// Account credentials with the password already encoded
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
}

impl Credentials {
    /// Build credentials from a plaintext password
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        Self {
            username: username.into(),
            password_hash: encode_password(password),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

// Keep the hash out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_password_known_values() {
        assert_eq!(encode_password("password"), "X03MO1qnZdYdgyfeuILPmQ==");
        assert_eq!(encode_password("secret"), "Xr4ilOzQ4PCOq3aQ0qbuaQ==");
        assert_eq!(encode_password(""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_credentials_hash_on_construction() {
        let creds = Credentials::new("bot", "secret").with_email("bot@example.org");
        assert_eq!(creds.username, "bot");
        assert_eq!(creds.password_hash, "Xr4ilOzQ4PCOq3aQ0qbuaQ==");
        assert_eq!(creds.email.as_deref(), Some("bot@example.org"));
    }

    #[test]
    fn test_debug_redacts_hash() {
        let creds = Credentials::new("bot", "secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("bot"));
        assert!(!debug.contains("Xr4ilOzQ4PCOq3aQ0qbuaQ=="));
    }
}
