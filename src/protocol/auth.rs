//! Credential handling for the tunnel transports

use base64::{engine::general_purpose, Engine};
use std::fmt;

/// Build the `Authorization` header value for `username:password`.
///
/// Total and deterministic: empty strings are valid input.
pub fn encode(username: &str, password: &str) -> String {
    let raw = format!("{username}:{password}");
    format!("Basic {}", general_purpose::STANDARD.encode(raw.as_bytes()))
}

/// Username/password pair used by both transports
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `Authorization` header value for these credentials
    pub fn header_value(&self) -> String {
        encode(&self.username, &self.password)
    }

    /// Identity sent in the polling client header
    pub fn client_id(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
