//! Endpoint composition for the streaming and polling transports

use crate::error::{Result, TransportError};
use std::fmt;
use url::Url;

/// URL scheme of a tunnel endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Wss | Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated `{scheme}://{host}:{port}/{path}` endpoint.
///
/// The rendered form always carries the explicit port, even when it is the
/// scheme default, so it is kept as composed rather than round-tripped
/// through [`Url`] (which would elide `:443`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    /// Compose an endpoint, bracket-wrapping IPv6 literals.
    pub fn new(scheme: Scheme, host: &str, port: u16, path: &str) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(TransportError::InvalidEndpoint(
                "server address cannot be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(TransportError::InvalidEndpoint(
                "port must be between 1 and 65535".to_string(),
            ));
        }

        let path = path.trim().trim_matches('/');
        if path.is_empty() {
            return Err(TransportError::InvalidEndpoint(
                "path cannot be empty".to_string(),
            ));
        }
        if path.contains(|c: char| c.is_whitespace() || c == '?' || c == '#') {
            return Err(TransportError::InvalidEndpoint(format!(
                "path '{path}' contains characters not allowed in a path"
            )));
        }

        let endpoint = Self {
            scheme,
            host: bracket_host(host),
            port,
            path: path.to_string(),
        };

        Url::parse(&endpoint.url()).map_err(|e| {
            TransportError::InvalidEndpoint(format!("'{}' is not a valid URL: {e}", endpoint.url()))
        })?;

        Ok(endpoint)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host as it appears in the URL (IPv6 literals bracketed)
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Full endpoint URL
    pub fn url(&self) -> String {
        format!("{}://{}:{}/{}", self.scheme, self.host, self.port, self.path)
    }

    /// URL of a resource below the endpoint path, e.g. `{endpoint}/recv`
    pub fn resource(&self, name: &str) -> String {
        format!("{}/{}", self.url(), name)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

fn bracket_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}
