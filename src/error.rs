//! Error types and handling for the Lollipop tunnel engine

use thiserror::Error;

/// Main error type for tunnel operations
///
/// Every failure the engine can report resolves into one of these variants,
/// which the lifecycle manager publishes together with the resulting
/// connection state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A required configuration field is absent or unparsable
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    /// Server address, port and path do not form a well-formed endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Network or TLS failure while opening the transport
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The remote concentrator rejected the credentials
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// The host could not apply the virtual interface settings
    #[error("Failed to apply interface settings: {0}")]
    SettingsApplyFailed(String),

    /// The channel was closed, locally or by the remote side
    #[error("Channel closed: {reason}")]
    ChannelClosed { reason: String },

    /// Operation is not valid in the current connection state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl TransportError {
    /// Shorthand for building a [`TransportError::ChannelClosed`]
    pub fn closed(reason: impl Into<String>) -> Self {
        TransportError::ChannelClosed {
            reason: reason.into(),
        }
    }

    /// Whether the reconnect policy may recover from this error.
    ///
    /// Configuration, endpoint and settings failures are fatal to a start
    /// attempt; transport-level failures are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectFailed(_)
                | TransportError::AuthRejected(_)
                | TransportError::ChannelClosed { .. }
        )
    }
}

/// Result type alias for tunnel operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Helper trait for converting foreign errors into [`TransportError`]
pub trait IntoTransportError<T> {
    fn or_connect_failed(self, context: &str) -> Result<T>;
    fn or_channel_closed(self, context: &str) -> Result<T>;
}

impl<T, E> IntoTransportError<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_connect_failed(self, context: &str) -> Result<T> {
        self.map_err(|e| TransportError::ConnectFailed(format!("{context}: {e}")))
    }

    fn or_channel_closed(self, context: &str) -> Result<T> {
        self.map_err(|e| TransportError::closed(format!("{context}: {e}")))
    }
}

impl From<toml::de::Error> for TransportError {
    fn from(err: toml::de::Error) -> Self {
        TransportError::ConfigMissing(format!("TOML parsing error: {err}"))
    }
}

impl From<rustls::Error> for TransportError {
    fn from(err: rustls::Error) -> Self {
        TransportError::ConnectFailed(format!("TLS error: {err}"))
    }
}
