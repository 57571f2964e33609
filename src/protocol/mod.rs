//! Wire-level pieces of the Lollipop tunnel protocol
//!
//! Everything here is pure: credential encoding, endpoint composition and the
//! polling batch codec. No module in this tree performs I/O.

use bytes::Bytes;

pub mod auth;
pub mod batch;
pub mod endpoint;

pub use auth::{encode, Credentials};
pub use endpoint::Endpoint;

/// One IP datagram, carried opaquely.
pub type Packet = Bytes;

// Protocol constants
pub mod constants {
    /// Header carrying the polling client identity
    pub const CLIENT_ID_HEADER: &str = "X-Client-Id";
    /// Downstream polling resource, relative to the tunnel path
    pub const RECV_SUFFIX: &str = "recv";
    /// Upstream send resource, relative to the tunnel path
    pub const SEND_SUFFIX: &str = "send";
    /// Single-packet body
    pub const OCTET_STREAM: &str = "application/octet-stream";
    /// Length-prefixed multi-packet body
    pub const BATCH_CONTENT_TYPE: &str = "application/x-lollipop-batch";
}

/// Render the first bytes of a packet for trace logging.
pub(crate) fn preview(packet: &[u8]) -> String {
    hex::encode(&packet[..packet.len().min(16)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates() {
        let packet = [0x45u8; 40];
        assert_eq!(preview(&packet).len(), 32);
        assert_eq!(preview(&[0x45, 0x00]), "4500");
    }
}
