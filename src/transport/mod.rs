//! Tunnel transports
//!
//! Two structurally different channels sit behind [`TunnelChannel`]: a
//! persistent WebSocket ([`StreamingChannel`]) and HTTPS request/response
//! exchanges ([`PollingChannel`]). The [`TransportSelector`] picks one from a
//! validated [`TunnelConfig`] without performing any I/O.

use crate::config::{ProfileConfig, TransportMode, TunnelConfig};
use crate::error::Result;
use crate::protocol::{Endpoint, Packet};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod polling;
pub mod streaming;

pub use polling::PollingChannel;
pub use streaming::StreamingChannel;

/// Uniform capability set of a tunnel transport
#[async_trait]
pub trait TunnelChannel: Send + Sync {
    fn mode(&self) -> TransportMode;

    fn endpoint(&self) -> &Endpoint;

    /// Establish the transport. Fails with `ConnectFailed` or
    /// `AuthRejected`.
    async fn open(&self) -> Result<()>;

    /// Send one packet. Waits for room rather than dropping.
    async fn send(&self, packet: Packet) -> Result<()>;

    /// Deliver received packets to `sink` in arrival order until the channel
    /// closes. Returns `Ok` after a local close or when `sink` is dropped,
    /// and `ChannelClosed` when the remote side went away.
    async fn receive_loop(&self, sink: mpsc::Sender<Packet>) -> Result<()>;

    /// Orderly shutdown. Later `send`/`receive_loop` calls fail with
    /// `ChannelClosed`.
    async fn close(&self);

    fn stats(&self) -> &ChannelStats;
}

/// Per-channel traffic counters
#[derive(Debug, Default)]
pub struct ChannelStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
}

impl ChannelStats {
    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} packets ({} bytes), received {} packets ({} bytes)",
            self.packets_sent, self.bytes_sent, self.packets_received, self.bytes_received
        )
    }
}

/// Builds channels for the lifecycle manager
pub trait ChannelFactory: Send + Sync {
    fn select(&self, config: &TunnelConfig) -> Result<Arc<dyn TunnelChannel>>;
}

/// Default [`ChannelFactory`], choosing by `transport_mode`
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportSelector;

impl TransportSelector {
    pub fn new() -> Self {
        Self
    }

    /// Validate a stored profile and build its channel
    pub fn select_profile(&self, profile: &ProfileConfig) -> Result<Arc<dyn TunnelChannel>> {
        self.select(&TunnelConfig::try_from(profile)?)
    }
}

impl ChannelFactory for TransportSelector {
    fn select(&self, config: &TunnelConfig) -> Result<Arc<dyn TunnelChannel>> {
        let endpoint = config.endpoint()?;
        log::debug!("Selected {:?} transport for {}", config.transport_mode, endpoint);

        Ok(match config.transport_mode {
            TransportMode::Streaming => Arc::new(StreamingChannel::new(endpoint, config)),
            TransportMode::Polling => Arc::new(PollingChannel::new(endpoint, config)),
        })
    }
}
