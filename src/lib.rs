//! Lollipop Tunnel - transport engine for the Lollipop personal VPN client
//!
//! Raw IP packets from a host-provided virtual interface are carried to a
//! remote concentrator over one of two transports that look like ordinary
//! web traffic, authenticated with HTTP Basic credentials.
//!
//! ## What This Library Provides
//! - Validated profile parsing (TOML or the host's provider dictionary)
//! - A streaming transport (one WebSocket binary message per packet)
//! - A polling transport (`GET {path}/recv` on an interval, `POST {path}/send`)
//! - The connection lifecycle: settings, open, relay, reconnect with backoff
//! - C FFI bindings for hosting inside a platform tunnel extension
//!
//! ## What The Host Must Provide
//! - The virtual interface itself ([`tunnel::VirtualInterface`])
//! - Calling `start`/`stop` from its extension lifecycle
//!
//! ```no_run
//! use lollipop_tunnel::{MemoryInterface, TransportMode, TunnelConfig, TunnelEngine};
//!
//! # async fn run() -> lollipop_tunnel::Result<()> {
//! let (interface, _packets) = MemoryInterface::new(256);
//! let engine = TunnelEngine::new(interface);
//! let config = TunnelConfig::new(
//!     "203.0.113.10".parse().unwrap(),
//!     443,
//!     "vpn",
//!     "lollipop",
//!     "secret",
//!     TransportMode::Streaming,
//! )?;
//! engine.start(config).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod provider;
pub mod reconnect;
pub mod transport;
pub mod tunnel;

// Re-export core types for the library interface
pub use client::{ConnectionState, EngineStatus, SessionInfo, TunnelEngine};
pub use config::{ProfileConfig, TransportMode, TunnelConfig};
pub use error::{Result, TransportError};
pub use protocol::{encode as encode_credentials, Credentials, Endpoint, Packet};
pub use provider::{LollipopProvider, StopReason, TunnelProvider};
pub use transport::{ChannelFactory, TransportSelector, TunnelChannel};
pub use tunnel::{InterfaceSettings, MemoryInterface, VirtualInterface};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// C FFI Interface for cross-platform integration
pub mod ffi;
