//! Virtual interface boundary
//!
//! The engine never creates an OS device itself. The host hands it something
//! implementing [`VirtualInterface`]: a place to apply addressing and a
//! concurrent packet source and sink. Everything behind that trait (utun,
//! NEPacketTunnelFlow, a test queue) is outside this crate's concern.

use crate::config::TunnelConfig;
use crate::protocol::Packet;
use async_trait::async_trait;
use ipnet::IpNet;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

pub mod memory;
pub(crate) mod relay;

pub use memory::{InterfaceHandle, MemoryInterface};

/// Addressing applied to the virtual interface before any transport I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSettings {
    /// Tunnel remote address, i.e. the concentrator
    pub remote_address: IpAddr,
    pub assigned_local_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    /// Routes redirected into the tunnel; `0.0.0.0/0` is full-tunnel
    pub routes: Vec<IpNet>,
    pub mtu: u16,
    pub dns_servers: Vec<IpAddr>,
}

impl InterfaceSettings {
    /// Settings for one connection attempt
    pub fn from_config(config: &TunnelConfig) -> Self {
        let network = &config.network;
        Self {
            remote_address: config.server_address,
            assigned_local_address: network.local.addr(),
            subnet_mask: network.local.netmask(),
            routes: network.routes.clone(),
            mtu: network.mtu,
            dns_servers: network.dns_servers.clone(),
        }
    }

    /// Whether the default route is among the tunnel routes
    pub fn is_full_tunnel(&self) -> bool {
        self.routes.iter().any(|r| r.prefix_len() == 0)
    }
}

impl fmt::Display for InterfaceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "local {} mask {} remote {} mtu {} routes [{}]",
            self.assigned_local_address,
            self.subnet_mask,
            self.remote_address,
            self.mtu,
            self.routes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// Packet source and sink provided by the host.
///
/// Reads and writes are issued from different tasks at the same time, so
/// implementations must not serialise one behind the other.
#[async_trait]
pub trait VirtualInterface: Send + Sync + 'static {
    /// Apply addressing and routes. The error string is shown to the user.
    async fn apply_settings(&self, settings: &InterfaceSettings) -> Result<(), String>;

    /// Wait for the next outbound packets, oldest first. An error means the
    /// packet source is gone.
    ///
    /// Must be cancel safe: dropping the future loses no packets.
    async fn read_packets(&self) -> io::Result<Vec<Packet>>;

    /// Inject inbound packets into the OS stack, in order.
    async fn write_packets(&self, packets: Vec<Packet>) -> io::Result<()>;
}
