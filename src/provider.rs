//! Tunnel provider entry point
//!
//! The OS extension machinery calls `start_tunnel`/`stop_tunnel` with its
//! flat provider dictionary. [`LollipopProvider`] validates that dictionary
//! and forwards to the [`TunnelEngine`]; it keeps no state of its own.

use crate::client::{ConnectionState, EngineStatus, TunnelEngine};
use crate::config::{ProfileConfig, TunnelConfig};
use crate::error::Result;
use crate::transport::ChannelFactory;
use crate::tunnel::VirtualInterface;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Why the host is stopping the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    UserInitiated,
    ProviderFailed,
    NoNetwork,
    ConfigurationRemoved,
    Superseded,
    Sleep,
    Other(i32),
}

impl StopReason {
    /// Map the host's numeric reason code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => StopReason::UserInitiated,
            2 => StopReason::ProviderFailed,
            3 => StopReason::NoNetwork,
            6 => StopReason::ConfigurationRemoved,
            7 => StopReason::Superseded,
            15 => StopReason::Sleep,
            other => StopReason::Other(other),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::UserInitiated => f.write_str("user initiated"),
            StopReason::ProviderFailed => f.write_str("provider failed"),
            StopReason::NoNetwork => f.write_str("no network"),
            StopReason::ConfigurationRemoved => f.write_str("configuration removed"),
            StopReason::Superseded => f.write_str("superseded"),
            StopReason::Sleep => f.write_str("device sleep"),
            StopReason::Other(code) => write!(f, "reason {code}"),
        }
    }
}

/// Contract the hosting OS drives
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn start_tunnel(&self, options: &HashMap<String, String>) -> Result<()>;

    async fn stop_tunnel(&self, reason: StopReason);
}

/// Provider backed by a [`TunnelEngine`]
pub struct LollipopProvider {
    engine: TunnelEngine,
}

impl LollipopProvider {
    pub fn new(interface: Arc<dyn VirtualInterface>) -> Self {
        Self {
            engine: TunnelEngine::new(interface),
        }
    }

    pub fn with_factory(
        interface: Arc<dyn VirtualInterface>,
        factory: Arc<dyn ChannelFactory>,
    ) -> Self {
        Self {
            engine: TunnelEngine::with_factory(interface, factory),
        }
    }

    /// Start from an already-parsed profile (e.g. a TOML document)
    pub async fn start_profile(&self, profile: &ProfileConfig) -> Result<()> {
        let config = TunnelConfig::try_from(profile)?;
        self.engine.start(config).await
    }

    pub fn state(&self) -> ConnectionState {
        self.engine.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.engine.subscribe()
    }
}

#[async_trait]
impl TunnelProvider for LollipopProvider {
    async fn start_tunnel(&self, options: &HashMap<String, String>) -> Result<()> {
        let profile = ProfileConfig::from_provider_map(options)?;
        self.start_profile(&profile).await
    }

    async fn stop_tunnel(&self, reason: StopReason) {
        log::info!("Stopping tunnel: {reason}");
        self.engine.stop().await;
    }
}
