//! Configuration module for the Lollipop tunnel engine
//!
//! Two layers live here. [`ProfileConfig`] is the document the host stores
//! (TOML, or the flat provider dictionary handed over by the OS), where every
//! field may be absent. [`TunnelConfig`] is the validated, typed form the
//! engine runs on; converting one into the other is the only place absent or
//! malformed fields are detected.

use crate::error::{Result, TransportError};
use crate::protocol::endpoint::{Endpoint, Scheme};
use crate::protocol::Credentials;
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Transport strategy used to carry packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Persistent WebSocket, one binary message per packet
    Streaming,
    /// HTTPS request/response exchanges (`/recv` polls, `/send` posts)
    Polling,
}

impl TransportMode {
    /// Scheme used by this mode, secure or not
    pub fn scheme(self, secure: bool) -> Scheme {
        match (self, secure) {
            (TransportMode::Streaming, true) => Scheme::Wss,
            (TransportMode::Streaming, false) => Scheme::Ws,
            (TransportMode::Polling, true) => Scheme::Https,
            (TransportMode::Polling, false) => Scheme::Http,
        }
    }
}

impl FromStr for TransportMode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "streaming" | "streamingtunnel" | "websocket" | "ws" | "wss" => {
                Ok(TransportMode::Streaming)
            }
            "polling" | "pollingtunnel" | "https2" | "h2" | "http" | "https" => {
                Ok(TransportMode::Polling)
            }
            other => Err(TransportError::ConfigMissing(format!(
                "unknown transport mode '{other}'"
            ))),
        }
    }
}

/// Server configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server IPv4 or IPv6 literal
    pub address: Option<String>,
    /// Server port (1-65535)
    pub port: Option<i64>,
    /// Tunnel path on the server
    pub path: Option<String>,
    /// Transport strategy
    pub transport: Option<TransportMode>,
    /// Use TLS (`wss`/`https`); `false` selects `ws`/`http`
    #[serde(default = "default_true")]
    pub secure: bool,
    /// Verify server certificate
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    /// Additional PEM trust anchors, e.g. a self-signed concentrator
    pub ca_cert_path: Option<PathBuf>,
    /// PEM client certificate chain presented to the concentrator
    pub client_cert_path: Option<PathBuf>,
    /// PEM private key for `client_cert_path`
    pub client_key_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: None,
            path: None,
            transport: None,
            secure: true,
            verify_certificate: true,
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Virtual interface network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address assigned to the local end of the tunnel
    #[serde(default = "default_local_address")]
    pub local_address: String,
    /// Prefix length of the local address
    #[serde(default = "default_prefix_len")]
    pub prefix_len: u8,
    /// MTU value
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    /// Routes sent through the tunnel; empty means the default route
    #[serde(default)]
    pub routes: Vec<String>,
    /// DNS server addresses
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            local_address: default_local_address(),
            prefix_len: default_prefix_len(),
            mtu: default_mtu(),
            routes: Vec::new(),
            dns_servers: Vec::new(),
        }
    }
}

/// Reconnect policy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// A connection that lived this long resets the attempt counter
    #[serde(default = "default_stable_after_secs")]
    pub stable_after_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            stable_after_secs: default_stable_after_secs(),
        }
    }
}

/// Polling transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval between `/recv` polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Consecutive failed exchanges before the channel is declared closed
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Polls allowed per tick while responses keep carrying packets
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            failure_threshold: default_failure_threshold(),
            burst_limit: default_burst_limit(),
        }
    }
}

/// Operation timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
    #[serde(default = "default_settings_secs")]
    pub settings_secs: u64,
    /// Streaming keepalive ping interval
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    /// Streaming channel is declared dead after this long without any frame
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            request_secs: default_request_secs(),
            settings_secs: default_settings_secs(),
            keepalive_ms: default_keepalive_ms(),
            idle_ms: default_idle_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Stored VPN profile, as written by the configuration UI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProfileConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| TransportError::ConfigMissing(format!("Failed to read config file: {e}")))?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TransportError::ConfigMissing(format!("Failed to serialize config: {e}")))
    }

    /// Build a profile from the host's flat provider-configuration dictionary.
    ///
    /// Keys follow the host profile store: `serverIP` (or `serverAddress`),
    /// `port`, `path`, `username`, `password`, `scheme` and `transportMode`.
    /// Absent keys stay absent; [`TunnelConfig::try_from`] reports them.
    pub fn from_provider_map(map: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| map.get(key).map(|v| v.trim().to_string());

        let mut profile = ProfileConfig::default();
        profile.server.address = get("serverIP").or_else(|| get("serverAddress"));
        profile.server.path = get("path");
        profile.auth.username = get("username");
        profile.auth.password = map.get("password").cloned();

        if let Some(port) = get("port") {
            let port = port.parse::<i64>().map_err(|_| {
                TransportError::InvalidEndpoint(format!("port '{port}' is not a number"))
            })?;
            profile.server.port = Some(port);
        }

        let scheme = get("scheme").map(|s| s.to_ascii_lowercase());
        if let Some(ref scheme) = scheme {
            profile.server.secure = match scheme.as_str() {
                "wss" | "https" => true,
                "ws" | "http" => false,
                other => {
                    return Err(TransportError::InvalidEndpoint(format!(
                        "unsupported scheme '{other}'"
                    )))
                }
            };
        }

        profile.server.transport = match get("transportMode") {
            Some(mode) => Some(mode.parse()?),
            None => scheme
                .as_deref()
                .map(str::parse::<TransportMode>)
                .transpose()?,
        };

        if let Some(verify) = get("verifyCertificate") {
            profile.server.verify_certificate = !matches!(verify.as_str(), "false" | "0" | "no");
        }

        Ok(profile)
    }
}

impl FromStr for ProfileConfig {
    type Err = TransportError;

    fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(TransportError::from)
    }
}

/// TLS-related transport settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSecurity {
    pub secure: bool,
    pub verify_certificate: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
}


/// Validated interface addressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub local: Ipv4Net,
    pub mtu: u16,
    pub routes: Vec<IpNet>,
    pub dns_servers: Vec<IpAddr>,
}

/// Validated configuration for one connection.
///
/// Immutable for the lifetime of a connection attempt; the engine keeps its
/// own copy and reuses it unchanged across reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub server_address: IpAddr,
    pub port: u16,
    pub path: String,
    pub credentials: Credentials,
    pub transport_mode: TransportMode,
    pub security: TransportSecurity,
    pub network: NetworkSettings,
    pub reconnect: ReconnectConfig,
    pub polling: PollingConfig,
    pub timeouts: TimeoutConfig,
}

impl TunnelConfig {
    /// Build a configuration with default tuning.
    pub fn new(
        server_address: IpAddr,
        port: u16,
        path: &str,
        username: &str,
        password: &str,
        transport_mode: TransportMode,
    ) -> Result<Self> {
        let profile = ProfileConfig {
            server: ServerConfig {
                address: Some(server_address.to_string()),
                port: Some(i64::from(port)),
                path: Some(path.to_string()),
                transport: Some(transport_mode),
                ..ServerConfig::default()
            },
            auth: AuthConfig {
                username: Some(username.to_string()),
                password: Some(password.to_string()),
            },
            ..ProfileConfig::default()
        };
        TunnelConfig::try_from(&profile)
    }

    /// Endpoint for the configured transport
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::new(
            self.transport_mode.scheme(self.security.secure),
            &self.server_address.to_string(),
            self.port,
            &self.path,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_secs)
    }

    pub fn settings_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.settings_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.timeouts.keepalive_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.idle_ms)
    }
}

impl TryFrom<&ProfileConfig> for TunnelConfig {
    type Error = TransportError;

    fn try_from(profile: &ProfileConfig) -> Result<Self> {
        let server = &profile.server;

        let address = required(&server.address, "server.address")?;
        let server_address = address
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|_| {
                TransportError::InvalidEndpoint(format!(
                    "server address '{address}' is not an IPv4 or IPv6 literal"
                ))
            })?;

        let port = server
            .port
            .ok_or_else(|| TransportError::ConfigMissing("server.port".to_string()))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                TransportError::InvalidEndpoint(format!("port {port} is outside 1-65535"))
            })?;

        let path = required(&server.path, "server.path")?;
        let transport_mode = server
            .transport
            .ok_or_else(|| TransportError::ConfigMissing("server.transport".to_string()))?;

        let username = required(&profile.auth.username, "auth.username")?;
        let password = profile
            .auth
            .password
            .clone()
            .ok_or_else(|| TransportError::ConfigMissing("auth.password".to_string()))?;

        let config = TunnelConfig {
            server_address,
            port,
            path: path.trim().trim_matches('/').to_string(),
            credentials: Credentials::new(username, password),
            transport_mode,
            security: TransportSecurity {
                secure: server.secure,
                verify_certificate: server.verify_certificate,
                ca_cert_path: server.ca_cert_path.clone(),
                client_cert_path: server.client_cert_path.clone(),
                client_key_path: server.client_key_path.clone(),
            },
            network: validate_network(&profile.network)?,
            reconnect: profile.reconnect.clone(),
            polling: profile.polling.clone(),
            timeouts: profile.timeouts.clone(),
        };

        // Surface endpoint problems now rather than on the first connect
        config.endpoint()?;
        validate_tuning(&config)?;

        Ok(config)
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(TransportError::ConfigMissing(name.to_string())),
    }
}

fn validate_network(network: &NetworkConfig) -> Result<NetworkSettings> {
    let address = network.local_address.parse::<Ipv4Addr>().map_err(|_| {
        TransportError::ConfigMissing(format!(
            "invalid network.local_address '{}'",
            network.local_address
        ))
    })?;
    let local = Ipv4Net::new(address, network.prefix_len).map_err(|_| {
        TransportError::ConfigMissing(format!(
            "invalid network.prefix_len {}",
            network.prefix_len
        ))
    })?;

    if network.mtu < 576 || network.mtu > 9000 {
        return Err(TransportError::ConfigMissing(
            "MTU must be between 576 and 9000".to_string(),
        ));
    }

    let routes = if network.routes.is_empty() {
        let default_route = Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0)
            .map_err(|e| TransportError::ConfigMissing(format!("default route: {e}")))?;
        vec![IpNet::V4(default_route)]
    } else {
        network
            .routes
            .iter()
            .map(|r| {
                r.parse::<IpNet>().map_err(|_| {
                    TransportError::ConfigMissing(format!("invalid route '{r}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?
    };

    let dns_servers = network
        .dns_servers
        .iter()
        .map(|d| {
            d.parse::<IpAddr>()
                .map_err(|_| TransportError::ConfigMissing(format!("invalid DNS server '{d}'")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(NetworkSettings {
        local,
        mtu: network.mtu,
        routes,
        dns_servers,
    })
}

fn validate_tuning(config: &TunnelConfig) -> Result<()> {
    if config.polling.failure_threshold == 0 {
        return Err(TransportError::ConfigMissing(
            "polling.failure_threshold must be at least 1".to_string(),
        ));
    }
    if config.polling.interval_ms == 0 {
        return Err(TransportError::ConfigMissing(
            "polling.interval_ms must be positive".to_string(),
        ));
    }
    if config.reconnect.max_delay_ms < config.reconnect.initial_delay_ms {
        return Err(TransportError::ConfigMissing(
            "reconnect.max_delay_ms must not be below initial_delay_ms".to_string(),
        ));
    }
    if config.timeouts.connect_secs == 0
        || config.timeouts.request_secs == 0
        || config.timeouts.settings_secs == 0
    {
        return Err(TransportError::ConfigMissing(
            "timeouts must be positive".to_string(),
        ));
    }
    if config.timeouts.keepalive_ms == 0 || config.timeouts.idle_ms <= config.timeouts.keepalive_ms {
        return Err(TransportError::ConfigMissing(
            "timeouts.idle_ms must exceed a positive timeouts.keepalive_ms".to_string(),
        ));
    }
    if config.security.client_cert_path.is_some() != config.security.client_key_path.is_some() {
        return Err(TransportError::ConfigMissing(
            "server.client_cert_path and server.client_key_path go together".to_string(),
        ));
    }
    Ok(())
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_local_address() -> String {
    "10.99.0.2".to_string()
}

fn default_prefix_len() -> u8 {
    24
}

fn default_mtu() -> u16 {
    1500
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_stable_after_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_burst_limit() -> u32 {
    32
}

fn default_connect_secs() -> u64 {
    15
}

fn default_request_secs() -> u64 {
    10
}

fn default_settings_secs() -> u64 {
    10
}

fn default_keepalive_ms() -> u64 {
    15_000
}

fn default_idle_ms() -> u64 {
    45_000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
[server]
address = "203.0.113.10"
port = 443
path = "vpn"
transport = "streaming"

[auth]
username = "cucumber"
password = "potato"

[polling]
interval_ms = 250

[logging]
level = "debug"
"#;

    #[test]
    fn test_profile_parsing() {
        let profile = PROFILE.parse::<ProfileConfig>().expect("Failed to parse config");
        assert_eq!(profile.server.address.as_deref(), Some("203.0.113.10"));
        assert_eq!(profile.server.port, Some(443));
        assert_eq!(profile.server.transport, Some(TransportMode::Streaming));
        assert!(profile.server.secure);
        assert_eq!(profile.polling.interval_ms, 250);
        assert_eq!(profile.polling.failure_threshold, 3);
        assert_eq!(profile.logging.level, "debug");
    }

    #[test]
    fn test_tunnel_config_validation() {
        let profile = PROFILE.parse::<ProfileConfig>().unwrap();
        let config = TunnelConfig::try_from(&profile).unwrap();

        assert_eq!(config.server_address, "203.0.113.10".parse::<IpAddr>().unwrap());
        assert_eq!(config.port, 443);
        assert_eq!(config.credentials.username(), "cucumber");
        assert_eq!(config.endpoint().unwrap().url(), "wss://203.0.113.10:443/vpn");
        assert_eq!(config.network.local.to_string(), "10.99.0.2/24");
        assert_eq!(config.network.routes, vec!["0.0.0.0/0".parse::<IpNet>().unwrap()]);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        profile.auth.username = None;
        assert_eq!(
            TunnelConfig::try_from(&profile),
            Err(TransportError::ConfigMissing("auth.username".to_string()))
        );

        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        profile.server.transport = None;
        assert!(matches!(
            TunnelConfig::try_from(&profile),
            Err(TransportError::ConfigMissing(_))
        ));

        let profile = ProfileConfig::default();
        assert_eq!(
            TunnelConfig::try_from(&profile),
            Err(TransportError::ConfigMissing("server.address".to_string()))
        );
    }

    #[test]
    fn test_invalid_endpoint_fields() {
        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        profile.server.port = Some(70_000);
        assert!(matches!(
            TunnelConfig::try_from(&profile),
            Err(TransportError::InvalidEndpoint(_))
        ));

        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        profile.server.path = Some("/".to_string());
        assert!(matches!(
            TunnelConfig::try_from(&profile),
            Err(TransportError::InvalidEndpoint(_))
        ));

        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        profile.server.address = Some("vpn.example.com".to_string());
        assert!(matches!(
            TunnelConfig::try_from(&profile),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_client_identity_needs_both_halves() {
        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        profile.server.client_cert_path = Some("client.pem".into());
        assert!(matches!(
            TunnelConfig::try_from(&profile),
            Err(TransportError::ConfigMissing(_))
        ));

        profile.server.client_key_path = Some("client.key".into());
        let config = TunnelConfig::try_from(&profile).unwrap();
        assert_eq!(
            config.security.client_key_path.as_deref(),
            Some(std::path::Path::new("client.key"))
        );
    }

    #[test]
    fn test_keepalive_must_undercut_idle_timeout() {
        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        let config = TunnelConfig::try_from(&profile).unwrap();
        assert_eq!(config.keepalive_interval(), Duration::from_secs(15));
        assert_eq!(config.idle_timeout(), Duration::from_secs(45));

        profile.timeouts.idle_ms = profile.timeouts.keepalive_ms;
        assert!(matches!(
            TunnelConfig::try_from(&profile),
            Err(TransportError::ConfigMissing(_))
        ));
    }

    #[test]
    fn test_provider_map() {
        let map: HashMap<String, String> = [
            ("serverIP", "2001:db8::1"),
            ("port", "443"),
            ("path", "cucumber"),
            ("username", "cucumber"),
            ("password", "potato"),
            ("scheme", "https"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let profile = ProfileConfig::from_provider_map(&map).unwrap();
        let config = TunnelConfig::try_from(&profile).unwrap();
        assert_eq!(config.transport_mode, TransportMode::Polling);
        assert_eq!(
            config.endpoint().unwrap().url(),
            "https://[2001:db8::1]:443/cucumber"
        );
    }

    #[test]
    fn test_provider_map_rejects_bad_port() {
        let map: HashMap<String, String> = [("port", "https")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(matches!(
            ProfileConfig::from_provider_map(&map),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_transport_mode_aliases() {
        assert_eq!("StreamingTunnel".parse::<TransportMode>().unwrap(), TransportMode::Streaming);
        assert_eq!("wss".parse::<TransportMode>().unwrap(), TransportMode::Streaming);
        assert_eq!("PollingTunnel".parse::<TransportMode>().unwrap(), TransportMode::Polling);
        assert!("carrier-pigeon".parse::<TransportMode>().is_err());
    }

    #[test]
    fn test_config_file_round_trip() {
        let profile = PROFILE.parse::<ProfileConfig>().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.toml");
        fs::write(&path, profile.to_toml().unwrap()).unwrap();

        let loaded = ProfileConfig::from_file(&path).unwrap();
        assert_eq!(
            TunnelConfig::try_from(&loaded).unwrap(),
            TunnelConfig::try_from(&profile).unwrap()
        );
    }

    #[test]
    fn test_invalid_tuning_is_rejected() {
        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        profile.polling.failure_threshold = 0;
        assert!(TunnelConfig::try_from(&profile).is_err());

        let mut profile = PROFILE.parse::<ProfileConfig>().unwrap();
        profile.network.mtu = 100;
        assert!(TunnelConfig::try_from(&profile).is_err());
    }
}
