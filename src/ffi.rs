//! C FFI Interface for the Lollipop tunnel engine
//!
//! The host app (Swift/Kotlin/C) owns the virtual interface and supplies it
//! as a set of callbacks. Outbound packets are pushed in with
//! `lollipop_provider_inject_packet`; inbound packets come back through
//! `write_packet`. Each handle owns its own tokio runtime.
//!
//! None of the blocking functions may be called from inside a callback.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_void, CStr, CString};
use std::io;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::client::ConnectionState;
use crate::config::{ProfileConfig, TunnelConfig};
use crate::error::TransportError;
use crate::protocol::Packet;
use crate::provider::{LollipopProvider, StopReason, TunnelProvider};
use crate::tunnel::{InterfaceSettings, MemoryInterface, VirtualInterface};

/// Packets the host may queue ahead of the uplink
const OUTBOUND_QUEUE: usize = 1024;

/// Error codes returned by C FFI functions
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LollipopError {
    Success = 0,
    ConfigMissing = 1,
    InvalidEndpoint = 2,
    ConnectFailed = 3,
    AuthRejected = 4,
    SettingsApplyFailed = 5,
    ChannelClosed = 6,
    InvalidState = 7,
    InvalidParameter = 8,
    QueueFull = 9,
    InternalError = 99,
}

impl From<&TransportError> for LollipopError {
    fn from(error: &TransportError) -> Self {
        match error {
            TransportError::ConfigMissing(_) => LollipopError::ConfigMissing,
            TransportError::InvalidEndpoint(_) => LollipopError::InvalidEndpoint,
            TransportError::ConnectFailed(_) => LollipopError::ConnectFailed,
            TransportError::AuthRejected(_) => LollipopError::AuthRejected,
            TransportError::SettingsApplyFailed(_) => LollipopError::SettingsApplyFailed,
            TransportError::ChannelClosed { .. } => LollipopError::ChannelClosed,
            TransportError::InvalidState(_) => LollipopError::InvalidState,
        }
    }
}

/// Connection state as seen from C
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LollipopState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Disconnecting = 4,
    Failed = 5,
}

impl From<ConnectionState> for LollipopState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Idle => LollipopState::Idle,
            ConnectionState::Connecting => LollipopState::Connecting,
            ConnectionState::Connected => LollipopState::Connected,
            ConnectionState::Reconnecting => LollipopState::Reconnecting,
            ConnectionState::Disconnecting => LollipopState::Disconnecting,
            ConnectionState::Failed => LollipopState::Failed,
        }
    }
}

/// Interface settings handed to `apply_settings`.
///
/// Strings are NUL-terminated and only valid during the callback. `routes`
/// and `dns_servers` are comma-separated.
#[repr(C)]
pub struct LollipopInterfaceSettings {
    pub remote_address: *const c_char,
    pub local_address: *const c_char,
    pub subnet_mask: *const c_char,
    pub routes: *const c_char,
    pub dns_servers: *const c_char,
    pub mtu: u16,
}

/// Apply interface settings. Return `true` on success.
pub type ApplySettingsCallback =
    Option<extern "C" fn(context: *mut c_void, settings: *const LollipopInterfaceSettings) -> bool>;

/// Inject one inbound packet into the OS. The buffer is only valid during
/// the call.
pub type WritePacketCallback =
    Option<extern "C" fn(context: *mut c_void, data: *const u8, len: usize)>;

/// State change notification; `message` may be null.
pub type StateChangedCallback =
    Option<extern "C" fn(context: *mut c_void, state: LollipopState, message: *const c_char)>;

/// Collection of host callbacks.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LollipopCallbacks {
    /// User context pointer passed to all callbacks.
    pub context: *mut c_void,
    pub apply_settings: ApplySettingsCallback,
    pub write_packet: WritePacketCallback,
    pub on_state_changed: StateChangedCallback,
}

// The host guarantees its callbacks and context are thread-safe
unsafe impl Send for LollipopCallbacks {}
unsafe impl Sync for LollipopCallbacks {}

/// [`VirtualInterface`] backed by host callbacks
struct CallbackInterface {
    queue: Arc<MemoryInterface>,
    callbacks: LollipopCallbacks,
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn c_string(value: String) -> Result<CString, String> {
    CString::new(value).map_err(|e| format!("interior NUL in settings: {e}"))
}

#[async_trait]
impl VirtualInterface for CallbackInterface {
    async fn apply_settings(&self, settings: &InterfaceSettings) -> Result<(), String> {
        let Some(apply) = self.callbacks.apply_settings else {
            return Ok(());
        };

        let remote = c_string(settings.remote_address.to_string())?;
        let local = c_string(settings.assigned_local_address.to_string())?;
        let mask = c_string(settings.subnet_mask.to_string())?;
        let routes = c_string(join(&settings.routes))?;
        let dns = c_string(join(&settings.dns_servers))?;
        let raw = LollipopInterfaceSettings {
            remote_address: remote.as_ptr(),
            local_address: local.as_ptr(),
            subnet_mask: mask.as_ptr(),
            routes: routes.as_ptr(),
            dns_servers: dns.as_ptr(),
            mtu: settings.mtu,
        };

        if apply(self.callbacks.context, &raw) {
            Ok(())
        } else {
            Err("host rejected interface settings".to_string())
        }
    }

    async fn read_packets(&self) -> io::Result<Vec<Packet>> {
        self.queue.read_packets().await
    }

    async fn write_packets(&self, packets: Vec<Packet>) -> io::Result<()> {
        let Some(write) = self.callbacks.write_packet else {
            return Ok(());
        };
        for packet in packets {
            write(self.callbacks.context, packet.as_ptr(), packet.len());
        }
        Ok(())
    }
}

/// Opaque provider handle
pub struct LollipopHandle {
    runtime: Runtime,
    provider: LollipopProvider,
    outbound: mpsc::Sender<Packet>,
}

fn notify_state(callbacks: &LollipopCallbacks, state: ConnectionState, message: Option<&str>) {
    let Some(notify) = callbacks.on_state_changed else {
        return;
    };
    let message = message.and_then(|m| CString::new(m).ok());
    let message_ptr = message.as_ref().map_or(ptr::null(), |m| m.as_ptr());
    notify(callbacks.context, state.into(), message_ptr);
}

unsafe fn copy_error(message: &str, buffer: *mut c_char, buffer_len: usize) {
    if buffer.is_null() || buffer_len == 0 {
        return;
    }
    let message = CString::new(message).unwrap_or_default();
    let bytes = message.as_bytes();
    let copy_len = std::cmp::min(bytes.len(), buffer_len - 1);

    ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buffer, copy_len);
    *buffer.add(copy_len) = 0; // Null terminate
}

/// Write `error` into the caller's buffer and map it to its code
unsafe fn report(error: &TransportError, buffer: *mut c_char, buffer_len: usize) -> c_int {
    copy_error(&error.to_string(), buffer, buffer_len);
    LollipopError::from(error) as c_int
}

/// Parse and validate a tunnel profile
///
/// # Parameters
/// - `config_str`: TOML profile string
/// - `error_msg`: Output buffer for error messages (nullable)
/// - `error_msg_len`: Size of error message buffer
///
/// # Returns
/// - 0 on success
/// - Error code on failure
#[no_mangle]
pub unsafe extern "C" fn lollipop_parse_config(
    config_str: *const c_char,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> c_int {
    if config_str.is_null() {
        return LollipopError::InvalidParameter as c_int;
    }
    let Ok(config_str) = CStr::from_ptr(config_str).to_str() else {
        return LollipopError::InvalidParameter as c_int;
    };

    let validated = config_str
        .parse::<ProfileConfig>()
        .and_then(|profile| TunnelConfig::try_from(&profile));
    match validated {
        Ok(_) => LollipopError::Success as c_int,
        Err(err) => report(&err, error_msg, error_msg_len),
    }
}

/// Create a provider bound to the host's interface callbacks
///
/// # Parameters
/// - `callbacks`: Host callbacks, copied by value
///
/// # Returns
/// - Opaque provider handle on success
/// - NULL on failure
#[no_mangle]
pub unsafe extern "C" fn lollipop_provider_new(
    callbacks: *const LollipopCallbacks,
) -> *mut LollipopHandle {
    if callbacks.is_null() {
        return ptr::null_mut();
    }
    let callbacks = *callbacks;

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("lollipop-tunnel")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to create runtime: {e}");
            return ptr::null_mut();
        }
    };

    let (queue, handle) = MemoryInterface::new(OUTBOUND_QUEUE);
    let (outbound, _delivered) = handle.into_parts();
    let interface = Arc::new(CallbackInterface { queue, callbacks });

    let provider = {
        let _guard = runtime.enter();
        LollipopProvider::new(interface)
    };

    let mut status = provider.subscribe();
    runtime.spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            notify_state(&callbacks, current.state, current.message.as_deref());
        }
    });

    Box::into_raw(Box::new(LollipopHandle {
        runtime,
        provider,
        outbound,
    }))
}

/// Start the tunnel and wait for the first connection attempt
///
/// # Parameters
/// - `handle`: Provider handle from lollipop_provider_new
/// - `config_str`: TOML profile string
/// - `error_msg`: Output buffer for error messages (nullable)
/// - `error_msg_len`: Size of error message buffer
///
/// # Returns
/// - 0 once connected
/// - Error code on failure
#[no_mangle]
pub unsafe extern "C" fn lollipop_provider_start(
    handle: *mut LollipopHandle,
    config_str: *const c_char,
    error_msg: *mut c_char,
    error_msg_len: usize,
) -> c_int {
    if handle.is_null() || config_str.is_null() {
        return LollipopError::InvalidParameter as c_int;
    }
    let handle = &*handle;
    let Ok(config_str) = CStr::from_ptr(config_str).to_str() else {
        return LollipopError::InvalidParameter as c_int;
    };

    let profile = match config_str.parse::<ProfileConfig>() {
        Ok(profile) => profile,
        Err(err) => return report(&err, error_msg, error_msg_len),
    };
    crate::logging::init(&profile.logging);

    match handle.runtime.block_on(handle.provider.start_profile(&profile)) {
        Ok(()) => LollipopError::Success as c_int,
        Err(err) => report(&err, error_msg, error_msg_len),
    }
}

/// Stop the tunnel. Safe to call repeatedly.
#[no_mangle]
pub unsafe extern "C" fn lollipop_provider_stop(handle: *mut LollipopHandle) -> c_int {
    if handle.is_null() {
        return LollipopError::InvalidParameter as c_int;
    }
    let handle = &*handle;
    handle
        .runtime
        .block_on(handle.provider.stop_tunnel(StopReason::UserInitiated));
    LollipopError::Success as c_int
}

/// Get connection state
///
/// # Returns
/// - A `LollipopState` value
/// - -1 for a null handle
#[no_mangle]
pub unsafe extern "C" fn lollipop_provider_state(handle: *const LollipopHandle) -> c_int {
    if handle.is_null() {
        return -1;
    }
    LollipopState::from((*handle).provider.state()) as c_int
}

/// Queue one outbound packet read from the OS
///
/// # Returns
/// - 0 when queued
/// - `QueueFull` when the uplink is behind; the packet is not queued
#[no_mangle]
pub unsafe extern "C" fn lollipop_provider_inject_packet(
    handle: *mut LollipopHandle,
    data: *const u8,
    len: usize,
) -> c_int {
    if handle.is_null() || data.is_null() || len == 0 {
        return LollipopError::InvalidParameter as c_int;
    }
    let handle = &*handle;
    let packet = Bytes::copy_from_slice(std::slice::from_raw_parts(data, len));

    match handle.outbound.try_send(packet) {
        Ok(()) => LollipopError::Success as c_int,
        Err(mpsc::error::TrySendError::Full(_)) => LollipopError::QueueFull as c_int,
        Err(mpsc::error::TrySendError::Closed(_)) => LollipopError::InternalError as c_int,
    }
}

/// Stop the tunnel and free the handle
#[no_mangle]
pub unsafe extern "C" fn lollipop_provider_free(handle: *mut LollipopHandle) {
    if handle.is_null() {
        return;
    }
    let handle = Box::from_raw(handle);
    handle
        .runtime
        .block_on(handle.provider.stop_tunnel(StopReason::ConfigurationRemoved));
    drop(handle);
}

/// Get library version
///
/// # Returns
/// - Version string (caller must not free)
#[no_mangle]
pub extern "C" fn lollipop_version() -> *const c_char {
    static VERSION_CSTR: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION_CSTR.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
[server]
address = "127.0.0.1"
port = 9
path = "vpn"
transport = "streaming"
secure = false

[auth]
username = "lollipop"
password = "x"

[reconnect]
max_attempts = 0

[timeouts]
connect_secs = 1
"#;

    fn no_callbacks() -> LollipopCallbacks {
        LollipopCallbacks {
            context: ptr::null_mut(),
            apply_settings: None,
            write_packet: None,
            on_state_changed: None,
        }
    }

    #[test]
    fn test_parse_config() {
        let config = CString::new(PROFILE).unwrap();
        let mut error = [0 as c_char; 128];
        let rc = unsafe { lollipop_parse_config(config.as_ptr(), error.as_mut_ptr(), error.len()) };
        assert_eq!(rc, LollipopError::Success as c_int);

        let config = CString::new("[server]\naddress = \"127.0.0.1\"").unwrap();
        let rc = unsafe { lollipop_parse_config(config.as_ptr(), error.as_mut_ptr(), error.len()) };
        assert_eq!(rc, LollipopError::ConfigMissing as c_int);
        let message = unsafe { CStr::from_ptr(error.as_ptr()) }.to_str().unwrap();
        assert_eq!(message, "Configuration missing: server.port");

        let rc = unsafe { lollipop_parse_config(ptr::null(), ptr::null_mut(), 0) };
        assert_eq!(rc, LollipopError::InvalidParameter as c_int);
    }

    #[test]
    fn test_error_message_is_truncated() {
        let mut error = [1 as c_char; 8];
        unsafe { copy_error("Connection failed: refused", error.as_mut_ptr(), error.len()) };
        let message = unsafe { CStr::from_ptr(error.as_ptr()) }.to_str().unwrap();
        assert_eq!(message, "Connect");
    }

    #[test]
    fn test_provider_lifecycle() {
        let callbacks = no_callbacks();
        let handle = unsafe { lollipop_provider_new(&callbacks) };
        assert!(!handle.is_null());
        assert_eq!(unsafe { lollipop_provider_state(handle) }, LollipopState::Idle as c_int);

        let packet = [0x45u8, 0, 0, 20];
        let rc = unsafe { lollipop_provider_inject_packet(handle, packet.as_ptr(), packet.len()) };
        assert_eq!(rc, LollipopError::Success as c_int);

        // Nothing listens on port 9
        let config = CString::new(PROFILE).unwrap();
        let mut error = [0 as c_char; 256];
        let rc = unsafe {
            lollipop_provider_start(handle, config.as_ptr(), error.as_mut_ptr(), error.len())
        };
        assert_eq!(rc, LollipopError::ConnectFailed as c_int);
        let message = unsafe { CStr::from_ptr(error.as_ptr()) }.to_str().unwrap();
        assert!(message.starts_with("Connection failed"), "{message}");
        assert_eq!(unsafe { lollipop_provider_state(handle) }, LollipopState::Failed as c_int);

        assert_eq!(unsafe { lollipop_provider_stop(handle) }, LollipopError::Success as c_int);
        assert_eq!(unsafe { lollipop_provider_state(handle) }, LollipopState::Idle as c_int);
        unsafe { lollipop_provider_free(handle) };
    }

    #[test]
    fn test_null_handles() {
        unsafe {
            assert_eq!(lollipop_provider_state(ptr::null()), -1);
            assert_eq!(
                lollipop_provider_stop(ptr::null_mut()),
                LollipopError::InvalidParameter as c_int
            );
            assert!(lollipop_provider_new(ptr::null()).is_null());
            lollipop_provider_free(ptr::null_mut());
        }
    }

    #[test]
    fn test_version() {
        let version = unsafe { CStr::from_ptr(lollipop_version()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }
}
