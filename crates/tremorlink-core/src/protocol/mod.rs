//! Device Protocol Communication
//!
//! JSON-over-WebSocket protocol spoken by the haptic controller, plus the
//! connection manager that keeps a link to it alive.

pub mod commands;
mod connection;
mod error;
pub mod transport;

pub use commands::{DataFrame, DeviceCommand, DeviceMessage, OutboundMessage};
pub use connection::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStatus,
};
pub use error::ProtocolError;
pub use transport::{Connector, DeviceLink, LinkEvent, WebSocketConnector};

/// WebSocket port the controller firmware listens on
pub const DEFAULT_DEVICE_PORT: u16 = 81;

/// Close code used for intentional shutdowns
pub const NORMAL_CLOSURE: u16 = 1000;

/// A single attempt is abandoned after this long
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1500;

/// First reconnect delay. Kept short so a demo device is found quickly.
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 500;

/// Reconnect delay ceiling
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 3000;

/// Reconnect delay growth per failed attempt
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.2;

/// Keepalive ping period while connected
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;

/// Watchdog period
pub const DEFAULT_WATCHDOG_SECS: u64 = 5;

/// How long one outbound frame may take before the link is treated as dead
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 2000;

/// Hosts tried in order: mDNS name first, then known literal addresses
pub const DEFAULT_DEVICE_HOSTS: &[&str] = &["esp32.local", "172.20.10.7", "192.168.1.113"];

/// Default endpoint list built from [`DEFAULT_DEVICE_HOSTS`]
pub fn default_endpoints() -> Vec<String> {
    endpoints_for_hosts(DEFAULT_DEVICE_HOSTS, DEFAULT_DEVICE_PORT)
}

/// Build `ws://host:port` URLs, keeping entries that already carry a scheme
pub fn endpoints_for_hosts<S: AsRef<str>>(hosts: &[S], port: u16) -> Vec<String> {
    hosts
        .iter()
        .map(|h| h.as_ref().trim())
        .filter(|h| !h.is_empty())
        .map(|h| {
            if h.starts_with("ws://") || h.starts_with("wss://") {
                h.to_string()
            } else {
                format!("ws://{}:{}", h, port)
            }
        })
        .collect()
}
