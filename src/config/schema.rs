//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::net::listener::ListenerIdentity;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener definitions. Each one gets its own accept loop.
    pub listeners: Vec<ListenerConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listeners: vec![ListenerConfig::default()],
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Kind of listener, selecting the bootstrap strategy for its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerKind {
    /// Plaintext WebSocket.
    Websocket,
    /// WebSocket over TLS.
    TlsWebsocket,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listener name, used as the listener identity in logs and audit events.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Listener kind.
    pub kind: ListenerKind,

    /// TLS configuration, required for `tls-websocket` listeners.
    pub tls: Option<TlsConfig>,

    /// WebSocket upgrade settings.
    pub websocket: WebsocketConfig,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    /// Identity of this listener for logging.
    pub fn identity(&self) -> ListenerIdentity {
        ListenerIdentity::new(&self.name, &self.bind_address)
    }

    /// Handshake timeout in milliseconds, `0` when the guard is disabled or
    /// the listener is not secured.
    pub fn handshake_timeout_ms(&self) -> u64 {
        match (&self.kind, &self.tls) {
            (ListenerKind::TlsWebsocket, Some(tls)) => tls.handshake_timeout_ms,
            _ => 0,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "websocket-listener".to_string(),
            bind_address: "0.0.0.0:8000".to_string(),
            kind: ListenerKind::Websocket,
            tls: None,
            websocket: WebsocketConfig::default(),
            max_connections: 10_000,
        }
    }
}

/// TLS protocol versions a listener may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TlsProtocol {
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

/// TLS configuration for a listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// Time a client has to complete the TLS handshake. `0` disables the limit.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Enabled protocol versions.
    #[serde(default = "default_tls_protocols")]
    pub protocols: Vec<TlsProtocol>,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_tls_protocols() -> Vec<TlsProtocol> {
    vec![TlsProtocol::Tls13, TlsProtocol::Tls12]
}

/// WebSocket upgrade configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebsocketConfig {
    /// Request path the upgrade is accepted on.
    pub path: String,

    /// Supported subprotocols, in server preference order for logging only;
    /// selection follows the client's order.
    pub subprotocols: Vec<String>,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            path: "/mqtt".to_string(),
            subprotocols: vec!["mqttv3.1".to_string(), "mqtt".to_string()],
        }
    }
}

/// Timeout configuration for negotiated connections and shutdown.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle timeout applied to every negotiated connection, in milliseconds.
    pub idle_ms: u64,

    /// How long shutdown waits for open connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_ms: 10_000,
            shutdown_grace_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
