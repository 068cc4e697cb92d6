//! Stage names. Unique per pipeline.

/// Reader-idle timer armed while the TLS handshake is pending.
pub const HANDSHAKE_IDLE_TIMER: &str = "handshake_idle_timer";

/// Closes the connection when the handshake idle timer fires.
pub const HANDSHAKE_TIMEOUT_HANDLER: &str = "handshake_timeout_handler";

/// TLS negotiation.
pub const TLS_HANDLER: &str = "tls_handler";

/// Reader-idle timer of the post-handshake idle policy.
pub const CONNECT_IDLE_TIMER: &str = "connect_idle_timer";

/// Closes idle negotiated connections.
pub const CONNECT_IDLE_HANDLER: &str = "connect_idle_handler";

/// HTTP upgrade to WebSocket.
pub const WEBSOCKET_UPGRADE_HANDLER: &str = "websocket_upgrade_handler";
