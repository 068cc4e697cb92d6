//! Bootstrap strategy per listener kind.

use std::time::Duration;

use crate::config::{ListenerConfig, ListenerKind};

/// Which bootstrap steps run for connections of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStrategy {
    /// No TLS: idle policy and WebSocket stage right away.
    Plain,
    /// Guard, TLS negotiation, then idle policy once the handshake is over.
    Secured { handshake_timeout: Duration },
}

impl BootstrapStrategy {
    pub fn for_listener(config: &ListenerConfig) -> Self {
        match config.kind {
            ListenerKind::Websocket => BootstrapStrategy::Plain,
            ListenerKind::TlsWebsocket => BootstrapStrategy::Secured {
                handshake_timeout: Duration::from_millis(config.handshake_timeout_ms()),
            },
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        match self {
            BootstrapStrategy::Plain => Duration::ZERO,
            BootstrapStrategy::Secured { handshake_timeout } => *handshake_timeout,
        }
    }
}
