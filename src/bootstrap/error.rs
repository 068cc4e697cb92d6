//! Connection bootstrap errors.

use std::time::Duration;

use thiserror::Error;

use crate::bootstrap::guard::GuardError;
use crate::http::websocket::WebSocketUpgradeError;
use crate::net::connection::CloseReason;
use crate::net::handshake::{HandshakeFailure, NegotiatorError};
use crate::net::tls::TlsMaterialError;
use crate::pipeline::PipelineError;

/// Error type for a connection that did not reach, or left, the active phase.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("TLS handshake not finished within {}ms", timeout.as_millis())]
    HandshakeTimeout { timeout: Duration },

    #[error("TLS handshake failed: {0}")]
    HandshakeNegotiation(HandshakeFailure),

    #[error("Connection bootstrap failed: {0}")]
    BootstrapConfiguration(#[from] BootstrapConfigError),

    #[error(transparent)]
    WebSocketUpgrade(#[from] WebSocketUpgradeError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("connection closed before it was established: {}", .0.as_str())]
    Closed(CloseReason),
}

/// Synchronous bootstrap failures. The pipeline is left empty.
#[derive(Debug, Error)]
pub enum BootstrapConfigError {
    #[error("TLS material unavailable: {0}")]
    Material(#[from] TlsMaterialError),

    #[error("TLS negotiation could not be started: {0}")]
    Negotiator(#[from] NegotiatorError),

    #[error("listener has no TLS configuration")]
    MissingTls,
}
