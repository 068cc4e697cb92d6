//! WebSocket upgrade handling.
//!
//! # Responsibilities
//! - Accept the HTTP upgrade on the configured path only
//! - Select a subprotocol from the client's offer
//! - Hand the upgraded connection to the application as a [`WebSocketSession`]
//!
//! # Data Flow
//! ```text
//! Client ←── WebSocket frames ──→ Gateway ←── mpsc channels ──→ Application
//! ```
//!
//! # Design Decisions
//! - The upgrade stage is installed at bootstrap but only runs once plaintext
//!   is available
//! - Subprotocol selection follows the client's order
//! - Frame-level forwarding (no message buffering beyond the channels)

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::config::WebsocketConfig;
use crate::net::connection::ConnectionId;
use crate::net::handshake::TlsSessionInfo;
use crate::net::listener::ListenerIdentity;
use crate::net::BoxedIo;

/// Error type for the WebSocket upgrade.
#[derive(Debug, Error)]
pub enum WebSocketUpgradeError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Builds upgrade stages for one listener.
#[derive(Debug, Clone)]
pub struct WebSocketStageFactory {
    config: Arc<WebsocketConfig>,
}

impl WebSocketStageFactory {
    pub fn new(config: &WebsocketConfig) -> Self {
        Self {
            config: Arc::new(config.clone()),
        }
    }

    pub fn create(&self) -> WebSocketUpgradeStage {
        WebSocketUpgradeStage {
            config: Arc::clone(&self.config),
        }
    }
}

/// Pipeline stage performing the HTTP upgrade once plaintext is available.
#[derive(Debug, Clone)]
pub struct WebSocketUpgradeStage {
    config: Arc<WebsocketConfig>,
}

/// A completed upgrade.
pub struct UpgradedStream {
    pub ws: WebSocketStream<BoxedIo>,
    pub subprotocol: Option<String>,
}

impl WebSocketUpgradeStage {
    pub fn path(&self) -> &str {
        &self.config.path
    }

    pub fn subprotocols(&self) -> &[String] {
        &self.config.subprotocols
    }

    /// Pick the first client-offered protocol we support.
    pub fn select_subprotocol<'a>(
        &self,
        offered: impl IntoIterator<Item = &'a str>,
    ) -> Option<String> {
        offered
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .find(|candidate| self.config.subprotocols.iter().any(|s| s == candidate))
            .map(str::to_string)
    }

    /// Run the server side of the upgrade over `io`.
    pub async fn upgrade(&self, io: BoxedIo) -> Result<UpgradedStream, WebSocketUpgradeError> {
        let mut selected = None;

        let callback =
            |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                if request.uri().path() != self.config.path {
                    tracing::debug!(
                        path = %request.uri().path(),
                        expected = %self.config.path,
                        "WebSocket upgrade on unknown path"
                    );
                    let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    return Err(rejection);
                }

                let offered = request
                    .headers()
                    .get_all(SEC_WEBSOCKET_PROTOCOL)
                    .iter()
                    .filter_map(|value| value.to_str().ok());
                if let Some(protocol) = self.select_subprotocol(offered) {
                    if let Ok(value) = HeaderValue::from_str(&protocol) {
                        response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                        selected = Some(protocol);
                    }
                }
                Ok(response)
            };

        let ws = tokio_tungstenite::accept_hdr_async(io, callback).await?;
        Ok(UpgradedStream {
            ws,
            subprotocol: selected,
        })
    }
}

/// An upgraded connection handed to the application.
///
/// Dropping `inbound` or `outbound` ends the connection.
#[derive(Debug)]
pub struct WebSocketSession {
    pub id: ConnectionId,
    pub listener: ListenerIdentity,
    pub peer: SocketAddr,
    pub tls: Option<TlsSessionInfo>,
    pub subprotocol: Option<String>,
    pub inbound: mpsc::Receiver<Message>,
    pub outbound: mpsc::Sender<Message>,
}

impl WebSocketSession {
    /// Send every received data frame back to the peer.
    pub async fn echo(mut self) {
        while let Some(message) = self.inbound.recv().await {
            if self.outbound.send(message).await.is_err() {
                break;
            }
        }
        tracing::debug!(connection_id = %self.id, "Echo session finished");
    }
}
