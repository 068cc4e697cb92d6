//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics endpoint when enabled
//! - Load TLS material for secured listeners
//! - Bind every listener and build its pipeline assembler
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners bind last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::bootstrap::PipelineAssembler;
use crate::config::GatewayConfig;
use crate::http::{GatewayServer, WebSocketSession};
use crate::net::handshake::{HandshakeNegotiator, RustlsNegotiator};
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::{PemMaterialProvider, TlsMaterialError, TlsMaterialProvider};
use crate::observability::{metrics, EventLog};

/// Sessions waiting for the application before drivers block.
const SESSION_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("Listener '{listener}': {source}")]
    Tls {
        listener: String,
        #[source]
        source: TlsMaterialError,
    },
    #[error("Invalid metrics address: {0}")]
    MetricsAddress(String),
    #[error("Failed to start metrics endpoint: {0}")]
    Metrics(#[from] BuildError),
}

/// Everything needed to serve traffic.
pub struct Gateway {
    pub servers: Vec<GatewayServer>,
    /// Upgraded connections, from every listener.
    pub sessions: mpsc::Receiver<WebSocketSession>,
}

/// Bring the gateway up with the rustls handshake and PEM material from disk.
pub async fn start(
    config: &GatewayConfig,
    event_log: Arc<dyn EventLog>,
) -> Result<Gateway, StartupError> {
    start_with(
        config,
        event_log,
        Arc::new(PemMaterialProvider::new()),
        Arc::new(RustlsNegotiator),
    )
    .await
}

/// Bring the gateway up with the given TLS collaborators.
pub async fn start_with(
    config: &GatewayConfig,
    event_log: Arc<dyn EventLog>,
    materials: Arc<dyn TlsMaterialProvider>,
    negotiator: Arc<dyn HandshakeNegotiator>,
) -> Result<Gateway, StartupError> {
    let observability = &config.observability;
    if observability.metrics_enabled {
        let addr: SocketAddr = observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    for listener in &config.listeners {
        if let Some(tls) = listener.tls.as_ref() {
            materials.load(tls).map_err(|source| StartupError::Tls {
                listener: listener.name.clone(),
                source,
            })?;
        }
    }

    let (tx, rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);
    let mut servers = Vec::with_capacity(config.listeners.len());
    for listener_config in &config.listeners {
        let assembler = Arc::new(PipelineAssembler::new(
            listener_config,
            &config.timeouts,
            Arc::clone(&materials),
            Arc::clone(&negotiator),
        ));
        let listener = Listener::bind(listener_config).await?;
        servers.push(GatewayServer::new(
            listener,
            assembler,
            Arc::clone(&event_log),
            tx.clone(),
            &config.timeouts,
        ));
    }

    Ok(Gateway { servers, sessions: rx })
}
