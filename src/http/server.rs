//! Gateway server: accept loop for one listener.
//!
//! # Responsibilities
//! - Accept TCP connections within the listener's connection limit
//! - Spawn one [`ConnectionDriver`] per connection
//! - Track active connections and drain them on shutdown
//!
//! # Design Decisions
//! - The accept loop stops first; open connections get a grace period
//! - A failed accept is logged and retried, it does not stop the listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::bootstrap::{ConnectionDriver, PipelineAssembler};
use crate::config::TimeoutConfig;
use crate::http::websocket::WebSocketSession;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::{metrics, EventLog};

/// Accept loop and connection bookkeeping for one listener.
pub struct GatewayServer {
    listener: Listener,
    assembler: Arc<PipelineAssembler>,
    event_log: Arc<dyn EventLog>,
    sessions: mpsc::Sender<WebSocketSession>,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl GatewayServer {
    pub fn new(
        listener: Listener,
        assembler: Arc<PipelineAssembler>,
        event_log: Arc<dyn EventLog>,
        sessions: mpsc::Sender<WebSocketSession>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            listener,
            assembler,
            event_log,
            sessions,
            tracker: ConnectionTracker::new(),
            shutdown_grace: Duration::from_secs(timeouts.shutdown_grace_secs),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires, then wait for open
    /// connections to finish.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        tracing::info!(listener = %self.listener.identity(), "Gateway server starting");

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        self.spawn_connection(stream, peer, permit, &shutdown)
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(
                            listener = %self.listener.identity(),
                            error = %e,
                            "Accept failed"
                        );
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        tracing::info!(
            listener = %self.listener.identity(),
            active_connections = self.tracker.active_count(),
            "Stopped accepting, draining connections"
        );
        if !self.tracker.wait_for_shutdown(self.shutdown_grace).await {
            tracing::warn!(
                listener = %self.listener.identity(),
                remaining = self.tracker.active_count(),
                "Shutdown grace period elapsed with open connections"
            );
        }
        tracing::info!(listener = %self.listener.identity(), "Gateway server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        shutdown: &Shutdown,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        metrics::record_accepted(self.listener.identity());

        let guard = self.tracker.track();
        let (driver, _handle) = ConnectionDriver::new(
            Arc::clone(&self.assembler),
            guard.id(),
            peer,
            Arc::clone(&self.event_log),
            self.sessions.clone(),
        );
        let driver = driver.with_shutdown(shutdown.subscribe());

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            let _ = driver.run(Box::new(stream)).await;
        });
    }
}
