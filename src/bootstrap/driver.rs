//! Connection driver.
//!
//! One task per connection owns the [`Connection`] and processes its pipeline
//! events one at a time, so installing and removing stages never races.
//!
//! # Data Flow
//! ```text
//! accept → bootstrap (guard, tls, websocket stages)
//!        → wait for handshake outcome or guard timeout
//!        → continuation (disarm guard, install idle policy)
//!        → WebSocket upgrade
//!        → session hand-off, frame forwarding until close
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::bootstrap::assembler::{Bootstrapped, PipelineAssembler, TlsStage};
use crate::bootstrap::error::ConnectionError;
use crate::bootstrap::idle::ActivityStream;
use crate::http::websocket::{UpgradedStream, WebSocketSession};
use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{
    CloseReason, Connection, ConnectionId, ConnectionPhase, ConnectionStatus, HandshakeOutcome,
};
use crate::net::handshake::{HandshakeResult, NegotiatedStream, TlsSessionInfo};
use crate::net::BoxedIo;
use crate::observability::metrics;
use crate::observability::{AuditEvent, AuditEventKind, EventLog};
use crate::pipeline::{IdleAction, PipelineEvent};

/// Depth of the per-session frame channels.
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Observer side of a running connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Latest published status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status satisfies `predicate`, returning that status.
    /// Returns the last status if the driver is gone first.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ConnectionStatus) -> bool,
    ) -> ConnectionStatus {
        if let Ok(status) = self.status.wait_for(predicate).await {
            return status.clone();
        }
        self.status.borrow().clone()
    }

    pub async fn wait_closed(&mut self) -> ConnectionStatus {
        self.wait_for(ConnectionStatus::is_closed).await
    }
}

/// Drives one connection from accept to close.
pub struct ConnectionDriver {
    assembler: Arc<PipelineAssembler>,
    connection: Connection,
    event_log: Arc<dyn EventLog>,
    sessions: mpsc::Sender<WebSocketSession>,
    shutdown: Option<ShutdownSignal>,
    status: watch::Sender<ConnectionStatus>,
}

enum Interrupt<T> {
    Shutdown,
    Ready(T),
}

impl ConnectionDriver {
    pub fn new(
        assembler: Arc<PipelineAssembler>,
        id: ConnectionId,
        peer: SocketAddr,
        event_log: Arc<dyn EventLog>,
        sessions: mpsc::Sender<WebSocketSession>,
    ) -> (Self, ConnectionHandle) {
        let connection = assembler.new_connection(id, peer);
        let (status, rx) = watch::channel(connection.status());
        let driver = Self {
            assembler,
            connection,
            event_log,
            sessions,
            shutdown: None,
            status,
        };
        (driver, ConnectionHandle { id, status: rx })
    }

    /// Close the connection when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run the connection to completion.
    pub async fn run(mut self, io: BoxedIo) -> Result<(), ConnectionError> {
        let id = self.connection.id();
        let peer = self.connection.peer();
        let listener = self.connection.listener().clone();
        tracing::debug!(
            connection_id = %id,
            peer_addr = %peer,
            listener = %listener,
            "Connection accepted"
        );

        let result = self.drive(io).await;

        if !self.connection.is_closed() {
            let reason = match &result {
                Ok(()) => CloseReason::PeerClosed,
                Err(_) => CloseReason::BootstrapFailed,
            };
            self.close(reason);
        }
        if let Err(err) = &result {
            tracing::debug!(
                connection_id = %id,
                peer_addr = %peer,
                error = %err,
                "Connection ended with error"
            );
        }
        result
    }

    async fn drive(&mut self, io: BoxedIo) -> Result<(), ConnectionError> {
        let plaintext = match self.assembler.bootstrap(&mut self.connection, io) {
            Ok(Bootstrapped::Plaintext(io)) => NegotiatedStream { io, tls: None },
            Ok(Bootstrapped::Negotiating) => {
                self.publish();
                self.await_handshake().await?
            }
            Err(err) => {
                tracing::error!(
                    connection_id = %self.connection.id(),
                    listener = %self.connection.listener(),
                    error = %err,
                    "Connection bootstrap failed"
                );
                metrics::record_bootstrap_failure(self.connection.listener());
                self.close(CloseReason::BootstrapFailed);
                return Err(err);
            }
        };
        self.publish();

        let tls = plaintext.tls;
        let activity = self.connection.app_activity().clone();
        let io: BoxedIo = Box::new(ActivityStream::new(plaintext.io, activity));
        let Some(upgraded) = self.upgrade(io).await? else {
            return Ok(());
        };
        self.serve(upgraded, tls).await
    }

    /// Wait for the first of: handshake outcome, guard timeout, shutdown.
    async fn await_handshake(&mut self) -> Result<NegotiatedStream, ConnectionError> {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown_signal(&mut self.shutdown) => Interrupt::Shutdown,
                event = self.connection.pipeline.next_event() => Interrupt::Ready(event),
            };

            let event = match event {
                Interrupt::Shutdown => {
                    self.close(CloseReason::Shutdown);
                    return Err(ConnectionError::Closed(CloseReason::Shutdown));
                }
                Interrupt::Ready(event) => event,
            };

            match event {
                PipelineEvent::HandshakeCompleted { result, elapsed } => {
                    return self.complete_handshake(result, elapsed);
                }
                PipelineEvent::Idle {
                    action: IdleAction::HandshakeTimedOut { timeout },
                    ..
                } => {
                    if !self.connection.guard.is_armed() {
                        tracing::trace!(
                            connection_id = %self.connection.id(),
                            "Stale handshake timeout discarded"
                        );
                        continue;
                    }
                    // A handshake finishing on the deadline tick still wins.
                    tokio::task::yield_now().await;
                    if let Some(PipelineEvent::HandshakeCompleted { result, elapsed }) =
                        self.connection.pipeline.next_event().now_or_never()
                    {
                        return self.complete_handshake(result, elapsed);
                    }
                    self.connection.record_outcome(HandshakeOutcome::TimedOut);
                    self.audit(
                        AuditEventKind::HandshakeTimeout,
                        format!("TLS handshake not finished within {}ms", timeout.as_millis()),
                    );
                    metrics::record_handshake("timeout", timeout);
                    self.close(CloseReason::HandshakeTimeout);
                    return Err(ConnectionError::HandshakeTimeout { timeout });
                }
                PipelineEvent::Idle {
                    action: IdleAction::ConnectionIdle { .. },
                    ..
                } => {
                    self.close(CloseReason::IdleTimeout);
                    return Err(ConnectionError::Closed(CloseReason::IdleTimeout));
                }
            }
        }
    }

    /// Run the completion continuation and record the handshake outcome.
    fn complete_handshake(
        &mut self,
        result: HandshakeResult,
        elapsed: Duration,
    ) -> Result<NegotiatedStream, ConnectionError> {
        let continuation = self
            .connection
            .pipeline
            .tls_mut()
            .and_then(TlsStage::take_continuation);
        if let Some(continuation) = continuation {
            if let Err(err) = continuation.run(&mut self.connection) {
                self.close(CloseReason::BootstrapFailed);
                return Err(err);
            }
        }

        match result {
            Ok(stream) => {
                metrics::record_handshake("success", elapsed);
                self.connection.record_outcome(HandshakeOutcome::Success);
                self.connection.set_phase(ConnectionPhase::Upgrading);
                log_session(&self.connection, stream.tls.as_ref());
                Ok(stream)
            }
            Err(failure) => {
                metrics::record_handshake("failure", elapsed);
                let reason = failure.reason().to_string();
                self.connection
                    .record_outcome(HandshakeOutcome::Failure(reason.clone()));
                self.audit(AuditEventKind::HandshakeFailure, reason);
                self.close(CloseReason::HandshakeFailed);
                Err(ConnectionError::HandshakeNegotiation(failure))
            }
        }
    }

    /// Run the upgrade stage. `None` means the connection was closed by an
    /// idle event or shutdown while upgrading.
    async fn upgrade(&mut self, io: BoxedIo) -> Result<Option<UpgradedStream>, ConnectionError> {
        let Some(stage) = self.connection.pipeline.websocket().cloned() else {
            self.close(CloseReason::BootstrapFailed);
            return Ok(None);
        };

        let upgrade = stage.upgrade(io);
        tokio::pin!(upgrade);

        loop {
            tokio::select! {
                result = &mut upgrade => {
                    return match result {
                        Ok(upgraded) => {
                            self.connection.set_phase(ConnectionPhase::Active);
                            self.publish();
                            Ok(Some(upgraded))
                        }
                        Err(err) => {
                            self.close(CloseReason::UpgradeFailed);
                            Err(err.into())
                        }
                    };
                }
                _ = shutdown_signal(&mut self.shutdown) => {
                    self.close(CloseReason::Shutdown);
                    return Ok(None);
                }
                event = self.connection.pipeline.next_event() => {
                    if let PipelineEvent::Idle {
                        action: IdleAction::ConnectionIdle { timeout },
                        ..
                    } = event
                    {
                        tracing::debug!(
                            connection_id = %self.connection.id(),
                            timeout_ms = timeout.as_millis() as u64,
                            "Idle before WebSocket upgrade"
                        );
                        self.close(CloseReason::IdleTimeout);
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Hand the session to the application and forward frames until close.
    async fn serve(
        &mut self,
        upgraded: UpgradedStream,
        tls: Option<TlsSessionInfo>,
    ) -> Result<(), ConnectionError> {
        let UpgradedStream { mut ws, subprotocol } = upgraded;
        let (inbound_tx, inbound_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        let session = WebSocketSession {
            id: self.connection.id(),
            listener: self.connection.listener().clone(),
            peer: self.connection.peer(),
            tls,
            subprotocol,
            inbound: inbound_rx,
            outbound: outbound_tx,
        };
        if self.sessions.send(session).await.is_err() {
            let _ = ws.close(None).await;
            self.close(CloseReason::SessionDropped);
            return Ok(());
        }

        let reason = loop {
            let step = tokio::select! {
                _ = shutdown_signal(&mut self.shutdown) => Step::Close(CloseReason::Shutdown),
                event = self.connection.pipeline.next_event() => match event {
                    PipelineEvent::Idle { action: IdleAction::ConnectionIdle { .. }, .. } => {
                        Step::Close(CloseReason::IdleTimeout)
                    }
                    _ => Step::Continue,
                },
                frame = ws.next() => Step::Inbound(frame),
                message = outbound_rx.recv() => match message {
                    Some(message) => Step::Outbound(message),
                    None => Step::Close(CloseReason::SessionDropped),
                },
            };

            match step {
                Step::Continue => {}
                Step::Close(reason) => break reason,
                Step::Inbound(None) => break CloseReason::PeerClosed,
                Step::Inbound(Some(Err(err))) => {
                    tracing::debug!(
                        connection_id = %self.connection.id(),
                        error = %err,
                        "WebSocket read failed"
                    );
                    break CloseReason::PeerClosed;
                }
                Step::Inbound(Some(Ok(message))) => {
                    if message.is_close() {
                        break CloseReason::PeerClosed;
                    }
                    if message.is_ping() {
                        // Flush the queued pong.
                        let _ = ws.flush().await;
                        continue;
                    }
                    if !(message.is_text() || message.is_binary()) {
                        continue;
                    }
                    if inbound_tx.send(message).await.is_err() {
                        break CloseReason::SessionDropped;
                    }
                }
                Step::Outbound(message) => {
                    if let Err(err) = ws.send(message).await {
                        tracing::debug!(
                            connection_id = %self.connection.id(),
                            error = %err,
                            "WebSocket write failed"
                        );
                        break CloseReason::PeerClosed;
                    }
                }
            }
        };

        close_socket(&mut ws, reason).await;
        self.close(reason);
        Ok(())
    }

    fn audit(&self, kind: AuditEventKind, reason: String) {
        self.event_log.record(&AuditEvent {
            listener: self.connection.listener().clone(),
            kind,
            connection: self.connection.id(),
            peer: self.connection.peer(),
            reason,
        });
    }

    fn close(&mut self, reason: CloseReason) {
        if self.connection.is_closed() {
            return;
        }
        self.connection.close(reason);
        metrics::record_closed(reason);
        tracing::debug!(
            connection_id = %self.connection.id(),
            peer_addr = %self.connection.peer(),
            reason = reason.as_str(),
            "Connection closed"
        );
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(self.connection.status());
    }
}

enum Step {
    Continue,
    Close(CloseReason),
    Inbound(Option<Result<Message, tungstenite::Error>>),
    Outbound(Message),
}

async fn shutdown_signal(shutdown: &mut Option<ShutdownSignal>) {
    match shutdown {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}

async fn close_socket(ws: &mut WebSocketStream<BoxedIo>, reason: CloseReason) {
    if matches!(reason, CloseReason::PeerClosed) {
        return;
    }
    if let Err(err) = ws.close(None).await {
        tracing::trace!(error = %err, "Close frame not delivered");
    }
}

fn log_session(connection: &Connection, tls: Option<&TlsSessionInfo>) {
    let Some(tls) = tls else {
        return;
    };
    tracing::debug!(
        connection_id = %connection.id(),
        listener = %connection.listener(),
        protocol = tls.protocol.as_deref().unwrap_or("unknown"),
        cipher_suite = tls.cipher_suite.as_deref().unwrap_or("unknown"),
        server_name = tls.server_name.as_deref().unwrap_or(""),
        "TLS handshake complete"
    );
}
