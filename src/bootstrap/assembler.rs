//! Per-connection pipeline assembly.
//!
//! # Responsibilities
//! - Arm the handshake timeout guard on secured listeners
//! - Start TLS negotiation over an activity-tracking transport
//! - Register the continuation that disarms the guard and installs the idle
//!   policy once the handshake is over
//! - Append the WebSocket upgrade stage
//!
//! # Design Decisions
//! - TLS material and the negotiation are obtained before the TLS stage is
//!   installed; if either fails the pipeline is left empty
//! - The strategy is picked once per listener, not per connection

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::bootstrap::error::{BootstrapConfigError, ConnectionError};
use crate::bootstrap::guard::HandshakeTimeoutGuard;
use crate::bootstrap::idle::{ActivityStream, ReadActivity};
use crate::bootstrap::policy::PostHandshakeIdlePolicy;
use crate::bootstrap::strategy::BootstrapStrategy;
use crate::config::{ListenerConfig, TimeoutConfig, TlsConfig};
use crate::http::websocket::WebSocketStageFactory;
use crate::net::connection::{Connection, ConnectionId, ConnectionPhase};
use crate::net::handshake::{HandshakeNegotiator, HandshakeResult, Negotiation};
use crate::net::listener::ListenerIdentity;
use crate::net::tls::TlsMaterialProvider;
use crate::net::BoxedIo;
use crate::pipeline::{names, Stage};

/// Runs once the handshake outcome is known, successful or not: disarm the
/// guard, then install the post-handshake idle policy.
#[derive(Debug)]
pub struct HandshakeContinuation {
    policy: PostHandshakeIdlePolicy,
}

impl HandshakeContinuation {
    pub fn new(policy: PostHandshakeIdlePolicy) -> Self {
        Self { policy }
    }

    pub fn run(self, connection: &mut Connection) -> Result<(), ConnectionError> {
        connection.guard.disarm(&mut connection.pipeline)?;
        let activity = connection.app_activity().clone();
        self.policy.install(&mut connection.pipeline, &activity)?;
        Ok(())
    }
}

/// Pipeline stage holding the in-flight TLS negotiation.
#[derive(Debug)]
pub struct TlsStage {
    negotiation: Negotiation,
    continuation: Option<HandshakeContinuation>,
}

impl TlsStage {
    pub fn new(negotiation: Negotiation, continuation: HandshakeContinuation) -> Self {
        Self {
            negotiation,
            continuation: Some(continuation),
        }
    }

    pub fn poll_outcome(&mut self, cx: &mut Context<'_>) -> Poll<HandshakeResult> {
        self.negotiation.poll_outcome(cx)
    }

    pub fn elapsed(&self) -> Duration {
        self.negotiation.elapsed()
    }

    pub fn is_complete(&self) -> bool {
        self.negotiation.is_complete()
    }

    /// The registered continuation. Yields it at most once.
    pub fn take_continuation(&mut self) -> Option<HandshakeContinuation> {
        self.continuation.take()
    }
}

/// Result of a successful bootstrap.
pub enum Bootstrapped {
    /// TLS negotiation is running; the driver waits for the pipeline events.
    Negotiating,
    /// No TLS: the transport is ready for the WebSocket upgrade.
    Plaintext(BoxedIo),
}

impl fmt::Debug for Bootstrapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bootstrapped::Negotiating => f.write_str("Negotiating"),
            Bootstrapped::Plaintext(_) => f.write_str("Plaintext"),
        }
    }
}

/// Builds connection pipelines for one listener.
pub struct PipelineAssembler {
    listener: ListenerIdentity,
    strategy: BootstrapStrategy,
    tls: Option<TlsConfig>,
    materials: Arc<dyn TlsMaterialProvider>,
    negotiator: Arc<dyn HandshakeNegotiator>,
    websocket: WebSocketStageFactory,
    idle_policy: PostHandshakeIdlePolicy,
}

impl PipelineAssembler {
    pub fn new(
        listener: &ListenerConfig,
        timeouts: &TimeoutConfig,
        materials: Arc<dyn TlsMaterialProvider>,
        negotiator: Arc<dyn HandshakeNegotiator>,
    ) -> Self {
        Self {
            listener: listener.identity(),
            strategy: BootstrapStrategy::for_listener(listener),
            tls: listener.tls.clone(),
            materials,
            negotiator,
            websocket: WebSocketStageFactory::new(&listener.websocket),
            idle_policy: PostHandshakeIdlePolicy::new(Duration::from_millis(timeouts.idle_ms)),
        }
    }

    pub fn listener(&self) -> &ListenerIdentity {
        &self.listener
    }

    pub fn strategy(&self) -> BootstrapStrategy {
        self.strategy
    }

    pub fn idle_policy(&self) -> &PostHandshakeIdlePolicy {
        &self.idle_policy
    }

    /// A fresh connection with an unarmed guard for this listener.
    pub fn new_connection(&self, id: ConnectionId, peer: SocketAddr) -> Connection {
        let guard =
            HandshakeTimeoutGuard::new(self.strategy.handshake_timeout(), self.listener.clone());
        Connection::new(id, peer, self.listener.clone(), guard)
    }

    /// Install the connection's initial stages.
    pub fn bootstrap(
        &self,
        connection: &mut Connection,
        io: BoxedIo,
    ) -> Result<Bootstrapped, ConnectionError> {
        match self.strategy {
            BootstrapStrategy::Plain => {
                connection.pipeline.add_last(
                    names::WEBSOCKET_UPGRADE_HANDLER,
                    Stage::WebSocketUpgrade(self.websocket.create()),
                )?;
                let activity = connection.app_activity().clone();
                self.idle_policy.install(&mut connection.pipeline, &activity)?;
                connection.set_phase(ConnectionPhase::Upgrading);
                Ok(Bootstrapped::Plaintext(io))
            }
            BootstrapStrategy::Secured { .. } => self.bootstrap_secured(connection, io),
        }
    }

    fn bootstrap_secured(
        &self,
        connection: &mut Connection,
        io: BoxedIo,
    ) -> Result<Bootstrapped, ConnectionError> {
        let raw_activity = connection.raw_activity().clone();
        connection.guard.arm(&mut connection.pipeline, &raw_activity)?;

        let negotiation = match self.start_negotiation(io, &raw_activity) {
            Ok(negotiation) => negotiation,
            Err(err) => {
                connection.guard.disarm(&mut connection.pipeline)?;
                connection.pipeline.clear();
                return Err(err.into());
            }
        };

        let continuation = HandshakeContinuation::new(self.idle_policy);
        connection
            .pipeline
            .add_last(names::TLS_HANDLER, Stage::Tls(TlsStage::new(negotiation, continuation)))?;
        connection.pipeline.add_last(
            names::WEBSOCKET_UPGRADE_HANDLER,
            Stage::WebSocketUpgrade(self.websocket.create()),
        )?;

        connection.set_phase(ConnectionPhase::Handshaking);
        Ok(Bootstrapped::Negotiating)
    }

    fn start_negotiation(
        &self,
        io: BoxedIo,
        raw_activity: &ReadActivity,
    ) -> Result<Negotiation, BootstrapConfigError> {
        let tls = self.tls.as_ref().ok_or(BootstrapConfigError::MissingTls)?;
        let material = self.materials.load(tls)?;
        let io: BoxedIo = Box::new(ActivityStream::new(io, raw_activity.clone()));
        Ok(self.negotiator.negotiate(io, &material)?)
    }
}
