//! Connection state and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Hold per-connection bootstrap state (pipeline, guard, phase, outcome)
//! - Track active connections for graceful shutdown

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bootstrap::guard::{GuardState, HandshakeTimeoutGuard};
use crate::bootstrap::idle::ReadActivity;
use crate::net::listener::ListenerIdentity;
use crate::pipeline::{Pipeline, StageName};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    HandshakeTimeout,
    HandshakeFailed,
    BootstrapFailed,
    UpgradeFailed,
    IdleTimeout,
    PeerClosed,
    SessionDropped,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::HandshakeTimeout => "handshake_timeout",
            CloseReason::HandshakeFailed => "handshake_failed",
            CloseReason::BootstrapFailed => "bootstrap_failed",
            CloseReason::UpgradeFailed => "upgrade_failed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::SessionDropped => "session_dropped",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Connection phase for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Accepted, pipeline not yet assembled.
    Accepted,
    /// TLS handshake in progress.
    Handshaking,
    /// Plaintext available, WebSocket upgrade in progress.
    Upgrading,
    /// Upgrade done, frames flowing.
    Active,
    /// Terminal.
    Closed(CloseReason),
}

/// Terminal result of the TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Success,
    Failure(String),
    TimedOut,
}

/// Snapshot of a connection, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    pub stages: Vec<StageName>,
    pub guard: GuardState,
    pub outcome: Option<HandshakeOutcome>,
}

impl ConnectionStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Closed(_))
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.phase {
            ConnectionPhase::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Position of a stage in the published pipeline.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|stage| *stage == name)
    }
}

/// A connection being brought from raw bytes to a negotiated WebSocket.
///
/// Owned by exactly one driver task; every mutation of the pipeline happens
/// through `&mut Connection`.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    listener: ListenerIdentity,
    pub pipeline: Pipeline,
    pub guard: HandshakeTimeoutGuard,
    /// Reads on the raw transport, below TLS.
    raw_activity: ReadActivity,
    /// Frames received after the upgrade.
    app_activity: ReadActivity,
    phase: ConnectionPhase,
    outcome: Option<HandshakeOutcome>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        listener: ListenerIdentity,
        guard: HandshakeTimeoutGuard,
    ) -> Self {
        Self {
            id,
            peer,
            listener,
            pipeline: Pipeline::new(),
            guard,
            raw_activity: ReadActivity::new(),
            app_activity: ReadActivity::new(),
            phase: ConnectionPhase::Accepted,
            outcome: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn listener(&self) -> &ListenerIdentity {
        &self.listener
    }

    pub fn raw_activity(&self) -> &ReadActivity {
        &self.raw_activity
    }

    pub fn app_activity(&self) -> &ReadActivity {
        &self.app_activity
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn outcome(&self) -> Option<&HandshakeOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Closed(_))
    }

    /// Move to `phase`. Closed is terminal and is never left.
    pub fn set_phase(&mut self, phase: ConnectionPhase) {
        if !self.is_closed() {
            self.phase = phase;
        }
    }

    /// Record the handshake outcome. Returns false if one was already recorded.
    pub fn record_outcome(&mut self, outcome: HandshakeOutcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    /// Tear down every stage and mark the connection closed.
    ///
    /// Clearing the pipeline drops the guard timer and any in-flight
    /// negotiation, which releases the transport.
    pub fn close(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        self.pipeline.clear();
        self.phase = ConnectionPhase::Closed(reason);
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            phase: self.phase,
            stages: self.pipeline.names(),
            guard: self.guard.state(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `grace` elapses.
    /// Returns true if every connection closed in time.
    pub async fn wait_for_shutdown(&self, grace: Duration) -> bool {
        let drained = async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        let listener = ListenerIdentity::new("test", "127.0.0.1:0");
        Connection::new(
            ConnectionId::new(),
            "127.0.0.1:50000".parse().unwrap(),
            listener.clone(),
            HandshakeTimeoutGuard::new(Duration::ZERO, listener),
        )
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_wait_gives_up_after_grace() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();
        assert!(!tracker.wait_for_shutdown(Duration::from_secs(1)).await);
    }

    #[test]
    fn outcome_is_recorded_once() {
        let mut conn = connection();
        assert!(conn.record_outcome(HandshakeOutcome::Success));
        assert!(!conn.record_outcome(HandshakeOutcome::TimedOut));
        assert_eq!(conn.outcome(), Some(&HandshakeOutcome::Success));
    }

    #[test]
    fn closed_is_terminal() {
        let mut conn = connection();
        conn.set_phase(ConnectionPhase::Handshaking);
        conn.close(CloseReason::HandshakeTimeout);
        conn.set_phase(ConnectionPhase::Active);
        conn.close(CloseReason::PeerClosed);

        let status = conn.status();
        assert_eq!(status.close_reason(), Some(CloseReason::HandshakeTimeout));
        assert!(status.stages.is_empty());
    }
}
