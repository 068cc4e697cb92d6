//! Audit events for failed handshakes.
//!
//! Operators grep these to find clients that connect and never finish (or
//! botch) the TLS handshake. Each event names the listener it happened on.

use std::fmt;
use std::net::SocketAddr;

use crate::net::connection::ConnectionId;
use crate::net::listener::ListenerIdentity;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    HandshakeTimeout,
    HandshakeFailure,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::HandshakeTimeout => "handshake_timeout",
            AuditEventKind::HandshakeFailure => "handshake_failure",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub listener: ListenerIdentity,
    pub kind: AuditEventKind,
    pub connection: ConnectionId,
    pub peer: SocketAddr,
    pub reason: String,
}

/// Sink for audit events.
pub trait EventLog: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Writes audit events as `tracing` events on the `event_log` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn record(&self, event: &AuditEvent) {
        tracing::debug!(
            target: "event_log",
            kind = %event.kind,
            listener = %event.listener,
            connection_id = %event.connection,
            peer_addr = %event.peer,
            reason = %event.reason,
            "Client connection rejected"
        );
    }
}
