//! Pipeline stages and the events they produce.

use std::fmt;
use std::time::Duration;

use crate::bootstrap::assembler::TlsStage;
use crate::bootstrap::guard::HandshakeTimeoutHandler;
use crate::bootstrap::idle::{IdleEvent, IdleTimer};
use crate::bootstrap::policy::ConnectIdleHandler;
use crate::http::websocket::WebSocketUpgradeStage;
use crate::net::handshake::HandshakeResult;

/// Name a stage is registered under.
pub type StageName = &'static str;

/// A unit of connection processing installed in a [`Pipeline`](super::Pipeline).
#[derive(Debug)]
pub enum Stage {
    /// Emits idle events to the stages after it.
    IdleTimer(IdleTimer),
    /// Consumes idle events while the handshake is pending.
    HandshakeTimeout(HandshakeTimeoutHandler),
    /// Consumes idle events on negotiated connections.
    ConnectIdle(ConnectIdleHandler),
    Tls(TlsStage),
    WebSocketUpgrade(WebSocketUpgradeStage),
}

impl Stage {
    /// React to an idle event raised by an earlier timer stage.
    /// `None` passes the event on to the next stage.
    pub fn on_idle(&self, event: &IdleEvent) -> Option<IdleAction> {
        match self {
            Stage::HandshakeTimeout(handler) => Some(handler.on_idle(event)),
            Stage::ConnectIdle(handler) => Some(handler.on_idle(event)),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Stage::IdleTimer(_) => "idle_timer",
            Stage::HandshakeTimeout(_) => "handshake_timeout",
            Stage::ConnectIdle(_) => "connect_idle",
            Stage::Tls(_) => "tls",
            Stage::WebSocketUpgrade(_) => "websocket_upgrade",
        }
    }
}

/// What an idle handler asks the connection driver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// The handshake did not finish within `timeout`.
    HandshakeTimedOut { timeout: Duration },
    /// A negotiated connection was idle for `timeout`.
    ConnectionIdle { timeout: Duration },
}

/// Next thing that happened on a pipeline.
pub enum PipelineEvent {
    HandshakeCompleted {
        result: HandshakeResult,
        elapsed: Duration,
    },
    Idle {
        timer: StageName,
        event: IdleEvent,
        action: IdleAction,
    },
}

impl fmt::Debug for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::HandshakeCompleted { result, elapsed } => f
                .debug_struct("HandshakeCompleted")
                .field("success", &result.is_ok())
                .field("elapsed", elapsed)
                .finish(),
            PipelineEvent::Idle { timer, event, action } => f
                .debug_struct("Idle")
                .field("timer", timer)
                .field("event", event)
                .field("action", action)
                .finish(),
        }
    }
}
