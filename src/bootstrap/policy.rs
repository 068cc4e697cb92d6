//! Post-handshake idle policy.
//!
//! Negotiated connections that go quiet for `timeouts.idle_ms` are closed.
//! The policy's stages sit directly in front of the WebSocket stage.

use std::time::Duration;

use crate::bootstrap::idle::{IdleEvent, IdleMode, IdleTimer, ReadActivity};
use crate::pipeline::{names, IdleAction, Pipeline, PipelineCommand, PipelineError, Stage};

/// Idle timeout applied to every negotiated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostHandshakeIdlePolicy {
    timeout: Duration,
}

impl PostHandshakeIdlePolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Install the idle timer and its handler. Fails with
    /// [`PipelineError::DuplicateStage`] if the policy is already installed.
    pub fn install(
        &self,
        pipeline: &mut Pipeline,
        activity: &ReadActivity,
    ) -> Result<(), PipelineError> {
        let timer = Stage::IdleTimer(IdleTimer::new(
            self.timeout,
            activity.clone(),
            IdleMode::OneShot,
        ));
        let handler = Stage::ConnectIdle(ConnectIdleHandler::new(self.timeout));

        let commands = [
            PipelineCommand::insert_before_or_last(
                pipeline,
                names::WEBSOCKET_UPGRADE_HANDLER,
                names::CONNECT_IDLE_TIMER,
                timer,
            ),
            PipelineCommand::insert_before_or_last(
                pipeline,
                names::WEBSOCKET_UPGRADE_HANDLER,
                names::CONNECT_IDLE_HANDLER,
                handler,
            ),
        ];
        pipeline.apply_all(commands)
    }
}

/// Stage closing negotiated connections that stay idle.
#[derive(Debug, Clone)]
pub struct ConnectIdleHandler {
    timeout: Duration,
}

impl ConnectIdleHandler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn on_idle(&self, _event: &IdleEvent) -> IdleAction {
        IdleAction::ConnectionIdle {
            timeout: self.timeout,
        }
    }
}
