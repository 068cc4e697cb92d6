//! Handshake timeout guard.
//!
//! While a TLS handshake is pending the guard keeps two stages in front of the
//! TLS stage: a one-shot reader-idle timer and the handler that turns its
//! event into a close request. The completion continuation disarms the guard
//! before anything else touches the pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::bootstrap::idle::{IdleEvent, IdleMode, IdleTimer, ReadActivity};
use crate::net::listener::ListenerIdentity;
use crate::pipeline::{names, IdleAction, Pipeline, PipelineCommand, PipelineError, Stage};

/// Lifecycle of the guard on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Unarmed,
    Armed,
    Disarmed,
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("handshake timeout guard is already armed")]
    AlreadyArmed,
    #[error("handshake timeout guard cannot be re-armed after it was disarmed")]
    AlreadyDisarmed,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Per-connection guard against clients that never finish the handshake.
#[derive(Debug)]
pub struct HandshakeTimeoutGuard {
    /// Zero disables the guard.
    timeout: Duration,
    listener: ListenerIdentity,
    state: GuardState,
}

impl HandshakeTimeoutGuard {
    pub fn new(timeout: Duration, listener: ListenerIdentity) -> Self {
        Self {
            timeout,
            listener,
            state: GuardState::Unarmed,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn listener(&self) -> &ListenerIdentity {
        &self.listener
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == GuardState::Armed
    }

    /// Install the idle timer and timeout handler ahead of the TLS stage.
    ///
    /// With a zero timeout this does nothing and the guard stays unarmed.
    pub fn arm(
        &mut self,
        pipeline: &mut Pipeline,
        activity: &ReadActivity,
    ) -> Result<(), GuardError> {
        match self.state {
            GuardState::Armed => return Err(GuardError::AlreadyArmed),
            GuardState::Disarmed => return Err(GuardError::AlreadyDisarmed),
            GuardState::Unarmed => {}
        }
        if self.timeout.is_zero() {
            return Ok(());
        }

        let timer = Stage::IdleTimer(IdleTimer::new(
            self.timeout,
            activity.clone(),
            IdleMode::OneShot,
        ));
        let handler = Stage::HandshakeTimeout(HandshakeTimeoutHandler::new(self.timeout));

        let first = PipelineCommand::insert_before_or_last(
            pipeline,
            names::TLS_HANDLER,
            names::HANDSHAKE_IDLE_TIMER,
            timer,
        );
        let second = PipelineCommand::insert_before_or_last(
            pipeline,
            names::TLS_HANDLER,
            names::HANDSHAKE_TIMEOUT_HANDLER,
            handler,
        );
        pipeline.apply_all([first, second])?;

        self.state = GuardState::Armed;
        tracing::trace!(
            listener = %self.listener,
            timeout_ms = self.timeout.as_millis() as u64,
            "Handshake timeout guard armed"
        );
        Ok(())
    }

    /// Remove the guard's stages. Safe to call when nothing is armed.
    pub fn disarm(&mut self, pipeline: &mut Pipeline) -> Result<(), GuardError> {
        pipeline.apply_all([
            PipelineCommand::RemoveIfPresent {
                name: names::HANDSHAKE_IDLE_TIMER,
            },
            PipelineCommand::RemoveIfPresent {
                name: names::HANDSHAKE_TIMEOUT_HANDLER,
            },
        ])?;

        if self.state == GuardState::Armed {
            self.state = GuardState::Disarmed;
            tracing::trace!(listener = %self.listener, "Handshake timeout guard disarmed");
        }
        Ok(())
    }
}

/// Stage reacting to the guard timer.
#[derive(Debug, Clone)]
pub struct HandshakeTimeoutHandler {
    timeout: Duration,
}

impl HandshakeTimeoutHandler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn on_idle(&self, _event: &IdleEvent) -> IdleAction {
        IdleAction::HandshakeTimedOut {
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::policy::ConnectIdleHandler;
    use crate::pipeline::PipelineEvent;

    fn guard(timeout_ms: u64) -> HandshakeTimeoutGuard {
        HandshakeTimeoutGuard::new(
            Duration::from_millis(timeout_ms),
            ListenerIdentity::new("tls-websocket-listener", "127.0.0.1:8443"),
        )
    }

    fn placeholder() -> Stage {
        Stage::ConnectIdle(ConnectIdleHandler::new(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn zero_timeout_is_a_no_op() {
        let mut guard = guard(0);
        let mut pipeline = Pipeline::new();

        guard.arm(&mut pipeline, &ReadActivity::new()).unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(guard.state(), GuardState::Unarmed);

        guard.disarm(&mut pipeline).unwrap();
        assert_eq!(guard.state(), GuardState::Unarmed);
    }

    #[tokio::test]
    async fn arms_in_front_of_tls_stage() {
        let mut guard = guard(5000);
        let mut pipeline = Pipeline::new();
        pipeline.add_last("first", placeholder()).unwrap();
        pipeline.add_last(names::TLS_HANDLER, placeholder()).unwrap();

        guard.arm(&mut pipeline, &ReadActivity::new()).unwrap();
        assert_eq!(
            pipeline.names(),
            vec![
                "first",
                names::HANDSHAKE_IDLE_TIMER,
                names::HANDSHAKE_TIMEOUT_HANDLER,
                names::TLS_HANDLER,
            ]
        );
        assert!(guard.is_armed());
    }

    #[tokio::test]
    async fn arm_twice_is_rejected() {
        let mut guard = guard(5000);
        let mut pipeline = Pipeline::new();
        let activity = ReadActivity::new();

        guard.arm(&mut pipeline, &activity).unwrap();
        assert!(matches!(guard.arm(&mut pipeline, &activity), Err(GuardError::AlreadyArmed)));

        guard.disarm(&mut pipeline).unwrap();
        assert!(matches!(guard.arm(&mut pipeline, &activity), Err(GuardError::AlreadyDisarmed)));
        assert!(pipeline.is_empty());
    }

    #[tokio::test]
    async fn disarm_is_idempotent() {
        let mut guard = guard(5000);
        let mut pipeline = Pipeline::new();

        guard.arm(&mut pipeline, &ReadActivity::new()).unwrap();
        guard.disarm(&mut pipeline).unwrap();
        guard.disarm(&mut pipeline).unwrap();

        assert!(pipeline.is_empty());
        assert_eq!(guard.state(), GuardState::Disarmed);
    }

    #[tokio::test(start_paused = true)]
    async fn armed_guard_requests_close_after_timeout() {
        let mut guard = guard(5000);
        let mut pipeline = Pipeline::new();
        guard.arm(&mut pipeline, &ReadActivity::new()).unwrap();

        let start = tokio::time::Instant::now();
        match pipeline.next_event().await {
            PipelineEvent::Idle { timer, action, .. } => {
                assert_eq!(timer, names::HANDSHAKE_IDLE_TIMER);
                assert_eq!(
                    action,
                    IdleAction::HandshakeTimedOut { timeout: Duration::from_millis(5000) }
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_guard_never_fires() {
        let mut guard = guard(1000);
        let mut pipeline = Pipeline::new();
        guard.arm(&mut pipeline, &ReadActivity::new()).unwrap();
        guard.disarm(&mut pipeline).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), pipeline.next_event()).await;
        assert!(event.is_err());
    }
}
