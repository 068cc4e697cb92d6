//! TLS handshake negotiation.
//!
//! A [`HandshakeNegotiator`] turns a raw transport plus [`TlsMaterial`] into a
//! [`Negotiation`]: a handle whose outcome is delivered exactly once through a
//! oneshot channel. The handshake itself runs on its own task, so the
//! connection driver stays free to observe its idle timers while waiting.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;

use crate::net::tls::TlsMaterial;
use crate::net::BoxedIo;

/// Reason a handshake did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct HandshakeFailure {
    reason: String,
}

impl HandshakeFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Error constructing a negotiation object.
#[derive(Debug, Error)]
pub enum NegotiatorError {
    #[error("no async runtime available to drive the handshake")]
    NoRuntime,
    #[error("{0}")]
    Rejected(String),
}

/// Parameters of an established TLS session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSessionInfo {
    pub protocol: Option<String>,
    pub cipher_suite: Option<String>,
    pub server_name: Option<String>,
    pub alpn: Option<Vec<u8>>,
}

impl TlsSessionInfo {
    fn from_connection(conn: &rustls::ServerConnection) -> Self {
        Self {
            protocol: conn.protocol_version().map(|v| format!("{:?}", v)),
            cipher_suite: conn
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite())),
            server_name: conn.server_name().map(str::to_string),
            alpn: conn.alpn_protocol().map(<[u8]>::to_vec),
        }
    }
}

/// Plaintext transport produced by a successful handshake.
pub struct NegotiatedStream {
    pub io: BoxedIo,
    pub tls: Option<TlsSessionInfo>,
}

impl fmt::Debug for NegotiatedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedStream")
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

pub type HandshakeResult = Result<NegotiatedStream, HandshakeFailure>;

/// An in-flight handshake whose outcome can be observed exactly once.
///
/// Dropping the negotiation aborts the handshake task, which drops the
/// transport it owns.
#[derive(Debug)]
pub struct Negotiation {
    outcome: Option<oneshot::Receiver<HandshakeResult>>,
    task: Option<AbortHandle>,
    started: Instant,
}

impl Negotiation {
    /// Run `handshake` on its own task on the current runtime.
    pub fn spawn<F>(handshake: F) -> Result<Self, NegotiatorError>
    where
        F: Future<Output = HandshakeResult> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| NegotiatorError::NoRuntime)?;
        let (tx, rx) = oneshot::channel();
        let task = handle.spawn(async move {
            let _ = tx.send(handshake.await);
        });

        Ok(Self {
            outcome: Some(rx),
            task: Some(task.abort_handle()),
            started: Instant::now(),
        })
    }

    /// Wrap an outcome channel fed by someone else.
    pub fn from_receiver(outcome: oneshot::Receiver<HandshakeResult>) -> Self {
        Self {
            outcome: Some(outcome),
            task: None,
            started: Instant::now(),
        }
    }

    /// True once the outcome has been observed.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Poll for the outcome. Returns `Pending` forever once it was observed.
    pub fn poll_outcome(&mut self, cx: &mut Context<'_>) -> Poll<HandshakeResult> {
        let Some(outcome) = self.outcome.as_mut() else {
            return Poll::Pending;
        };

        let result = match Pin::new(outcome).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            Poll::Ready(Err(_)) => Err(HandshakeFailure::new(
                "handshake task ended without an outcome",
            )),
        };
        self.outcome = None;
        self.task = None;
        Poll::Ready(result)
    }
}

impl Drop for Negotiation {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Performs the TLS handshake for a connection.
pub trait HandshakeNegotiator: Send + Sync {
    fn negotiate(
        &self,
        io: BoxedIo,
        material: &TlsMaterial,
    ) -> Result<Negotiation, NegotiatorError>;
}

/// Server-side handshake with tokio-rustls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsNegotiator;

impl HandshakeNegotiator for RustlsNegotiator {
    fn negotiate(
        &self,
        io: BoxedIo,
        material: &TlsMaterial,
    ) -> Result<Negotiation, NegotiatorError> {
        let acceptor = TlsAcceptor::from(material.server_config());

        Negotiation::spawn(async move {
            match acceptor.accept(io).await {
                Ok(stream) => {
                    let tls = TlsSessionInfo::from_connection(stream.get_ref().1);
                    Ok(NegotiatedStream {
                        io: Box::new(stream),
                        tls: Some(tls),
                    })
                }
                Err(e) => Err(HandshakeFailure::new(e.to_string())),
            }
        })
    }
}
