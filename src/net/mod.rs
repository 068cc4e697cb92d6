//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (identity, phase, per-connection pipeline)
//!     → tls.rs (server config from PEM material)
//!     → handshake.rs (TLS negotiation on its own task)
//!     → Hand off to the WebSocket upgrade stage
//!
//! Connection Phases:
//!     Accepted → Handshaking → Upgrading → Active → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Transports are type-erased ([`BoxedIo`]) once accepted

use tokio::io::{AsyncRead, AsyncWrite};

pub mod connection;
pub mod handshake;
pub mod listener;
pub mod tls;

/// Byte stream a connection runs over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased transport, raw or decrypted.
pub type BoxedIo = Box<dyn Io>;
