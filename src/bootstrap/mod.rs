//! Connection bootstrap subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted transport
//!     → strategy.rs (plain or secured, per listener kind)
//!     → assembler.rs (guard, TLS stage + continuation, WebSocket stage)
//!     → guard.rs (handshake timeout while negotiating)
//!     → policy.rs (idle timeout once negotiated)
//!     → driver.rs (one task per connection, serialized pipeline events)
//! ```
//!
//! # Design Decisions
//! - All pipeline mutations for a connection happen on its driver task
//! - Handshake completion and guard expiry are both pipeline events; the
//!   first one observed decides the connection's fate
//! - A handshake outcome and a guard expiry due on the same tick resolve in
//!   favour of the handshake: an expiry is acted on only after the handshake
//!   task had one more chance to report

pub mod assembler;
pub mod driver;
pub mod error;
pub mod guard;
pub mod idle;
pub mod policy;
pub mod strategy;

pub use assembler::{Bootstrapped, HandshakeContinuation, PipelineAssembler, TlsStage};
pub use driver::{ConnectionDriver, ConnectionHandle};
pub use error::{BootstrapConfigError, ConnectionError};
pub use guard::{GuardError, GuardState, HandshakeTimeoutGuard};
pub use idle::{ActivityStream, IdleEvent, IdleMode, IdleTimer, ReadActivity};
pub use policy::PostHandshakeIdlePolicy;
pub use strategy::BootstrapStrategy;
