//! TLS WebSocket gateway library.
//!
//! Accepts TCP connections, negotiates TLS under a handshake timeout, upgrades
//! to WebSocket and hands sessions to the application.

pub mod bootstrap;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;

pub use bootstrap::{ConnectionDriver, ConnectionError, PipelineAssembler};
pub use config::schema::GatewayConfig;
pub use http::{GatewayServer, WebSocketSession};
pub use lifecycle::Shutdown;
