//! WebSocket serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, one driver per connection)
//!     → [bootstrap pipeline: guard, TLS, idle policy]
//!     → websocket.rs (HTTP upgrade, subprotocol selection)
//!     → WebSocketSession handed to the application
//! ```

pub mod server;
pub mod websocket;

pub use server::GatewayServer;
pub use websocket::{
    WebSocketSession, WebSocketStageFactory, WebSocketUpgradeError, WebSocketUpgradeStage,
};
