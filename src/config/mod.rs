//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → one ListenerConfig per accept loop, shared via Arc with its connections
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::GatewayConfig;
pub use schema::ListenerConfig;
pub use schema::ListenerKind;
pub use schema::ObservabilityConfig;
pub use schema::TimeoutConfig;
pub use schema::TlsConfig;
pub use schema::TlsProtocol;
pub use schema::WebsocketConfig;
