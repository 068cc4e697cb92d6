//! Per-connection processing pipeline.
//!
//! # Data Flow
//! ```text
//! raw bytes / idle events
//!     → [handshake_idle_timer] → [handshake_timeout_handler]   (while handshaking)
//!     → [tls_handler]
//!     → [connect_idle_timer] → [connect_idle_handler]          (after handshake)
//!     → [websocket_upgrade_handler]
//!     → application session
//! ```
//!
//! # Design Decisions
//! - A pipeline is owned by exactly one connection driver; no locking
//! - Stages are addressed by unique `&'static str` names (see [`names`])
//! - Mutations are direct calls or [`PipelineCommand`] batches applied in
//!   submission order, rolled back as a whole on failure
//! - Idle events travel forward from the timer that raised them to the first
//!   stage that handles them

pub mod chain;
pub mod command;
pub mod names;
pub mod stage;

pub use chain::{Pipeline, PipelineError};
pub use command::PipelineCommand;
pub use stage::{IdleAction, PipelineEvent, Stage, StageName};
