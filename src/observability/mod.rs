//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → event_log.rs (audit events for rejected handshakes)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Connection ID, listener and peer address flow through every log line
//! - Metrics are cheap (atomic increments)

pub mod event_log;
pub mod logging;
pub mod metrics;

pub use event_log::{AuditEvent, AuditEventKind, EventLog, TracingEventLog};
