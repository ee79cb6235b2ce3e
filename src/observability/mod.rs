//! Observability: logging, metrics, and structured events.
//!
//! Logs go to stderr through `tracing`. Metrics are Prometheus-compatible
//! and only exported when a metrics port is given. Events are JSONL records
//! of session milestones for offline review of a performance.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventEmitter, StopReason};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
