//! Event Observers
//!
//! Observers subscribe to the EventBus and process events:
//! - `logging`: structured logging via tracing
//! - `metrics`: counters for allocations, sampling and verification

pub mod logging;
pub mod metrics;

pub use logging::LoggingObserver;
pub use metrics::{Metrics, MetricsObserver};
