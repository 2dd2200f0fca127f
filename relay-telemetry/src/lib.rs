//! # Relay Telemetry
//!
//! Crate for the relay's two append-mode log sinks and its Prometheus counters.

pub mod logging;
pub mod metrics;

pub use logging::{EventLogger, LogSinks, SinkFile, TelemetryError};
pub use metrics::RelayMetrics;
