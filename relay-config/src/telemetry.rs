//! Log sink configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Telemetry configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Informational trace sink, opened in append mode.
    #[serde(default = "default_trace_log")]
    pub trace_log: PathBuf,

    /// Error sink, opened in append mode.
    #[serde(default = "default_error_log")]
    pub error_log: PathBuf,

    /// Default filter for the trace sink when `RUST_LOG` is unset.
    #[validate(custom(function = validation::validate_level))]
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_trace_log() -> PathBuf {
    "debug.log".into()
}

fn default_error_log() -> PathBuf {
    "errors.log".into()
}

fn default_level() -> String {
    "info".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            trace_log: default_trace_log(),
            error_log: default_error_log(),
            level: default_level(),
        }
    }
}
