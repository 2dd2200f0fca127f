use std::io;

use relay_config::ConfigError;
use relay_core::{ChannelError, StoreError, SupervisionError};
use relay_telemetry::TelemetryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Supervision(#[from] SupervisionError),

    #[error("descriptor {0} was passed for more than one pipe")]
    DuplicateDescriptor(i32),

    #[error("render command is empty")]
    EmptyCommand,

    #[error("Error spawning the map window {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Error closing the log files: {0}")]
    Teardown(#[source] io::Error),
}
