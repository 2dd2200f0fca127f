//! # Relay Configuration System
//!
//! Layered configuration for the relay server.
//!
//! ## Features
//! - **Unified Configuration**: one tree for IPC names, routing, the render child and logging
//! - **Validation**: runtime validation of every parameter before bootstrap touches the OS
//! - **Environment Awareness**: `RELAY_*` variables override any file setting

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod ipc;
mod render;
mod router;
mod telemetry;
mod validation;

pub use error::ConfigError;
pub use ipc::IpcConfig;
pub use render::RenderConfig;
pub use router::RouterConfig;
pub use telemetry::TelemetryConfig;

/// Default location of the base configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "config/relay.yaml";

/// Prefix of the environment variables that override file settings.
pub const ENV_PREFIX: &str = "RELAY_";

/// Top‑level configuration container for the relay server.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct RelayConfig {
    /// Shared memory segment and mutex names.
    #[validate(nested)]
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Readiness loop parameters.
    #[validate(nested)]
    #[serde(default)]
    pub router: RouterConfig,

    /// Render window child process.
    #[validate(nested)]
    #[serde(default)]
    pub render: RenderConfig,

    /// Log sinks and verbosity.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RelayConfig {
    /// Load configuration from the default file and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/relay.yaml` - if missing, defaults are used.
    /// 3. `RELAY_*` environment variables (nested keys split on `__`).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_layered(None)
    }

    /// Same as [`RelayConfig::load`], with an explicit file merged after the
    /// default file and before the environment.
    pub fn load_layered(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(RelayConfig::default()));

        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            figment = figment.merge(Yaml::file(DEFAULT_CONFIG_FILE));
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(PathBuf::from(path)));
            }
            figment = figment.merge(Yaml::file(path));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific path for testing/validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Self::finish(
            Figment::from(Serialized::defaults(RelayConfig::default())).merge(Yaml::file(path)),
        )
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn full_config_validation() {
        let config = RelayConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn environment_override() {
        Jail::expect_with(|jail| {
            jail.set_env("RELAY_ROUTER__TICK_INTERVAL_MS", "250");
            let config = RelayConfig::load().expect("load");
            assert_eq!(config.router.tick_interval_ms, 250);
            Ok(())
        });
    }

    #[test]
    fn default_file_is_merged() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/relay.yaml",
                "ipc:\n  segment_name: /relay_test_segment\n",
            )?;
            let config = RelayConfig::load().expect("load");
            assert_eq!(config.ipc.segment_name, "/relay_test_segment");
            assert_eq!(config.ipc.mutex_name, IpcConfig::default().mutex_name);
            Ok(())
        });
    }

    #[test]
    fn explicit_file_overrides_default_file() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/relay.yaml", "router:\n  tick_interval_ms: 500\n")?;
            jail.create_file("local.yaml", "router:\n  tick_interval_ms: 20\n")?;
            let config = RelayConfig::load_layered(Some(Path::new("local.yaml"))).expect("load");
            assert_eq!(config.router.tick_interval_ms, 20);
            Ok(())
        });
    }

    #[test]
    fn missing_explicit_file_is_reported() {
        let err = RelayConfig::load_layered(Some(Path::new("/nonexistent/relay.yaml")))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.yaml", "router:\n  tick_interval_ms: 0\n")?;
            let err = RelayConfig::load_from_path("bad.yaml").expect_err("invalid");
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }
}
