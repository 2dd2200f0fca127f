use std::os::fd::RawFd;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error};

use relay_config::RelayConfig;
use relay_core::Vec2;
use relay_engine::{Outcome, Relay, StartupArgs};
use relay_telemetry::{EventLogger, LogSinks};

/// Relay between the drone simulation processes.
///
/// Descriptors are pipe ends inherited from the launcher; vectors are `x,y`.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Write end towards the drone's map-size reader
    pub drone_map_out: RawFd,
    /// Write end towards the drone's key reader
    pub drone_key_out: RawFd,
    /// Read end of the keyboard input pipe
    pub key_in: RawFd,
    /// Write end towards the obstacle generator's map-size reader
    pub obstacle_map_out: RawFd,
    /// Read end of the obstacle position reports
    pub obstacle_position_in: RawFd,
    /// Write end towards the target generator's map-size reader
    pub target_map_out: RawFd,
    /// Read end of the target position reports
    pub target_position_in: RawFd,
    /// Initial drone position
    #[arg(allow_hyphen_values = true)]
    pub position: Vec2,
    /// Initial drone velocity
    #[arg(allow_hyphen_values = true)]
    pub velocity: Vec2,
    /// Initial force on the drone
    #[arg(allow_hyphen_values = true)]
    pub force: Vec2,

    /// Configuration file merged over `config/relay.yaml`
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Trailing launcher arguments, ignored
    #[arg(hide = true)]
    pub extra: Vec<String>,
}

impl Cli {
    pub fn startup_args(&self) -> StartupArgs {
        StartupArgs {
            drone_map_out: self.drone_map_out,
            drone_key_out: self.drone_key_out,
            key_in: self.key_in,
            obstacle_map_out: self.obstacle_map_out,
            obstacle_position_in: self.obstacle_position_in,
            target_map_out: self.target_map_out,
            target_position_in: self.target_position_in,
            position: self.position,
            velocity: self.velocity,
            force: self.force,
        }
    }
}

/// Loads configuration, installs logging and runs the relay to completion.
pub fn run_relay(cli: Cli) -> anyhow::Result<Outcome> {
    let config = RelayConfig::load_layered(cli.config.as_deref())
        .context("Error loading the configuration")?;
    let sinks = open_logging(&config)?;
    debug!("Configuration: {config:?}");
    if !cli.extra.is_empty() {
        debug!("Ignoring {} extra arguments", cli.extra.len());
    }

    let relay = Relay::bootstrap(&config, cli.startup_args(), sinks)
        .context("Error starting the relay")?;
    relay.run().context("Error stopping the relay")
}

/// Records a command line that could not be parsed in the error log.
pub fn report_invalid_arguments(err: &clap::Error) {
    let config = RelayConfig::load().unwrap_or_default();
    if open_logging(&config).is_ok() {
        error!("Invalid number of parameters");
        debug!("{err}");
    }
}

fn open_logging(config: &RelayConfig) -> anyhow::Result<LogSinks> {
    let sinks = LogSinks::open(&config.telemetry.trace_log, &config.telemetry.error_log)
        .context("Error opening the log files")?;
    EventLogger::init(&sinks, &config.telemetry.level).context("Error installing logging")?;
    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    const FULL: [&str; 11] = [
        "relay-server", "3", "4", "5", "6", "7", "8", "9", "10,20", "0,0", "-1.5,2",
    ];

    #[test]
    fn parses_descriptors_and_vectors() {
        let cli = Cli::try_parse_from(FULL).unwrap();
        let args = cli.startup_args();
        assert_eq!(args.drone_map_out, 3);
        assert_eq!(args.target_position_in, 9);
        assert_eq!(args.position, Vec2::new(10.0, 20.0));
        assert_eq!(args.force, Vec2::new(-1.5, 2.0));
        assert!(cli.config.is_none());
    }

    #[test]
    fn missing_parameters_are_rejected() {
        let err = Cli::try_parse_from(&FULL[..8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn malformed_vector_is_rejected() {
        let mut args = FULL.to_vec();
        args[8] = "10;20";
        let err = Cli::try_parse_from(args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn extra_trailing_arguments_are_ignored() {
        let mut args = FULL.to_vec();
        args.extend(["launcher-extra", "42"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.extra, vec!["launcher-extra", "42"]);
        assert_eq!(cli.startup_args().force, Vec2::new(-1.5, 2.0));
    }

    #[test]
    fn config_flag_is_accepted_after_positionals() {
        let mut args = FULL.to_vec();
        args.extend(["--config", "relay.yaml"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("relay.yaml")));
    }
}
