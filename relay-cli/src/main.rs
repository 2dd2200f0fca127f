//! ## relay-cli
//! **Relay server entrypoint**
//!
//! Started by the launcher with the inherited pipe descriptors and the initial
//! drone state on the command line.

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::error;

use relay_engine::Outcome;

mod commands;

use commands::Cli;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            commands::report_invalid_arguments(&e);
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match commands::run_relay(cli) {
        Ok(Outcome::Aborted) => std::process::exit(1),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("relay-server: {e:#}");
            ExitCode::FAILURE
        }
    }
}
