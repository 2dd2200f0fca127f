//! # relay-engine
//!
//! Bootstrap and lifecycle of the relay server: adopts the inherited pipes, creates
//! the shared state store, spawns the map window and runs the router until the
//! watchdog orders shutdown.

#![cfg(unix)]

mod args;
mod error;
mod relay;

pub use args::StartupArgs;
pub use error::EngineError;
pub use relay::{Outcome, Relay};
