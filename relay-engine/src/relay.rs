/*!
# Relay lifecycle

`bootstrap` acquires every resource in order (pipes, shared state, map window,
signal handlers) and releases what it already holds when a later step fails.
`run` drives the router to completion and tears everything down again.
*/

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::process::{Child, Command};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use relay_config::RelayConfig;
use relay_core::channel::{pipe, set_cloexec, wake_pipe};
use relay_core::supervision::{install_handlers, KillSender, Signal, SignalSender, SIGNAL_SLOT};
use relay_core::{Pid, RelayContext, Router, RouterExit, StateStore};
use relay_telemetry::{LogSinks, RelayMetrics};

use crate::args::StartupArgs;
use crate::error::EngineError;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Watchdog-ordered shutdown, fully torn down.
    Shutdown,
    /// The readiness wait failed; torn down all the same.
    WaitFailed,
    /// The map window could not be terminated. The router has closed its
    /// descriptors, nothing else was torn down (the shared names stay linked) and
    /// the process must exit with failure immediately.
    Aborted,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        !matches!(self, Outcome::Aborted)
    }
}

pub struct Relay {
    router: Router,
    ctx: RelayContext,
    store: StateStore,
    child: Child,
    /// Write end handed to the map window. Kept open so the router never sees EOF
    /// on the map-size pipe.
    map_size_tx: OwnedFd,
    /// Bound to the signal slot for the whole run.
    wake_tx: OwnedFd,
    sinks: LogSinks,
}

impl Relay {
    /// Acquires every resource the relay needs.
    ///
    /// Takes ownership of the descriptors in `args`.
    #[instrument(level = "debug", name = "bootstrap", skip_all)]
    pub fn bootstrap(
        config: &RelayConfig,
        args: StartupArgs,
        sinks: LogSinks,
    ) -> Result<Self, EngineError> {
        let (map_size_rx, map_size_tx) = pipe()?;
        set_cloexec(map_size_rx.as_fd())?;

        // SAFETY: the launcher hands these descriptors to this process alone and
        // nothing else here has touched them.
        let channels = unsafe { args.adopt(map_size_rx)? };

        let store = StateStore::create(&config.ipc.segment_name, &config.ipc.mutex_name)?;
        info!(
            "Shared memory {} created, guarded by {}",
            config.ipc.segment_name, config.ipc.mutex_name
        );
        if let Err(e) = store.init(args.position, args.velocity, args.force) {
            discard(store);
            return Err(e.into());
        }
        debug!(
            "Initial state: position {}, velocity {}, force {}",
            args.position, args.velocity, args.force
        );

        let mut child = match spawn_render(&config.render.command, &map_size_tx) {
            Ok(child) => child,
            Err(e) => {
                discard(store);
                return Err(e);
            }
        };
        let child_pid = Pid(child.id() as i32);
        info!("Map window started with pid {child_pid}");

        let (wake_rx, wake_tx) = match arm_signals() {
            Ok(wake) => wake,
            Err(e) => {
                if let Err(e) = KillSender.send(child_pid, Signal::Terminate) {
                    warn!("Error stopping the map window {child_pid}: {e}");
                }
                let _ = child.try_wait();
                discard(store);
                return Err(e);
            }
        };

        let ctx = RelayContext::new(child_pid, Arc::clone(sinks.errors()), RelayMetrics::new());
        let router = Router::new(channels, wake_rx, config.router.tick_interval());
        Ok(Self {
            router,
            ctx,
            store,
            child,
            map_size_tx,
            wake_tx,
            sinks,
        })
    }

    pub fn child_pid(&self) -> Pid {
        self.ctx.child.unwrap_or(Pid(0))
    }

    /// Routes until shutdown or a fatal error, then tears down.
    #[instrument(level = "debug", name = "relay", skip_all)]
    pub fn run(mut self) -> Result<Outcome, EngineError> {
        info!("Relay running, map window {}", self.child_pid());

        let outcome = match self.router.run(&mut self.ctx) {
            RouterExit::Shutdown => Outcome::Shutdown,
            RouterExit::Failed(_) => Outcome::WaitFailed,
            RouterExit::Aborted(_) => {
                SIGNAL_SLOT.unbind_wake();
                return Ok(Outcome::Aborted);
            }
        };

        self.teardown()?;
        Ok(outcome)
    }

    fn teardown(mut self) -> Result<(), EngineError> {
        SIGNAL_SLOT.unbind_wake();
        drop(self.wake_tx);
        drop(self.map_size_tx);

        match self.child.try_wait() {
            Ok(Some(status)) => debug!("Map window exited: {status}"),
            Ok(None) => debug!("Map window still stopping"),
            Err(e) => warn!("Error checking the map window: {e}"),
        }

        let store = self.store.destroy();
        match &store {
            Ok(()) => info!("Shared memory unlinked"),
            Err(e) => error!("{e}"),
        }

        self.ctx.metrics.log_summary();
        info!("Relay stopped");

        let sinks = self.sinks.close().map_err(EngineError::Teardown);
        store?;
        sinks
    }
}

fn arm_signals() -> Result<(OwnedFd, OwnedFd), EngineError> {
    let (wake_rx, wake_tx) = wake_pipe()?;
    SIGNAL_SLOT.bind_wake(wake_tx.as_raw_fd());
    if let Err(e) = install_handlers() {
        SIGNAL_SLOT.unbind_wake();
        return Err(e.into());
    }
    debug!("Signal handlers installed");
    Ok((wake_rx, wake_tx))
}

/// Starts the map window with the map-size write end as its last argument.
fn spawn_render(command: &[String], map_size_tx: &OwnedFd) -> Result<Child, EngineError> {
    let (program, leading) = command.split_first().ok_or(EngineError::EmptyCommand)?;
    Command::new(program)
        .args(leading)
        .arg(map_size_tx.as_raw_fd().to_string())
        .spawn()
        .map_err(|source| EngineError::Spawn {
            program: program.clone(),
            source,
        })
}

fn discard(store: StateStore) {
    if let Err(e) = store.destroy() {
        warn!("Error releasing the shared memory: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_abort_is_a_failure() {
        assert!(Outcome::Shutdown.is_success());
        assert!(Outcome::WaitFailed.is_success());
        assert!(!Outcome::Aborted.is_success());
    }

    #[test]
    fn empty_render_command_is_rejected() {
        let (_rx, tx) = pipe().unwrap();
        assert!(matches!(
            spawn_render(&[], &tx),
            Err(EngineError::EmptyCommand)
        ));
    }

    #[test]
    fn render_gets_the_descriptor_as_last_argument() {
        let (_rx, tx) = pipe().unwrap();
        // `$0` is "render"; the descriptor is appended after the expected value.
        let command = vec![
            "sh".to_string(),
            "-c".into(),
            "test \"$1\" = \"$2\"".into(),
            "render".into(),
            tx.as_raw_fd().to_string(),
        ];
        let status = spawn_render(&command, &tx).unwrap().wait().unwrap();
        assert!(status.success());
    }
}
