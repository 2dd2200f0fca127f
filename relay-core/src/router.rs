//! Readiness multiplexer and router.
//!
//! One `poll(2)` over the four inputs and the self-pipe, re-armed every tick.
//! Routing is static:
//!
//! | input                  | destination                          |
//! |------------------------|--------------------------------------|
//! | map size               | drone, obstacle and target map pipes |
//! | key                    | drone key pipe                       |
//! | obstacle/target report | diagnostic sink only                 |
//!
//! Senders write each message with one `write`, so one read is one message. There is
//! no framing; payloads above [`MESSAGE_CAP`] or interleaved partial writes are split
//! across reads and forwarded as they arrive.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use relay_telemetry::RelayMetrics;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{ChannelEndpoint, ChannelRole};
use crate::context::RelayContext;
use crate::error::{RouterError, SupervisionError};
use crate::supervision::{Flow, SignalSender};

/// Largest message delivered by one read.
pub const MESSAGE_CAP: usize = 2047;

const INPUTS: [ChannelRole; 4] = [
    ChannelRole::MapSizeIn,
    ChannelRole::KeyIn,
    ChannelRole::ObstaclePositionIn,
    ChannelRole::TargetPositionIn,
];

const WAKE_INDEX: usize = INPUTS.len();

/// The descriptors owned by the router.
#[derive(Debug)]
pub struct ChannelSet {
    pub map_size_in: ChannelEndpoint,
    pub key_in: ChannelEndpoint,
    pub obstacle_position_in: ChannelEndpoint,
    pub target_position_in: ChannelEndpoint,
    pub drone_map_out: ChannelEndpoint,
    pub obstacle_map_out: ChannelEndpoint,
    pub target_map_out: ChannelEndpoint,
    pub drone_key_out: ChannelEndpoint,
}

impl ChannelSet {
    fn input_mut(&mut self, role: ChannelRole) -> &mut ChannelEndpoint {
        match role {
            ChannelRole::MapSizeIn => &mut self.map_size_in,
            ChannelRole::KeyIn => &mut self.key_in,
            ChannelRole::ObstaclePositionIn => &mut self.obstacle_position_in,
            _ => &mut self.target_position_in,
        }
    }

    fn into_endpoints(self) -> [ChannelEndpoint; 8] {
        [
            self.drone_key_out,
            self.drone_map_out,
            self.map_size_in,
            self.key_in,
            self.obstacle_map_out,
            self.obstacle_position_in,
            self.target_map_out,
            self.target_position_in,
        ]
    }
}

/// Blocks until a descriptor is ready or the timeout elapses.
pub trait Waiter {
    /// Returns the number of ready descriptors, `0` on timeout.
    fn wait(&mut self, fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PollWaiter;

impl Waiter for PollWaiter {
    fn wait(&mut self, fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
        let timeout = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: `fds` is a valid, exclusively borrowed slice of pollfd.
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ready as usize)
    }
}

/// Why [`Router::run`] returned.
#[derive(Debug)]
pub enum RouterExit {
    /// The watchdog ordered shutdown and the render child was asked to terminate.
    Shutdown,
    /// The readiness wait failed.
    Failed(RouterError),
    /// The render child could not be asked to terminate.
    Aborted(SupervisionError),
}

pub struct Router<W: Waiter = PollWaiter> {
    channels: Option<ChannelSet>,
    wake: Option<File>,
    waiter: W,
    tick: Duration,
    buffer: Vec<u8>,
}

fn poll_entry(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

// POLLHUP counts as readable, like select(2): the read then returns 0 bytes.
fn is_readable(revents: libc::c_short) -> bool {
    revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0
}

impl Router<PollWaiter> {
    pub fn new(channels: ChannelSet, wake: OwnedFd, tick: Duration) -> Self {
        Self::with_waiter(channels, wake, tick, PollWaiter)
    }
}

impl<W: Waiter> Router<W> {
    pub fn with_waiter(channels: ChannelSet, wake: OwnedFd, tick: Duration, waiter: W) -> Self {
        Self {
            channels: Some(channels),
            wake: Some(File::from(wake)),
            waiter,
            tick,
            buffer: vec![0; MESSAGE_CAP],
        }
    }

    pub fn is_closed(&self) -> bool {
        self.channels.is_none() && self.wake.is_none()
    }

    /// Runs until shutdown or a fatal error, then closes every descriptor.
    pub fn run<S: SignalSender>(&mut self, ctx: &mut RelayContext<S>) -> RouterExit {
        info!("Router started, tick {:?}", self.tick);

        let exit = loop {
            match self.poll_once(ctx) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Terminate) => break RouterExit::Shutdown,
                Err(RouterError::Supervision(e)) => {
                    error!("{e}");
                    break RouterExit::Aborted(e);
                }
                Err(e) => {
                    error!("Error in the readiness wait: {e}");
                    break RouterExit::Failed(e);
                }
            }
        };

        let closed = self.close();
        debug!("Router stopped, closed {closed} descriptors");
        exit
    }

    /// One wait, then every ready input is read once and routed.
    pub fn poll_once<S: SignalSender>(
        &mut self,
        ctx: &mut RelayContext<S>,
    ) -> Result<Flow, RouterError> {
        let (Some(channels), Some(wake)) = (self.channels.as_mut(), self.wake.as_mut()) else {
            return Err(RouterError::Closed);
        };

        let mut fds = [
            poll_entry(channels.map_size_in.as_raw_fd()),
            poll_entry(channels.key_in.as_raw_fd()),
            poll_entry(channels.obstacle_position_in.as_raw_fd()),
            poll_entry(channels.target_position_in.as_raw_fd()),
            poll_entry(wake.as_raw_fd()),
        ];

        let ready = loop {
            match self.waiter.wait(&mut fds, self.tick) {
                Ok(ready) => break ready,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    trace!("Readiness wait interrupted, retrying");
                }
                Err(e) => return Err(RouterError::Wait(e)),
            }
        };

        if ready == 0 {
            return Ok(Flow::Continue);
        }

        for (entry, role) in fds.iter().zip(INPUTS) {
            if entry.revents & libc::POLLNVAL != 0 {
                return Err(RouterError::InvalidDescriptor(role));
            }
        }
        if fds[WAKE_INDEX].revents & libc::POLLNVAL != 0 {
            return Err(RouterError::Wait(io::Error::from_raw_os_error(libc::EBADF)));
        }

        for (entry, role) in fds.iter().zip(INPUTS) {
            if !is_readable(entry.revents) {
                continue;
            }
            match channels.input_mut(role).read(&mut self.buffer) {
                Ok(0) => ctx.metrics.record_empty_read(),
                Ok(len) => route(channels, role, &self.buffer[..len], ctx),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    ctx.metrics.record_empty_read()
                }
                Err(e) => {
                    warn!("Error reading the {} pipe: {e}", role.label());
                    ctx.metrics.record_empty_read();
                }
            }
        }

        if is_readable(fds[WAKE_INDEX].revents) {
            drain(wake);
            return Ok(ctx.handle_signals()?);
        }

        Ok(Flow::Continue)
    }

    /// Closes every owned descriptor once. Returns how many were closed.
    pub fn close(&mut self) -> usize {
        let mut closed = 0;
        if let Some(channels) = self.channels.take() {
            for endpoint in channels.into_endpoints() {
                trace!(
                    "Closing the {} pipe (fd {})",
                    endpoint.role().label(),
                    endpoint.as_raw_fd()
                );
                drop(endpoint);
                closed += 1;
            }
        }
        if self.wake.take().is_some() {
            closed += 1;
        }
        closed
    }
}

fn route<S: SignalSender>(
    channels: &mut ChannelSet,
    role: ChannelRole,
    payload: &[u8],
    ctx: &mut RelayContext<S>,
) {
    match role {
        ChannelRole::MapSizeIn => {
            debug!("Map size received ({} bytes)", payload.len());
            for out in [
                &mut channels.drone_map_out,
                &mut channels.obstacle_map_out,
                &mut channels.target_map_out,
            ] {
                forward(out, payload, &ctx.metrics);
            }
        }
        ChannelRole::KeyIn => {
            trace!("Key received ({} bytes)", payload.len());
            forward(&mut channels.drone_key_out, payload, &ctx.metrics);
        }
        ChannelRole::ObstaclePositionIn | ChannelRole::TargetPositionIn => {
            // Logged only; position reports have no forwarding destination.
            if let Err(e) = ctx.diagnostics.append_line(payload) {
                warn!("Error writing the {} report to the log: {e}", role.label());
            }
            ctx.metrics.record_position_report(role.label());
            debug!(
                "{} report: {}",
                role.label(),
                String::from_utf8_lossy(payload).trim_end()
            );
        }
        other => warn!("No route for output role {other:?}"),
    }
}

fn forward(out: &mut ChannelEndpoint, payload: &[u8], metrics: &RelayMetrics) {
    let label = out.role().label();
    match out.write_all(payload) {
        Ok(()) => metrics.record_forward(label, payload.len()),
        Err(e) => {
            error!("Error writing to the {label} pipe: {e}");
            metrics.record_write_failure(label);
        }
    }
}

fn drain(wake: &mut File) {
    let mut sink = [0u8; 64];
    loop {
        match wake.read(&mut sink) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("Error draining the wake pipe: {e}");
                break;
            }
        }
    }
}
