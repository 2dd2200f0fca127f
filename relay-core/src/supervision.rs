//! Watchdog supervision protocol.
//!
//! The watchdog registers with `SIGUSR1` and the relay answers with one `SIGUSR1`.
//! `SIGUSR2` orders shutdown: the relay sends `SIGTERM` to the render child once
//! and terminates.
//!
//! The signal handler only records the event in [`SIGNAL_SLOT`] and writes one byte
//! to the router's self-pipe. Acknowledgement, logging and termination all run on
//! the router thread in [`SupervisionSession::dispatch`].

use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use tracing::{error, info, warn};

use crate::error::SupervisionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl Pid {
    pub fn this_process() -> Self {
        Pid(std::process::id() as i32)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Watchdog registration, and the relay's acknowledgement.
    Registration,
    /// Shutdown order from the watchdog.
    Shutdown,
    /// Termination request sent to the render child.
    Terminate,
}

impl Signal {
    pub fn number(self) -> libc::c_int {
        match self {
            Signal::Registration => libc::SIGUSR1,
            Signal::Shutdown => libc::SIGUSR2,
            Signal::Terminate => libc::SIGTERM,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Registration => "SIGUSR1",
            Signal::Shutdown => "SIGUSR2",
            Signal::Terminate => "SIGTERM",
        }
    }
}

/// Delivers signals to other processes.
pub trait SignalSender {
    fn send(&mut self, pid: Pid, signal: Signal) -> io::Result<()>;
}

/// `kill(2)`-backed sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct KillSender;

impl SignalSender for KillSender {
    fn send(&mut self, pid: Pid, signal: Signal) -> io::Result<()> {
        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(pid.0, signal.number()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Events recorded by the handler since the last [`SignalSlot::take`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingSignals {
    /// Sender of the latest registration signal.
    pub registration: Option<Pid>,
    pub shutdown: bool,
}

impl PendingSignals {
    pub fn is_empty(&self) -> bool {
        self.registration.is_none() && !self.shutdown
    }
}

/// Async-signal-safe mailbox between the handler and the router.
///
/// Only atomics and `write(2)` are touched from the handler side.
#[derive(Debug)]
pub struct SignalSlot {
    registration_pid: AtomicI32,
    registration_pending: AtomicBool,
    shutdown_pending: AtomicBool,
    wake_fd: AtomicI32,
}

impl Default for SignalSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSlot {
    pub const fn new() -> Self {
        Self {
            registration_pid: AtomicI32::new(0),
            registration_pending: AtomicBool::new(false),
            shutdown_pending: AtomicBool::new(false),
            wake_fd: AtomicI32::new(-1),
        }
    }

    /// Sets the self-pipe write end woken on every recorded event.
    ///
    /// The descriptor must stay open until [`SignalSlot::unbind_wake`].
    pub fn bind_wake(&self, fd: RawFd) {
        self.wake_fd.store(fd, Ordering::SeqCst);
    }

    pub fn unbind_wake(&self) {
        self.wake_fd.store(-1, Ordering::SeqCst);
    }

    /// Signal-safe.
    pub fn record_registration(&self, sender: i32) {
        self.registration_pid.store(sender, Ordering::SeqCst);
        self.registration_pending.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Signal-safe.
    pub fn record_shutdown(&self) {
        self.shutdown_pending.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn wake(&self) {
        let fd = self.wake_fd.load(Ordering::SeqCst);
        if fd < 0 {
            return;
        }
        let byte = 1u8;
        // A full pipe already guarantees a wake-up, so the result is irrelevant.
        // SAFETY: write(2) is async-signal-safe; `byte` outlives the call.
        unsafe {
            libc::write(fd, (&byte as *const u8).cast(), 1);
        }
    }

    /// Drains the recorded events.
    pub fn take(&self) -> PendingSignals {
        let registration = if self.registration_pending.swap(false, Ordering::SeqCst) {
            Some(Pid(self.registration_pid.load(Ordering::SeqCst)))
        } else {
            None
        };
        PendingSignals {
            registration,
            shutdown: self.shutdown_pending.swap(false, Ordering::SeqCst),
        }
    }
}

/// The slot the installed handler writes to.
pub static SIGNAL_SLOT: SignalSlot = SignalSlot::new();

#[cfg(any(target_os = "linux", target_os = "android"))]
fn errno_location() -> *mut libc::c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn errno_location() -> *mut libc::c_int {
    // SAFETY: always returns the calling thread's errno slot.
    unsafe { libc::__error() }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn sender_pid(info: *const libc::siginfo_t) -> i32 {
    (*info).si_pid()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn sender_pid(info: *const libc::siginfo_t) -> i32 {
    (*info).si_pid
}

extern "C" fn on_signal(signo: libc::c_int, info: *mut libc::siginfo_t, _: *mut libc::c_void) {
    let errno = errno_location();
    // SAFETY: errno is thread-local; restoring it keeps the interrupted code intact.
    let saved = unsafe { *errno };

    match signo {
        libc::SIGUSR1 => {
            let sender = if info.is_null() {
                0
            } else {
                // SAFETY: SA_SIGINFO guarantees `info` points at a valid siginfo_t.
                unsafe { sender_pid(info) }
            };
            SIGNAL_SLOT.record_registration(sender);
        }
        libc::SIGUSR2 => SIGNAL_SLOT.record_shutdown(),
        _ => {}
    }

    // SAFETY: see above.
    unsafe { *errno = saved };
}

/// Installs the registration and shutdown handlers, both writing to [`SIGNAL_SLOT`].
pub fn install_handlers() -> Result<(), SupervisionError> {
    for signal in [Signal::Registration, Signal::Shutdown] {
        let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
            on_signal;
        // SAFETY: the action is fully initialised before sigaction reads it, and the
        // handler only performs async-signal-safe operations.
        let rc = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handler as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signal.number(), &action, std::ptr::null_mut())
        };
        if rc == -1 {
            return Err(SupervisionError::Install {
                signal: signal.name(),
                source: io::Error::last_os_error(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered(Pid),
    Terminating,
}

/// Whether the router keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

#[derive(Debug)]
pub struct SupervisionSession {
    state: SessionState,
    watchdog: Option<Pid>,
}

impl Default for SupervisionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisionSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unregistered,
            watchdog: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last watchdog that registered, kept after shutdown starts.
    pub fn watchdog(&self) -> Option<Pid> {
        self.watchdog
    }

    /// Applies drained events: registration first, then shutdown.
    ///
    /// A failed acknowledgement is logged and ignored. A failed termination request
    /// is returned as [`SupervisionError::ChildTermination`] and must end the process.
    pub fn dispatch<S: SignalSender>(
        &mut self,
        pending: PendingSignals,
        sender: &mut S,
        child: Option<Pid>,
    ) -> Result<Flow, SupervisionError> {
        if let Some(watchdog) = pending.registration {
            self.register(watchdog, sender);
        }

        if pending.shutdown {
            return self.shutdown(sender, child);
        }

        Ok(match self.state {
            SessionState::Terminating => Flow::Terminate,
            _ => Flow::Continue,
        })
    }

    fn register<S: SignalSender>(&mut self, watchdog: Pid, sender: &mut S) {
        if self.state == SessionState::Terminating {
            warn!("Ignoring registration from {watchdog} during shutdown");
            return;
        }

        info!("Signal SIGUSR1 received from the watchdog {watchdog}");
        self.state = SessionState::Registered(watchdog);
        self.watchdog = Some(watchdog);

        if let Err(e) = sender.send(watchdog, Signal::Registration) {
            error!("Error acknowledging the watchdog {watchdog}: {e}");
        }
    }

    fn shutdown<S: SignalSender>(
        &mut self,
        sender: &mut S,
        child: Option<Pid>,
    ) -> Result<Flow, SupervisionError> {
        if self.state == SessionState::Terminating {
            return Ok(Flow::Terminate);
        }

        info!("Shutting down by the watchdog");
        self.state = SessionState::Terminating;

        match child {
            Some(pid) => sender
                .send(pid, Signal::Terminate)
                .map_err(|source| SupervisionError::ChildTermination { pid: pid.0, source })?,
            None => warn!("No render process to terminate"),
        }

        Ok(Flow::Terminate)
    }
}
