//! Role-tagged pipe endpoints.
//!
//! Channels carry no framing: one readiness-triggered read is one message.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// Map size reported by the render window.
    MapSizeIn,
    /// Key presses from the input process.
    KeyIn,
    ObstaclePositionIn,
    TargetPositionIn,
    DroneMapOut,
    ObstacleMapOut,
    TargetMapOut,
    DroneKeyOut,
}

impl ChannelRole {
    /// Metric label.
    pub fn label(self) -> &'static str {
        match self {
            ChannelRole::MapSizeIn => "map_size",
            ChannelRole::KeyIn => "key",
            ChannelRole::ObstaclePositionIn => "obstacle_position",
            ChannelRole::TargetPositionIn => "target_position",
            ChannelRole::DroneMapOut => "drone_map",
            ChannelRole::ObstacleMapOut => "obstacle_map",
            ChannelRole::TargetMapOut => "target_map",
            ChannelRole::DroneKeyOut => "drone_key",
        }
    }
}

/// An owned descriptor tagged with its routing role. Closed on drop.
#[derive(Debug)]
pub struct ChannelEndpoint {
    role: ChannelRole,
    file: File,
}

impl ChannelEndpoint {
    pub fn new(role: ChannelRole, fd: OwnedFd) -> Self {
        Self {
            role,
            file: File::from(fd),
        }
    }

    /// Takes ownership of an inherited descriptor number.
    ///
    /// # Safety
    ///
    /// `fd` must not be owned by anything else in this process; it is closed when
    /// the endpoint drops.
    pub unsafe fn adopt(role: ChannelRole, fd: RawFd) -> Result<Self, ChannelError> {
        if libc::fcntl(fd, libc::F_GETFD) == -1 {
            return Err(ChannelError::BadDescriptor {
                role,
                fd,
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self::new(role, OwnedFd::from_raw_fd(fd)))
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }
}

impl AsRawFd for ChannelEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for ChannelEndpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

/// Creates a pipe whose ends are inherited by spawned children.
///
/// Returns `(read, write)`.
pub fn pipe() -> Result<(OwnedFd, OwnedFd), ChannelError> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(ChannelError::Pipe(io::Error::last_os_error()));
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Creates the self-pipe used to wake the router from a signal handler.
///
/// Both ends are non-blocking (the handler must never block, the router drains
/// until empty) and close-on-exec.
pub fn wake_pipe() -> Result<(OwnedFd, OwnedFd), ChannelError> {
    let (read, write) = pipe()?;
    for fd in [&read, &write] {
        set_nonblocking(fd.as_fd(), true)?;
        set_cloexec(fd.as_fd())?;
    }
    Ok((read, write))
}

pub fn set_cloexec(fd: BorrowedFd<'_>) -> Result<(), ChannelError> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is a live descriptor borrowed for this call.
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFD);
        if flags == -1 || libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) == -1 {
            return Err(ChannelError::Flags(io::Error::last_os_error()));
        }
    }
    Ok(())
}

pub fn set_nonblocking(fd: BorrowedFd<'_>, nonblocking: bool) -> Result<(), ChannelError> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is a live descriptor borrowed for this call.
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFL);
        if flags == -1 {
            return Err(ChannelError::Flags(io::Error::last_os_error()));
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if libc::fcntl(raw, libc::F_SETFL, flags) == -1 {
            return Err(ChannelError::Flags(io::Error::last_os_error()));
        }
    }
    Ok(())
}
