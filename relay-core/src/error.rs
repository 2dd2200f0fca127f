use std::io;

use thiserror::Error;

use crate::channel::ChannelRole;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid IPC object name {0:?}")]
    InvalidName(String),

    #[error("Error opening the shared memory {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Error setting the size of the shared memory {name}: {source}")]
    Resize {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Error mapping the shared memory {name}: {source}")]
    Map {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("shared memory {name} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: u64,
    },

    #[error("Error opening the semaphore {name}: {source}")]
    Semaphore {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("semaphore operation failed: {0}")]
    Lock(#[source] io::Error),

    #[error("Error unlinking {name}: {source}")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("descriptor {fd} for {role:?} is not open: {source}")]
    BadDescriptor {
        role: ChannelRole,
        fd: i32,
        #[source]
        source: io::Error,
    },

    #[error("Error creating the pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("fcntl failed: {0}")]
    Flags(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum SupervisionError {
    #[error("Error in sigaction({signal}): {source}")]
    Install {
        signal: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Error sending SIGTERM signal to the render process {pid}: {source}")]
    ChildTermination {
        pid: i32,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    #[error("descriptor for {0:?} became invalid")]
    InvalidDescriptor(ChannelRole),

    #[error(transparent)]
    Supervision(#[from] SupervisionError),

    #[error("router descriptors already closed")]
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseVec2Error {
    #[error("expected \"x,y\", got {0:?}")]
    Format(String),

    #[error("invalid component {0:?}")]
    Component(String),
}
