//! # relay-core
//!
//! The coordination core of the drone relay server.
//!
//! ### Key Submodules:
//! - `state`: the `#[repr(C)]` drone state record shared with the dynamics process
//! - `store`: named shared memory segment guarded by a named binary semaphore
//! - `channel`: role-tagged pipe endpoints
//! - `supervision`: signal-driven watchdog handshake
//! - `router`: readiness multiplexer forwarding map and key messages
//!
//! The router is single-threaded. Signals never run relay logic: the handler
//! records the event in [`supervision::SignalSlot`] and wakes the router through a
//! self-pipe.

#![cfg(unix)]

pub mod channel;
pub mod context;
pub mod error;
pub mod router;
pub mod state;
pub mod store;
pub mod supervision;

pub use context::RelayContext;
pub use error::{ChannelError, RouterError, StoreError, SupervisionError};
pub use router::{Router, RouterExit, MESSAGE_CAP};
pub use state::{SegmentLayout, SharedState, Vec2};
pub use store::StateStore;
pub use supervision::{Flow, Pid, SupervisionSession};
