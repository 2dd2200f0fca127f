//! Names of the cross-process objects owned by the relay.
//!
//! Both names are recreated (unlink, then create) on every start, so the sibling
//! dynamics process must be started after the relay has initialised them.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Shared memory configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct IpcConfig {
    /// Name of the shared memory segment holding the drone state.
    #[validate(custom(function = validation::validate_ipc_name))]
    #[serde(default = "default_segment_name")]
    pub segment_name: String,

    /// Name of the binary semaphore guarding the segment.
    #[validate(custom(function = validation::validate_ipc_name))]
    #[serde(default = "default_mutex_name")]
    pub mutex_name: String,
}

fn default_segment_name() -> String {
    "/drone_shared_memory".into()
}

fn default_mutex_name() -> String {
    "/drone_sem".into()
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            segment_name: default_segment_name(),
            mutex_name: default_mutex_name(),
        }
    }
}
