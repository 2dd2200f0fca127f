//! Startup parameters handed over by the launcher.

use std::collections::HashSet;
use std::os::fd::{AsFd, OwnedFd, RawFd};

use relay_core::channel::{set_cloexec, ChannelEndpoint, ChannelRole};
use relay_core::router::ChannelSet;
use relay_core::Vec2;

use crate::error::EngineError;

/// Inherited descriptors and the initial drone state.
///
/// Descriptor order matches the launcher's command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartupArgs {
    pub drone_map_out: RawFd,
    pub drone_key_out: RawFd,
    pub key_in: RawFd,
    pub obstacle_map_out: RawFd,
    pub obstacle_position_in: RawFd,
    pub target_map_out: RawFd,
    pub target_position_in: RawFd,
    pub position: Vec2,
    pub velocity: Vec2,
    pub force: Vec2,
}

impl StartupArgs {
    fn descriptors(&self) -> [(ChannelRole, RawFd); 7] {
        [
            (ChannelRole::DroneMapOut, self.drone_map_out),
            (ChannelRole::DroneKeyOut, self.drone_key_out),
            (ChannelRole::KeyIn, self.key_in),
            (ChannelRole::ObstacleMapOut, self.obstacle_map_out),
            (ChannelRole::ObstaclePositionIn, self.obstacle_position_in),
            (ChannelRole::TargetMapOut, self.target_map_out),
            (ChannelRole::TargetPositionIn, self.target_position_in),
        ]
    }

    /// Rejects a descriptor number given for two pipes.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for (_, fd) in self.descriptors() {
            if !seen.insert(fd) {
                return Err(EngineError::DuplicateDescriptor(fd));
            }
        }
        Ok(())
    }

    /// Takes ownership of the inherited descriptors and marks them close-on-exec so
    /// the map window does not inherit them.
    ///
    /// # Safety
    ///
    /// Every descriptor must be open and owned by nothing else in this process.
    pub(crate) unsafe fn adopt(&self, map_size_in: OwnedFd) -> Result<ChannelSet, EngineError> {
        self.validate()?;

        let adopt = |role: ChannelRole, fd: RawFd| -> Result<ChannelEndpoint, EngineError> {
            let endpoint = ChannelEndpoint::adopt(role, fd)?;
            set_cloexec(endpoint.as_fd())?;
            Ok(endpoint)
        };

        Ok(ChannelSet {
            map_size_in: ChannelEndpoint::new(ChannelRole::MapSizeIn, map_size_in),
            key_in: adopt(ChannelRole::KeyIn, self.key_in)?,
            obstacle_position_in: adopt(ChannelRole::ObstaclePositionIn, self.obstacle_position_in)?,
            target_position_in: adopt(ChannelRole::TargetPositionIn, self.target_position_in)?,
            drone_map_out: adopt(ChannelRole::DroneMapOut, self.drone_map_out)?,
            obstacle_map_out: adopt(ChannelRole::ObstacleMapOut, self.obstacle_map_out)?,
            target_map_out: adopt(ChannelRole::TargetMapOut, self.target_map_out)?,
            drone_key_out: adopt(ChannelRole::DroneKeyOut, self.drone_key_out)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> StartupArgs {
        StartupArgs {
            drone_map_out: 10,
            drone_key_out: 11,
            key_in: 12,
            obstacle_map_out: 13,
            obstacle_position_in: 14,
            target_map_out: 15,
            target_position_in: 16,
            position: Vec2::new(1.0, 1.0),
            velocity: Vec2::ZERO,
            force: Vec2::ZERO,
        }
    }

    #[test]
    fn distinct_descriptors_are_accepted() {
        assert!(args().validate().is_ok());
    }

    #[test]
    fn repeated_descriptor_is_rejected() {
        let mut args = args();
        args.target_position_in = args.key_in;
        assert!(matches!(
            args.validate(),
            Err(EngineError::DuplicateDescriptor(12))
        ));
    }
}
