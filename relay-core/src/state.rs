//! The drone state record placed in shared memory.
//!
//! The segment is a `#[repr(C)]` [`SegmentLayout`]: six `f32`s followed by a
//! pointer-sized mutex handle slot, so the dynamics process can map the same
//! segment with an equivalent C struct.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseVec2Error;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Parses the `"x,y"` startup argument format.
impl FromStr for Vec2 {
    type Err = ParseVec2Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| ParseVec2Error::Format(s.to_string()))?;

        let component = |part: &str| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| ParseVec2Error::Component(part.to_string()))
        };

        Ok(Vec2::new(component(x)?, component(y)?))
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SharedState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub force: Vec2,
}

impl SharedState {
    pub const fn new(position: Vec2, velocity: Vec2, force: Vec2) -> Self {
        Self {
            position,
            velocity,
            force,
        }
    }
}

/// Everything mapped in the shared segment.
///
/// `mutex_handle` holds the creator's semaphore handle address. It is only
/// meaningful inside the creating process; siblings open the mutex by name.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentLayout {
    pub state: SharedState,
    pub mutex_handle: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_startup_pairs() {
        assert_eq!("40,30".parse::<Vec2>().unwrap(), Vec2::new(40.0, 30.0));
        assert_eq!(" 1.5 , -2 ".parse::<Vec2>().unwrap(), Vec2::new(1.5, -2.0));
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(matches!(
            "40".parse::<Vec2>(),
            Err(ParseVec2Error::Format(_))
        ));
        assert!(matches!(
            "a,1".parse::<Vec2>(),
            Err(ParseVec2Error::Component(_))
        ));
        assert!(matches!(
            "1,2,3".parse::<Vec2>(),
            Err(ParseVec2Error::Component(_))
        ));
    }

    #[test]
    fn display_matches_input_format() {
        let v = Vec2::new(2.5, -1.0);
        assert_eq!(v.to_string().parse::<Vec2>().unwrap(), v);
    }

    #[test]
    fn record_layout_is_six_floats() {
        assert_eq!(std::mem::size_of::<SharedState>(), 6 * std::mem::size_of::<f32>());
        assert_eq!(std::mem::offset_of!(SharedState, position), 0);
        assert_eq!(std::mem::offset_of!(SharedState, velocity), 8);
        assert_eq!(std::mem::offset_of!(SharedState, force), 16);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn segment_ends_with_the_mutex_handle() {
        assert_eq!(std::mem::offset_of!(SegmentLayout, state), 0);
        assert_eq!(std::mem::offset_of!(SegmentLayout, mutex_handle), 24);
        assert_eq!(std::mem::size_of::<SegmentLayout>(), 32);
    }
}
