//! Render window child process.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// How the map window is launched.
///
/// The write end of the map-size pipe is appended to `command` as its final
/// argument (decimal descriptor number).
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Program and leading arguments.
    #[validate(custom(function = validation::validate_command))]
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

fn default_command() -> Vec<String> {
    vec!["konsole".into(), "-e".into(), "./map_window".into()]
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
        }
    }
}
