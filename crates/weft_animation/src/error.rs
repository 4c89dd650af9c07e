//! Animation error types

use thiserror::Error;

use crate::clock::ClockId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnimationError {
    /// A timeline names a target that could not be found
    #[error("Animation target '{0}' could not be resolved")]
    UnresolvedTarget(String),

    /// The clock handle is stale
    #[error("Animation clock {0:?} is not running")]
    UnknownClock(ClockId),

    /// Key frames must be ordered and fall within the timeline duration
    #[error("Invalid key frames: {0}")]
    InvalidKeyFrames(String),
}

pub type Result<T> = std::result::Result<T, AnimationError>;
