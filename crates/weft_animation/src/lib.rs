//! Weft Animation
//!
//! Timelines, storyboards and the clock that plays them.
//!
//! # Features
//!
//! - **Easing**: quadratic, cubic and cubic-bezier curves
//! - **Timelines**: from/to and key frame animations of a single property
//! - **Storyboards**: timelines played together, with natural or explicit duration
//! - **Animation Clock**: deterministic `tick(dt)` playback with completion
//!   notifications and target hand-off between storyboards

pub mod clock;
pub mod easing;
pub mod error;
pub mod timeline;
pub mod values;

pub use clock::{AnimatedValue, AnimationClock, ClockId, ClockOutput};
pub use easing::Easing;
pub use error::{AnimationError, Result};
pub use timeline::{AnimationTarget, FillBehavior, KeyFrame, Storyboard, Timeline, TimelineValues};
pub use values::{interpolate, is_animatable, Interpolate};
