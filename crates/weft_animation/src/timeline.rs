//! Timelines and storyboards
//!
//! A [`Timeline`] animates one property of one target between values, either
//! from/to or through key frames. A [`Storyboard`] groups timelines that play
//! together. Neither holds any runtime state; playing them is the job of the
//! [`AnimationClock`](crate::clock::AnimationClock).

use std::sync::Arc;
use std::time::Duration;

use weft_core::{NodeId, PropertyId, Value};

use crate::easing::Easing;
use crate::error::{AnimationError, Result};
use crate::values::interpolate;

/// What a timeline animates
///
/// `node` addresses an element directly; `target_name` is resolved against
/// the name scope the storyboard is begun in. With neither set the
/// storyboard's containing element is the target.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AnimationTarget {
    pub node: Option<NodeId>,
    pub target_name: Option<Arc<str>>,
    pub property: PropertyId,
}

impl AnimationTarget {
    pub fn property(property: PropertyId) -> Self {
        Self {
            node: None,
            target_name: None,
            property,
        }
    }

    pub fn named(name: &str, property: PropertyId) -> Self {
        Self {
            node: None,
            target_name: Some(Arc::from(name)),
            property,
        }
    }

    pub fn node(node: NodeId, property: PropertyId) -> Self {
        Self {
            node: Some(node),
            target_name: None,
            property,
        }
    }
}

/// What happens to the animated value once a timeline ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FillBehavior {
    /// Keep the final value until the storyboard is stopped
    #[default]
    HoldEnd,
    /// Release the property back to its base value
    Stop,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyFrame {
    /// Offset from the timeline's begin time
    pub key_time: Duration,
    pub value: Value,
    /// Easing of the segment ending at this frame
    pub easing: Easing,
}

impl KeyFrame {
    pub fn new(key_time: Duration, value: impl Into<Value>) -> Self {
        Self {
            key_time,
            value: value.into(),
            easing: Easing::Linear,
        }
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TimelineValues {
    /// Missing ends are taken from the property's current value
    FromTo {
        from: Option<Value>,
        to: Option<Value>,
    },
    KeyFrames(Vec<KeyFrame>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Timeline {
    pub target: AnimationTarget,
    pub values: TimelineValues,
    pub duration: Duration,
    pub begin_time: Duration,
    pub easing: Easing,
    pub fill: FillBehavior,
}

impl Timeline {
    /// Animate from the current value to `to`
    pub fn to_value(target: AnimationTarget, to: impl Into<Value>, duration: Duration) -> Self {
        Self::from_to(target, None, Some(to.into()), duration)
    }

    /// Animate from `from` back to the base value
    pub fn from_value(target: AnimationTarget, from: impl Into<Value>, duration: Duration) -> Self {
        Self::from_to(target, Some(from.into()), None, duration)
    }

    pub fn from_to(
        target: AnimationTarget,
        from: Option<Value>,
        to: Option<Value>,
        duration: Duration,
    ) -> Self {
        Self {
            target,
            values: TimelineValues::FromTo { from, to },
            duration,
            begin_time: Duration::ZERO,
            easing: Easing::Linear,
            fill: FillBehavior::HoldEnd,
        }
    }

    /// Key frame animation; frames are sorted by time and must fit in `duration`
    pub fn key_frames(
        target: AnimationTarget,
        mut frames: Vec<KeyFrame>,
        duration: Duration,
    ) -> Result<Self> {
        frames.sort_by_key(|f| f.key_time);
        if let Some(last) = frames.last() {
            if last.key_time > duration {
                return Err(AnimationError::InvalidKeyFrames(format!(
                    "key time {:?} exceeds duration {:?}",
                    last.key_time, duration
                )));
            }
        }
        Ok(Self {
            target,
            values: TimelineValues::KeyFrames(frames),
            duration,
            begin_time: Duration::ZERO,
            easing: Easing::Linear,
            fill: FillBehavior::HoldEnd,
        })
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn with_begin_time(mut self, begin_time: Duration) -> Self {
        self.begin_time = begin_time;
        self
    }

    pub fn with_fill(mut self, fill: FillBehavior) -> Self {
        self.fill = fill;
        self
    }

    /// Time at which the timeline is finished
    pub fn end_time(&self) -> Duration {
        self.begin_time + self.duration
    }

    /// Explicit `to` value (or last key frame)
    pub fn final_value(&self) -> Option<&Value> {
        match &self.values {
            TimelineValues::FromTo { to, .. } => to.as_ref(),
            TimelineValues::KeyFrames(frames) => frames.last().map(|f| &f.value),
        }
    }

    /// Value at `elapsed` since the storyboard began
    ///
    /// `start` is the property value when the timeline began and `base` its
    /// current un-animated value. Returns `None` before the begin time.
    pub fn sample(&self, elapsed: Duration, start: &Value, base: &Value) -> Option<Value> {
        if elapsed < self.begin_time {
            return None;
        }
        let local = elapsed - self.begin_time;

        match &self.values {
            TimelineValues::FromTo { from, to } => {
                let progress = progress(local, self.duration);
                let from = from.as_ref().unwrap_or(start);
                let to = to.as_ref().unwrap_or(base);
                Some(interpolate(from, to, self.easing.apply(progress)))
            }
            TimelineValues::KeyFrames(frames) => {
                let mut previous_time = Duration::ZERO;
                let mut previous_value = start;
                for frame in frames {
                    if local <= frame.key_time {
                        let span = frame.key_time - previous_time;
                        let t = progress(local - previous_time, span);
                        return Some(interpolate(
                            previous_value,
                            &frame.value,
                            frame.easing.apply(t),
                        ));
                    }
                    previous_time = frame.key_time;
                    previous_value = &frame.value;
                }
                Some(previous_value.clone())
            }
        }
    }
}

fn progress(elapsed: Duration, duration: Duration) -> f32 {
    if duration.is_zero() {
        1.0
    } else {
        (elapsed.as_nanos() as f64 / duration.as_nanos() as f64).clamp(0.0, 1.0) as f32
    }
}

/// Timelines played together
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Storyboard {
    pub children: Vec<Timeline>,
    /// Overrides the natural duration when set
    pub duration: Option<Duration>,
}

impl Storyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_child(mut self, timeline: Timeline) -> Self {
        self.children.push(timeline);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn push(&mut self, timeline: Timeline) {
        self.children.push(timeline);
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// End of the longest child
    pub fn natural_duration(&self) -> Duration {
        self.children
            .iter()
            .map(Timeline::end_time)
            .max()
            .unwrap_or(Duration::ZERO)
    }

    pub fn effective_duration(&self) -> Duration {
        self.duration.unwrap_or_else(|| self.natural_duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::PropertyRegistry;

    fn opacity() -> PropertyId {
        PropertyRegistry::new().well_known().opacity
    }

    #[test]
    fn test_from_to_sampling() {
        let timeline = Timeline::to_value(
            AnimationTarget::property(opacity()),
            0.0,
            Duration::from_millis(100),
        )
        .with_begin_time(Duration::from_millis(50));

        let start = Value::Float(1.0);
        assert_eq!(timeline.sample(Duration::from_millis(10), &start, &start), None);
        assert_eq!(
            timeline.sample(Duration::from_millis(100), &start, &start),
            Some(Value::Float(0.5))
        );
        assert_eq!(
            timeline.sample(Duration::from_millis(500), &start, &start),
            Some(Value::Float(0.0))
        );
        assert_eq!(timeline.end_time(), Duration::from_millis(150));
    }

    #[test]
    fn test_from_animation_returns_to_base() {
        let timeline = Timeline::from_value(
            AnimationTarget::property(opacity()),
            0.2,
            Duration::from_millis(100),
        );
        let base = Value::Float(1.0);
        assert_eq!(
            timeline.sample(Duration::from_millis(100), &Value::Float(0.0), &base),
            Some(base)
        );
    }

    #[test]
    fn test_key_frames() {
        let timeline = Timeline::key_frames(
            AnimationTarget::property(opacity()),
            vec![
                KeyFrame::new(Duration::from_millis(100), 1.0),
                KeyFrame::new(Duration::from_millis(0), 0.0),
            ],
            Duration::from_millis(100),
        )
        .unwrap();
        let start = Value::Float(0.5);
        assert_eq!(
            timeline.sample(Duration::ZERO, &start, &start),
            Some(Value::Float(0.0))
        );
        assert_eq!(
            timeline.sample(Duration::from_millis(50), &start, &start),
            Some(Value::Float(0.5))
        );
        assert_eq!(timeline.final_value(), Some(&Value::Float(1.0)));

        assert!(Timeline::key_frames(
            AnimationTarget::property(opacity()),
            vec![KeyFrame::new(Duration::from_millis(200), 1.0)],
            Duration::from_millis(100),
        )
        .is_err());
    }

    #[test]
    fn test_storyboard_duration() {
        let target = AnimationTarget::property(opacity());
        let storyboard = Storyboard::new()
            .with_child(Timeline::to_value(target.clone(), 1.0, Duration::from_millis(100)))
            .with_child(
                Timeline::to_value(target, 0.0, Duration::from_millis(100))
                    .with_begin_time(Duration::from_millis(150)),
            );
        assert_eq!(storyboard.natural_duration(), Duration::from_millis(250));
        assert_eq!(
            storyboard
                .with_duration(Duration::from_millis(10))
                .effective_duration(),
            Duration::from_millis(10)
        );
    }
}
