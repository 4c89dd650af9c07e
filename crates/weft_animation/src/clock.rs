//! Animation clock
//!
//! Plays storyboards against concrete `(node, property)` targets. The clock
//! never touches a property store itself: [`AnimationClock::begin`],
//! [`AnimationClock::tick`] and [`AnimationClock::stop`] accumulate a
//! [`ClockOutput`] that the owner drains and applies.
//!
//! A target belongs to the clock that most recently began animating it.
//! Older clocks keep running but stop producing values for targets they
//! lost, and stopping them doesn't release those targets.

use std::time::Duration;

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use weft_core::{NodeId, PropertyId, Value};

use crate::error::{AnimationError, Result};
use crate::timeline::{AnimationTarget, FillBehavior, Storyboard, Timeline};

new_key_type! {
    /// Handle to a running storyboard
    pub struct ClockId;
}

/// One animated property value produced by the clock
#[derive(Clone, Debug, PartialEq)]
pub struct AnimatedValue {
    pub node: NodeId,
    pub property: PropertyId,
    pub value: Value,
}

/// Everything the clock produced since the last drain, in order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClockOutput {
    pub values: Vec<AnimatedValue>,
    /// Clocks that reached the end of their duration
    pub completed: Vec<ClockId>,
    /// Targets no clock animates anymore
    pub released: Vec<(NodeId, PropertyId)>,
}

impl ClockOutput {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.completed.is_empty() && self.released.is_empty()
    }
}

struct ActiveTimeline {
    node: NodeId,
    timeline: Timeline,
    start: Value,
    base: Value,
}

struct ActiveStoryboard {
    timelines: Vec<ActiveTimeline>,
    elapsed: Duration,
    duration: Duration,
    completed: bool,
}

#[derive(Default)]
pub struct AnimationClock {
    clocks: SlotMap<ClockId, ActiveStoryboard>,
    owners: FxHashMap<(NodeId, PropertyId), ClockId>,
    output: ClockOutput,
}

impl AnimationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start playing `storyboard`
    ///
    /// `resolve` maps each timeline target to a node; `current` returns the
    /// property's effective and base value at that node. Fails without side
    /// effects if any target cannot be resolved.
    pub fn begin<R, V>(&mut self, storyboard: &Storyboard, mut resolve: R, mut current: V) -> Result<ClockId>
    where
        R: FnMut(&AnimationTarget) -> Option<NodeId>,
        V: FnMut(NodeId, PropertyId) -> (Value, Value),
    {
        let mut timelines = Vec::with_capacity(storyboard.children.len());
        for timeline in &storyboard.children {
            let node = resolve(&timeline.target).ok_or_else(|| {
                AnimationError::UnresolvedTarget(
                    timeline
                        .target
                        .target_name
                        .as_deref()
                        .unwrap_or("<element>")
                        .to_string(),
                )
            })?;
            let (start, base) = current(node, timeline.target.property);
            timelines.push(ActiveTimeline {
                node,
                timeline: timeline.clone(),
                start,
                base,
            });
        }

        let id = self.clocks.insert(ActiveStoryboard {
            timelines,
            elapsed: Duration::ZERO,
            duration: storyboard.effective_duration(),
            completed: false,
        });
        if let Some(active) = self.clocks.get(id) {
            for t in &active.timelines {
                self.owners.insert((t.node, t.timeline.target.property), id);
            }
        }
        tracing::debug!(?id, timelines = storyboard.children.len(), "animation clock: begin");

        self.advance(id, Duration::ZERO);
        Ok(id)
    }

    /// Advance every running storyboard by `dt`
    pub fn tick(&mut self, dt: Duration) {
        let ids: SmallVec<[ClockId; 8]> = self
            .clocks
            .iter()
            .filter(|(_, c)| !c.completed)
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            self.advance(id, dt);
        }
    }

    /// Stop a storyboard and release the targets it still owns
    pub fn stop(&mut self, id: ClockId) -> Result<()> {
        let active = self
            .clocks
            .remove(id)
            .ok_or(AnimationError::UnknownClock(id))?;
        for t in active.timelines {
            let key = (t.node, t.timeline.target.property);
            if self.owners.get(&key) == Some(&id) {
                self.owners.remove(&key);
                if !self.output.released.contains(&key) {
                    self.output.released.push(key);
                }
            }
        }
        tracing::debug!(?id, "animation clock: stop");
        Ok(())
    }

    pub fn is_running(&self, id: ClockId) -> bool {
        self.clocks.contains_key(id)
    }

    pub fn is_completed(&self, id: ClockId) -> bool {
        self.clocks.get(id).is_some_and(|c| c.completed)
    }

    /// Clock currently animating `(node, property)`
    pub fn owner(&self, node: NodeId, property: PropertyId) -> Option<ClockId> {
        self.owners.get(&(node, property)).copied()
    }

    pub fn active_count(&self) -> usize {
        self.clocks.len()
    }

    /// Take everything produced since the last drain
    pub fn drain(&mut self) -> ClockOutput {
        std::mem::take(&mut self.output)
    }

    fn advance(&mut self, id: ClockId, dt: Duration) {
        let Some(active) = self.clocks.get_mut(id) else {
            return;
        };
        active.elapsed = (active.elapsed + dt).min(active.duration);
        let finished = active.elapsed >= active.duration;

        for t in &active.timelines {
            let key = (t.node, t.timeline.target.property);
            if self.owners.get(&key) != Some(&id) {
                continue;
            }
            if let Some(value) = t.timeline.sample(active.elapsed, &t.start, &t.base) {
                self.output.values.push(AnimatedValue {
                    node: t.node,
                    property: key.1,
                    value,
                });
            }
        }

        if finished {
            active.completed = true;
            for t in &active.timelines {
                let key = (t.node, t.timeline.target.property);
                if t.timeline.fill == FillBehavior::Stop && self.owners.get(&key) == Some(&id) {
                    self.owners.remove(&key);
                    self.output.released.push(key);
                }
            }
            self.output.completed.push(id);
            tracing::trace!(?id, "animation clock: completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_core::{ElementTree, PropertyRegistry};

    struct Fixture {
        node: NodeId,
        opacity: PropertyId,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(PropertyRegistry::new());
        let wk = *registry.well_known();
        let mut tree = ElementTree::new(registry);
        Fixture {
            node: tree.create(wk.framework_element).unwrap(),
            opacity: wk.opacity,
        }
    }

    fn fade(f: &Fixture, to: f64, ms: u64) -> Storyboard {
        Storyboard::new().with_child(Timeline::to_value(
            AnimationTarget::node(f.node, f.opacity),
            to,
            Duration::from_millis(ms),
        ))
    }

    fn begin(clock: &mut AnimationClock, storyboard: &Storyboard) -> ClockId {
        clock
            .begin(
                storyboard,
                |t| t.node,
                |_, _| (Value::Float(1.0), Value::Float(1.0)),
            )
            .unwrap()
    }

    #[test]
    fn test_tick_and_complete() {
        let f = fixture();
        let mut clock = AnimationClock::new();
        let id = begin(&mut clock, &fade(&f, 0.0, 100));

        let out = clock.drain();
        assert_eq!(out.values[0].value, Value::Float(1.0));
        assert!(out.completed.is_empty());

        clock.tick(Duration::from_millis(50));
        assert_eq!(clock.drain().values[0].value, Value::Float(0.5));

        clock.tick(Duration::from_millis(80));
        let out = clock.drain();
        assert_eq!(out.values[0].value, Value::Float(0.0));
        assert_eq!(out.completed, vec![id]);
        // HoldEnd keeps the target until stopped
        assert!(out.released.is_empty());
        assert_eq!(clock.owner(f.node, f.opacity), Some(id));

        clock.tick(Duration::from_millis(10));
        assert!(clock.drain().is_empty());

        clock.stop(id).unwrap();
        assert_eq!(clock.drain().released, vec![(f.node, f.opacity)]);
        assert!(clock.stop(id).is_err());
    }

    #[test]
    fn test_zero_duration_completes_on_begin() {
        let f = fixture();
        let mut clock = AnimationClock::new();
        let id = begin(&mut clock, &fade(&f, 0.25, 0));
        let out = clock.drain();
        assert_eq!(out.values[0].value, Value::Float(0.25));
        assert_eq!(out.completed, vec![id]);
    }

    #[test]
    fn test_handoff_to_later_clock() {
        let f = fixture();
        let mut clock = AnimationClock::new();
        let first = begin(&mut clock, &fade(&f, 0.0, 100));
        let second = begin(&mut clock, &fade(&f, 0.5, 100));
        clock.drain();

        assert_eq!(clock.owner(f.node, f.opacity), Some(second));
        clock.tick(Duration::from_millis(10));
        assert_eq!(clock.drain().values.len(), 1);

        // The first clock lost the target, stopping it releases nothing
        clock.stop(first).unwrap();
        assert!(clock.drain().released.is_empty());
        clock.stop(second).unwrap();
        assert_eq!(clock.drain().released.len(), 1);
    }

    #[test]
    fn test_fill_stop_releases_on_completion() {
        let f = fixture();
        let mut clock = AnimationClock::new();
        let storyboard = Storyboard::new().with_child(
            Timeline::to_value(
                AnimationTarget::node(f.node, f.opacity),
                0.0,
                Duration::from_millis(10),
            )
            .with_fill(FillBehavior::Stop),
        );
        begin(&mut clock, &storyboard);
        clock.tick(Duration::from_millis(20));
        let out = clock.drain();
        assert_eq!(out.released, vec![(f.node, f.opacity)]);
        assert_eq!(clock.owner(f.node, f.opacity), None);
    }

    #[test]
    fn test_unresolved_target() {
        let f = fixture();
        let mut clock = AnimationClock::new();
        let storyboard = Storyboard::new().with_child(Timeline::to_value(
            AnimationTarget::named("Missing", f.opacity),
            0.0,
            Duration::from_millis(10),
        ));
        let result = clock.begin(&storyboard, |_| None, |_, _| (Value::Unset, Value::Unset));
        assert_eq!(
            result,
            Err(AnimationError::UnresolvedTarget("Missing".into()))
        );
        assert_eq!(clock.active_count(), 0);
    }
}
