//! Visual state manager
//!
//! A [`VisualStateGroup`] holds mutually exclusive [`VisualState`]s and the
//! [`VisualTransition`]s between them. Groups live on a holder element,
//! usually the root of a control's template; [`Framework::go_to_state`]
//! finds them through the control's template root.
//!
//! Changing state picks the most specific transition, then either swaps
//! storyboards at once or plays a generated storyboard that animates every
//! affected property towards the new state. In the second case the new
//! state's own storyboard starts, and `CurrentStateChanged` fires, once the
//! transition completes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use weft_animation::{AnimationTarget, ClockId, Easing, Storyboard, Timeline};
use weft_core::{NodeId, StoryboardHandoff};

use crate::error::{Result, StyleError};
use crate::framework::Framework;

/// Listener for `CurrentStateChanging` / `CurrentStateChanged`
pub type VisualStateChangedHandler = Arc<dyn Fn(&mut Framework, &VisualStateChangedArgs) + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct VisualStateChangedArgs {
    pub group: Arc<str>,
    pub old_state: Option<Arc<str>>,
    pub new_state: Arc<str>,
    /// Element the state change was requested for
    pub control: NodeId,
    /// Element holding the state groups
    pub holder: NodeId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisualState {
    name: Arc<str>,
    storyboard: Option<Storyboard>,
}

impl VisualState {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            storyboard: None,
        }
    }

    pub fn with_storyboard(mut self, storyboard: Storyboard) -> Self {
        self.storyboard = Some(storyboard);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storyboard(&self) -> Option<&Storyboard> {
        self.storyboard.as_ref()
    }
}

/// How to move between two states
///
/// Unset `from`/`to` match any state. The generated storyboard animates
/// every property the states disagree on over `generated_duration`; the
/// explicit storyboard, if any, plays alongside it and owns the targets it
/// animates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisualTransition {
    from: Option<Arc<str>>,
    to: Option<Arc<str>>,
    generated_duration: Duration,
    generated_easing: Easing,
    storyboard: Option<Storyboard>,
}

impl VisualTransition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, state: &str) -> Self {
        self.from = Some(Arc::from(state));
        self
    }

    pub fn to(mut self, state: &str) -> Self {
        self.to = Some(Arc::from(state));
        self
    }

    pub fn with_generated_duration(mut self, duration: Duration) -> Self {
        self.generated_duration = duration;
        self
    }

    pub fn with_generated_easing(mut self, easing: Easing) -> Self {
        self.generated_easing = easing;
        self
    }

    pub fn with_storyboard(mut self, storyboard: Storyboard) -> Self {
        self.storyboard = Some(storyboard);
        self
    }

    pub fn from_state(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn to_state(&self) -> Option<&str> {
        self.to.as_deref()
    }

    pub fn generated_duration(&self) -> Duration {
        self.generated_duration
    }

    /// Match score for `from → to`: `to` counts double, a mismatch excludes
    fn score(&self, from: Option<&str>, to: &str) -> Option<u8> {
        let mut score = 0;
        if let Some(wanted) = self.from.as_deref() {
            if from != Some(wanted) {
                return None;
            }
            score += 1;
        }
        if let Some(wanted) = self.to.as_deref() {
            if wanted != to {
                return None;
            }
            score += 2;
        }
        Some(score)
    }
}

#[derive(Clone, Default)]
pub struct VisualStateGroup {
    name: Arc<str>,
    states: Vec<VisualState>,
    transitions: Vec<VisualTransition>,
    changing: Vec<VisualStateChangedHandler>,
    changed: Vec<VisualStateChangedHandler>,
}

impl fmt::Debug for VisualStateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualStateGroup")
            .field("name", &self.name)
            .field("states", &self.states)
            .field("transitions", &self.transitions)
            .finish()
    }
}

impl VisualStateGroup {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: VisualState) -> Self {
        self.states.push(state);
        self
    }

    pub fn with_transition(mut self, transition: VisualTransition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn on_current_state_changing(mut self, handler: VisualStateChangedHandler) -> Self {
        self.changing.push(handler);
        self
    }

    pub fn on_current_state_changed(mut self, handler: VisualStateChangedHandler) -> Self {
        self.changed.push(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[VisualState] {
        &self.states
    }

    pub fn state(&self, name: &str) -> Option<&VisualState> {
        self.states.iter().find(|s| &*s.name == name)
    }

    pub fn transitions(&self) -> &[VisualTransition] {
        &self.transitions
    }

    /// Most specific transition from `from` to `to`; the first one wins a tie
    pub fn best_transition(&self, from: Option<&str>, to: &str) -> Option<&VisualTransition> {
        let mut best: Option<(u8, &VisualTransition)> = None;
        for transition in &self.transitions {
            let Some(score) = transition.score(from, to) else {
                continue;
            };
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, transition));
            }
        }
        best.map(|(_, transition)| transition)
    }
}

/// A group installed on a holder element
pub(crate) struct GroupInstance {
    pub(crate) def: Arc<VisualStateGroup>,
    pub(crate) current: Option<Arc<str>>,
    pub(crate) state_clock: Option<ClockId>,
    pub(crate) transition_clocks: SmallVec<[ClockId; 2]>,
    /// What the clocks above are playing
    state_storyboard: Option<Storyboard>,
    transition_storyboards: SmallVec<[Storyboard; 2]>,
    /// Bumped by every state change; a transition finishing with an older
    /// generation was superseded
    pub(crate) generation: u64,
}

impl GroupInstance {
    fn new(def: Arc<VisualStateGroup>) -> Self {
        Self {
            def,
            current: None,
            state_clock: None,
            transition_clocks: SmallVec::new(),
            state_storyboard: None,
            transition_storyboards: SmallVec::new(),
            generation: 0,
        }
    }

    /// Storyboards of the clocks currently held by the group
    fn running_storyboards(&self) -> SmallVec<[Storyboard; 3]> {
        self.transition_storyboards
            .iter()
            .chain(self.state_storyboard.as_ref())
            .cloned()
            .collect()
    }

    fn set_state_clock(&mut self, clock: Option<ClockId>, storyboard: Option<Storyboard>) {
        self.state_storyboard = clock.and(storyboard);
        self.state_clock = clock;
    }

    fn take_clocks(&mut self) -> SmallVec<[ClockId; 3]> {
        self.transition_storyboards.clear();
        self.state_storyboard = None;
        let mut clocks: SmallVec<[ClockId; 3]> = self.transition_clocks.drain(..).collect();
        clocks.extend(self.state_clock.take());
        clocks
    }
}

/// A transition waiting for its storyboards to complete
pub(crate) struct PendingTransition {
    pub(crate) holder: NodeId,
    pub(crate) control: NodeId,
    group: usize,
    generation: u64,
    clocks: SmallVec<[ClockId; 2]>,
    state: Arc<str>,
    args: VisualStateChangedArgs,
}

impl Framework {
    /// Install `group` on `holder`
    pub fn add_visual_state_group(&mut self, holder: NodeId, group: VisualStateGroup) -> Result<()> {
        self.install_visual_state_group(holder, Arc::new(group))
    }

    pub(crate) fn install_visual_state_group(&mut self, holder: NodeId, group: Arc<VisualStateGroup>) -> Result<()> {
        tracing::trace!(?holder, group = %group.name, "visual state group installed");
        self.state_mut(holder)?
            .visual_state_groups
            .push(GroupInstance::new(group));
        Ok(())
    }

    pub fn visual_state_groups(&self, holder: NodeId) -> Vec<Arc<VisualStateGroup>> {
        self.state(holder)
            .map(|s| s.visual_state_groups.iter().map(|g| g.def.clone()).collect())
            .unwrap_or_default()
    }

    /// Current (requested) state of the group named `group` on `holder`
    pub fn current_state(&self, holder: NodeId, group: &str) -> Option<Arc<str>> {
        self.state(holder)?
            .visual_state_groups
            .iter()
            .find(|g| &*g.def.name == group)?
            .current
            .clone()
    }

    /// Move `control` to `state`, looking the state up in the groups of its
    /// template root
    ///
    /// Returns `Ok(false)` when the control has no template root or the root
    /// has no state groups.
    pub fn go_to_state(&mut self, control: NodeId, state: &str, use_transitions: bool) -> Result<bool> {
        self.ensure_node(control)?;
        let Some(root) = self.template_root(control) else {
            return Ok(false);
        };
        self.change_state(control, root, state, use_transitions)
    }

    /// Move `holder` to `state` using the groups installed on it directly
    pub fn go_to_element_state(&mut self, holder: NodeId, state: &str, use_transitions: bool) -> Result<bool> {
        self.ensure_node(holder)?;
        self.change_state(holder, holder, state, use_transitions)
    }

    fn change_state(&mut self, control: NodeId, holder: NodeId, name: &str, use_transitions: bool) -> Result<bool> {
        let groups = match self.state(holder) {
            Some(s) if !s.visual_state_groups.is_empty() => &s.visual_state_groups,
            _ => return Ok(false),
        };
        let Some((index, state)) = groups
            .iter()
            .enumerate()
            .find_map(|(i, g)| g.def.state(name).map(|s| (i, s.clone())))
        else {
            return Err(StyleError::StateNotFound(name.to_string()));
        };
        let group = &groups[index];
        if group.current.as_deref() == Some(name) {
            return Ok(true);
        }
        let def = group.def.clone();
        let old_state = group.current.clone();
        let transition = if use_transitions {
            def.best_transition(old_state.as_deref(), name).cloned()
        } else {
            None
        };
        let args = VisualStateChangedArgs {
            group: def.name.clone(),
            old_state: old_state.clone(),
            new_state: state.name.clone(),
            control,
            holder,
        };
        tracing::debug!(?holder, group = %def.name, from = ?old_state, to = name, "changing visual state");

        for handler in &def.changing {
            handler(self, &args);
        }

        self.transitions
            .retain(|t| !(t.holder == holder && t.group == index));
        let instance = self.group_instance_mut(holder, index)?;
        instance.generation += 1;
        instance.current = Some(state.name.clone());
        let generation = instance.generation;
        let running = instance.running_storyboards();
        let old_clocks = instance.take_clocks();

        let explicit = transition.as_ref().and_then(|t| t.storyboard.clone());
        let duration = transition
            .as_ref()
            .map_or(Duration::ZERO, |t| t.generated_duration);

        if duration.is_zero() && explicit.is_none() {
            let clock = self.hand_off(holder, state.storyboard.as_ref(), &old_clocks)?;
            self.group_instance_mut(holder, index)?
                .set_state_clock(clock, state.storyboard.clone());
            for handler in &def.changed {
                handler(self, &args);
            }
            return Ok(true);
        }

        let generated = generate_transition(
            &running,
            state.storyboard.as_ref(),
            transition.as_ref(),
            duration,
        );
        let mut clocks: SmallVec<[ClockId; 2]> = SmallVec::new();
        clocks.push(self.begin_clock(holder, holder, &generated)?);
        if let Some(storyboard) = &explicit {
            clocks.push(self.begin_clock(holder, holder, storyboard)?);
        }
        self.stop_clocks(&old_clocks)?;
        let instance = self.group_instance_mut(holder, index)?;
        instance.transition_clocks = clocks.clone();
        instance.transition_storyboards = std::iter::once(generated).chain(explicit).collect();
        self.transitions.push(PendingTransition {
            holder,
            control,
            group: index,
            generation,
            clocks,
            state: state.name.clone(),
            args,
        });
        self.apply_clock_output()?;
        // A zero-length transition completes at once
        self.poll_transitions()?;
        Ok(true)
    }

    /// Finish transitions whose storyboards all completed
    pub(crate) fn poll_transitions(&mut self) -> Result<()> {
        if self.transitions.is_empty() {
            return Ok(());
        }
        let clock = &self.clock;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.transitions)
            .into_iter()
            .partition(|t| {
                t.clocks
                    .iter()
                    .all(|c| !clock.is_running(*c) || clock.is_completed(*c))
            });
        self.transitions = waiting;
        for pending in ready {
            self.finish_transition(pending)?;
        }
        Ok(())
    }

    fn finish_transition(&mut self, pending: PendingTransition) -> Result<()> {
        let Some(group) = self
            .state(pending.holder)
            .and_then(|s| s.visual_state_groups.get(pending.group))
        else {
            return Ok(());
        };
        if group.generation != pending.generation {
            return Ok(());
        }
        let def = group.def.clone();

        if self.is_visually_live(pending.holder) && self.tree.contains(pending.control) {
            let storyboard = def.state(&pending.state).and_then(|s| s.storyboard.clone());
            let old = {
                let instance = self.group_instance_mut(pending.holder, pending.group)?;
                instance.transition_storyboards.clear();
                instance.transition_clocks.drain(..).collect::<SmallVec<[ClockId; 2]>>()
            };
            let clock = self.hand_off(pending.holder, storyboard.as_ref(), &old)?;
            self.group_instance_mut(pending.holder, pending.group)?
                .set_state_clock(clock, storyboard);
        } else {
            tracing::debug!(holder = ?pending.holder, state = %pending.state, "element left the tree before its state storyboard");
        }

        for handler in &def.changed {
            handler(self, &pending.args);
        }
        Ok(())
    }

    /// Replace `old` clocks with a clock playing `storyboard`, in the
    /// configured order
    fn hand_off(&mut self, holder: NodeId, storyboard: Option<&Storyboard>, old: &[ClockId]) -> Result<Option<ClockId>> {
        let clock = match self.config.compatibility.state_storyboard_handoff {
            StoryboardHandoff::StartNewThenStopOld => {
                let clock = storyboard
                    .map(|sb| self.begin_clock(holder, holder, sb))
                    .transpose()?;
                self.stop_clocks(old)?;
                clock
            }
            StoryboardHandoff::StopOldThenStartNew => {
                self.stop_clocks(old)?;
                self.apply_clock_output()?;
                storyboard
                    .map(|sb| self.begin_clock(holder, holder, sb))
                    .transpose()?
            }
        };
        self.apply_clock_output()?;
        Ok(clock)
    }

    fn stop_clocks(&mut self, clocks: &[ClockId]) -> Result<()> {
        for clock in clocks {
            if self.clock.is_running(*clock) {
                self.clock.stop(*clock)?;
            }
        }
        Ok(())
    }

    /// Stop every state and transition storyboard of groups on `holder`
    pub(crate) fn stop_visual_state_clocks(&mut self, holder: NodeId) -> Result<()> {
        let Some(state) = self.nodes.get_mut(holder) else {
            return Ok(());
        };
        let clocks: SmallVec<[ClockId; 4]> = state
            .visual_state_groups
            .iter_mut()
            .flat_map(GroupInstance::take_clocks)
            .collect();
        self.transitions.retain(|t| t.holder != holder);
        self.stop_clocks(&clocks)
    }

    fn group_instance_mut(&mut self, holder: NodeId, index: usize) -> Result<&mut GroupInstance> {
        self.state_mut(holder)?
            .visual_state_groups
            .get_mut(index)
            .ok_or_else(|| StyleError::StateNotFound(format!("group #{index}")))
    }

    /// Connected to a presentation root and visible
    fn is_visually_live(&self, node: NodeId) -> bool {
        let wk = self.registry.well_known();
        self.tree.is_connected_to_presentation_source(node)
            && self.tree.get_value(node, wk.visibility).as_str() == Some("Visible")
    }
}

/// Storyboard moving every property the running storyboards or the target
/// state animate towards the target state, leaving out what the explicit
/// transition storyboard owns
fn generate_transition(
    running: &[Storyboard],
    target: Option<&Storyboard>,
    transition: Option<&VisualTransition>,
    duration: Duration,
) -> Storyboard {
    let owned: FxHashSet<&AnimationTarget> = transition
        .and_then(|t| t.storyboard.as_ref())
        .map(|sb| sb.children.iter().map(|t| &t.target).collect())
        .unwrap_or_default();
    let easing = transition.map_or(Easing::Linear, |t| t.generated_easing);

    let mut generated = Storyboard::new().with_duration(duration);
    let mut covered: FxHashSet<&AnimationTarget> = FxHashSet::default();
    for timeline in target.into_iter().flat_map(|sb| sb.children.iter()) {
        if owned.contains(&timeline.target) || !covered.insert(&timeline.target) {
            continue;
        }
        if let Some(to) = timeline.final_value() {
            generated.push(Timeline::to_value(timeline.target.clone(), to.clone(), duration).with_easing(easing));
        }
    }
    // Properties only the running storyboards animated ease back to their
    // base value
    for timeline in running.iter().flat_map(|sb| sb.children.iter()) {
        if owned.contains(&timeline.target) || !covered.insert(&timeline.target) {
            continue;
        }
        generated.push(Timeline::from_to(timeline.target.clone(), None, None, duration).with_easing(easing));
    }
    generated
}
