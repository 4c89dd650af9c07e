//! Applying compiled tables to nodes
//!
//! A style (or theme style) instance writes its plain values at the
//! style's setter source and its trigger values at the trigger source. A
//! template instance does the same for every slot of its generated tree.
//! The same code evaluates triggers for all three roles; only the mapping
//! from slot to node differs.

use std::sync::Arc;

use slotmap::SecondaryMap;
use smallvec::SmallVec;
use weft_animation::{AnimationTarget, Storyboard};
use weft_core::{BaseValueSource, ElementTree, NodeId, PropertyId, Value};

use super::{BegunStoryboard, Framework, NodeState};
use crate::compiler::{CompiledConditionSource, CompiledTables, CompiledTrigger, CompiledValue, TableRole};
use crate::error::{Result, StyleError};
use crate::events::RoutedEvent;
use crate::resources::ResourceKey;
use crate::style::Style;
use crate::trigger::TriggerAction;

/// A sealed style applied to one node
pub(crate) struct StyleInstance {
    pub(crate) style: Style,
    pub(crate) tables: Arc<CompiledTables>,
    /// Activation state per compiled trigger
    pub(crate) active: Vec<bool>,
    /// Found by type rather than set explicitly
    pub(crate) implicit: bool,
}

impl Framework {
    // =========================================================================
    // Style selection
    // =========================================================================

    /// Apply whatever the `Style` property now holds
    pub(crate) fn update_style(&mut self, node: NodeId) -> Result<()> {
        let wk = *self.registry.well_known();
        let value = self.tree.get_value(node, wk.style);
        let implicit = self.tree.value_source(node, wk.style) == BaseValueSource::ImplicitStyleReference;
        self.apply_style(node, TableRole::Style, Style::from_value(&value), implicit)
    }

    pub(crate) fn update_theme_style(&mut self, node: NodeId) -> Result<()> {
        if !self.is_framework_object(node) {
            return Ok(());
        }
        let Some(type_key) = self.tree.type_of(node) else {
            return Ok(());
        };
        let style = self.theme.theme_style(&self.registry, type_key)?;
        self.apply_style(node, TableRole::ThemeStyle, style, true)
    }

    /// Look up the implicit style for `node` starting at its parent
    ///
    /// Does nothing when a higher value source sets `Style`.
    pub(crate) fn refresh_implicit_style(&mut self, node: NodeId) -> Result<()> {
        if !self.is_framework_object(node) {
            return Ok(());
        }
        let wk = *self.registry.well_known();
        if self.tree.value_source(node, wk.style) > BaseValueSource::ImplicitStyleReference {
            return Ok(());
        }
        let Some(type_key) = self.tree.type_of(node) else {
            return Ok(());
        };
        let key = ResourceKey::Type(type_key);
        let found = match self.tree.inheritance_parent(node) {
            Some(parent) => self.find_resource_excluding_theme(parent, &key)?,
            None => self.application_resources.get(&key)?,
        };
        let style = found.filter(|v| Style::from_value(v).is_some());
        self.write(node, wk.style, BaseValueSource::ImplicitStyleReference, style)
    }

    fn apply_style(
        &mut self,
        node: NodeId,
        role: TableRole,
        style: Option<Style>,
        implicit: bool,
    ) -> Result<()> {
        let current = self
            .state(node)
            .and_then(|s| style_slot(s, role).as_ref())
            .map(|i| i.style.clone());
        match (&current, &style) {
            (Some(a), Some(b)) if a.ptr_eq(b) => return Ok(()),
            (None, None) => return Ok(()),
            _ => {}
        }

        if let Some(style) = &style {
            if let (Some(target), Some(element)) = (style.target_type(), self.tree.type_of(node)) {
                if !self.registry.is_assignable_from(target, element) {
                    return Err(StyleError::StyleTargetTypeMismatch {
                        style_target: self.registry.type_name(target).to_string(),
                        element: self.registry.type_name(element).to_string(),
                    });
                }
            }
            style.seal(&self.registry)?;
        }

        self.detach_style(node, role)?;
        let Some(style) = style else {
            return Ok(());
        };
        let Some(tables) = style.compiled() else {
            return Ok(());
        };
        tracing::debug!(?node, ?role, style = style.global_index(), implicit, "applying style");

        let trigger_count = tables.trigger_count();
        *style_slot_mut(self.state_mut(node)?, role) = Some(StyleInstance {
            style,
            tables: tables.clone(),
            active: vec![false; trigger_count],
            implicit,
        });

        if let Some(slot) = tables.slots.first() {
            let plain: Vec<(PropertyId, CompiledValue)> = slot
                .properties
                .iter()
                .filter_map(|(p, r)| r.value.clone().map(|v| (*p, v)))
                .collect();
            for (property, value) in plain {
                let value = self.resolve_compiled(node, node, role, &value)?;
                self.write(node, property, role.setter_source(), value)?;
            }
        }
        self.install_event_setters(node, role)?;
        let all: Vec<usize> = (0..trigger_count).collect();
        self.evaluate_triggers(node, role, &all)
    }

    fn detach_style(&mut self, node: NodeId, role: TableRole) -> Result<()> {
        let Some(instance) = self
            .nodes
            .get_mut(node)
            .and_then(|s| style_slot_mut(s, role).take())
        else {
            return Ok(());
        };
        tracing::debug!(?node, ?role, style = instance.style.global_index(), "detaching style");
        self.stop_storyboards(node, Some(role))?;
        self.remove_event_setters(node, role);
        if let Some(slot) = instance.tables.slots.first() {
            for (property, record) in &slot.properties {
                self.write(node, *property, role.setter_source(), None)?;
                if !record.triggered.is_empty() {
                    self.write(node, *property, role.trigger_source(0), None)?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Tables
    // =========================================================================

    pub(crate) fn applied_tables(&self, node: NodeId, role: TableRole) -> Option<Arc<CompiledTables>> {
        let state = self.state(node)?;
        match role {
            TableRole::Style | TableRole::ThemeStyle => {
                style_slot(state, role).as_ref().map(|i| i.tables.clone())
            }
            TableRole::Template => state.template.as_ref().map(|t| t.sealed.tables().clone()),
        }
    }

    fn active_flags(&self, host: NodeId, role: TableRole) -> Option<&Vec<bool>> {
        let state = self.state(host)?;
        match role {
            TableRole::Style | TableRole::ThemeStyle => style_slot(state, role).as_ref().map(|i| &i.active),
            TableRole::Template => state.template.as_ref().map(|t| &t.active),
        }
    }

    fn active_flags_mut(&mut self, host: NodeId, role: TableRole) -> Option<&mut Vec<bool>> {
        let state = self.nodes.get_mut(host)?;
        match role {
            TableRole::Style | TableRole::ThemeStyle => {
                style_slot_mut(state, role).as_mut().map(|i| &mut i.active)
            }
            TableRole::Template => state.template.as_mut().map(|t| &mut t.active),
        }
    }

    /// Node a slot of `host`'s table refers to
    pub(crate) fn slot_node(&self, host: NodeId, role: TableRole, slot: usize) -> Option<NodeId> {
        match role {
            TableRole::Style | TableRole::ThemeStyle => (slot == 0).then_some(host),
            TableRole::Template => self.state(host)?.template.as_ref()?.slot_node(slot),
        }
    }

    /// Resolve a compiled value for `target`
    ///
    /// `Ok(None)` means the entry contributes no value: an unset template
    /// binding or a missing dynamic resource.
    pub(crate) fn resolve_compiled(
        &self,
        target: NodeId,
        host: NodeId,
        role: TableRole,
        value: &CompiledValue,
    ) -> Result<Option<Value>> {
        match value {
            CompiledValue::Shared(value) => Ok(Some(value.clone())),
            CompiledValue::PerInstance(prototype) => Ok(Some(CompiledValue::instantiate_object(prototype))),
            CompiledValue::TemplateBinding(source) => {
                let parent = match role {
                    TableRole::Template => Some(host),
                    _ => self.templated_parent(target),
                };
                Ok(parent
                    .map(|p| self.tree.get_value(p, *source))
                    .filter(|v| !v.is_unset()))
            }
            CompiledValue::StaticResource(key) => self
                .find_resource(target, key)?
                .map(Some)
                .ok_or_else(|| StyleError::ResourceNotFound(key.to_string())),
            CompiledValue::DynamicResource(key) => self.find_resource(target, key),
        }
    }

    /// Re-resolve the plain and triggered values of one table entry
    pub(crate) fn refresh_slot_property(
        &mut self,
        host: NodeId,
        role: TableRole,
        slot: usize,
        property: PropertyId,
    ) -> Result<()> {
        let Some(tables) = self.applied_tables(host, role) else {
            return Ok(());
        };
        let Some(target) = self.slot_node(host, role, slot) else {
            return Ok(());
        };
        let Some(record) = tables.record(slot, property) else {
            return Ok(());
        };
        if let Some(value) = &record.value {
            let value = self.resolve_compiled(target, host, role, value)?;
            self.write(target, property, role.setter_source(), value)?;
        }
        if !record.triggered.is_empty() {
            self.apply_trigger_winner(host, role, &tables, slot, property)?;
        }
        Ok(())
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Re-evaluate the given triggers of `host`'s table for `role`
    pub(crate) fn evaluate_triggers(&mut self, host: NodeId, role: TableRole, indices: &[usize]) -> Result<()> {
        let Some(tables) = self.applied_tables(host, role) else {
            return Ok(());
        };
        let mut targets: SmallVec<[(usize, PropertyId); 4]> = SmallVec::new();
        let mut entered: SmallVec<[usize; 2]> = SmallVec::new();
        let mut exited: SmallVec<[usize; 2]> = SmallVec::new();

        for &index in indices {
            let Some(trigger) = tables.triggers.get(index) else {
                continue;
            };
            if trigger.event.is_some() {
                continue;
            }
            let now = self.conditions_hold(host, role, trigger);
            let Some(flag) = self.active_flags_mut(host, role).and_then(|a| a.get_mut(index)) else {
                continue;
            };
            if *flag == now {
                continue;
            }
            *flag = now;
            tracing::debug!(?host, ?role, trigger = index, active = now, "trigger activation changed");
            for target in &trigger.targets {
                if !targets.contains(target) {
                    targets.push(*target);
                }
            }
            if now {
                entered.push(index);
            } else {
                exited.push(index);
            }
        }

        for (slot, property) in targets {
            self.apply_trigger_winner(host, role, &tables, slot, property)?;
        }
        for index in exited {
            self.run_actions(host, role, &tables.triggers[index].exit_actions)?;
        }
        for index in entered {
            self.run_actions(host, role, &tables.triggers[index].enter_actions)?;
        }
        Ok(())
    }

    fn conditions_hold(&self, host: NodeId, role: TableRole, trigger: &CompiledTrigger) -> bool {
        trigger.conditions.iter().all(|condition| {
            let Some(node) = self.slot_node(host, role, condition.slot) else {
                return false;
            };
            let value = match &condition.source {
                CompiledConditionSource::Property(property) => self.tree.get_value(node, *property),
                CompiledConditionSource::Binding(binding) => binding.evaluate(self, node),
            };
            value == condition.value
        })
    }

    /// Write the value of the last active trigger setting `(slot, property)`,
    /// or clear the trigger layer when none is active
    fn apply_trigger_winner(
        &mut self,
        host: NodeId,
        role: TableRole,
        tables: &CompiledTables,
        slot: usize,
        property: PropertyId,
    ) -> Result<()> {
        let Some(target) = self.slot_node(host, role, slot) else {
            return Ok(());
        };
        let Some(record) = tables.record(slot, property) else {
            return Ok(());
        };
        let winner = self.active_flags(host, role).and_then(|active| {
            record
                .triggered
                .iter()
                .rev()
                .find(|(index, _)| active.get(*index).copied().unwrap_or(false))
                .map(|(_, value)| value.clone())
        });
        let value = match winner {
            Some(value) => self.resolve_compiled(target, host, role, &value)?,
            None => None,
        };
        self.write(target, property, role.trigger_source(slot), value)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    pub(crate) fn run_actions(&mut self, host: NodeId, role: TableRole, actions: &[TriggerAction]) -> Result<()> {
        for action in actions {
            match action {
                TriggerAction::BeginStoryboard { name, storyboard } => {
                    self.begin_storyboard(host, role, name.clone(), storyboard)?;
                }
                TriggerAction::StopStoryboard { name } => {
                    self.stop_named_storyboard(host, role, name)?;
                }
            }
        }
        Ok(())
    }

    fn begin_storyboard(
        &mut self,
        host: NodeId,
        role: TableRole,
        name: Option<Arc<str>>,
        storyboard: &Storyboard,
    ) -> Result<()> {
        if let Some(name) = &name {
            self.stop_named_storyboard(host, role, name)?;
        }
        let clock = self.begin_clock(host, host, storyboard)?;
        self.state_mut(host)?.storyboards.push(BegunStoryboard { name, clock, role });
        self.apply_clock_output()
    }

    /// Begin `storyboard` with names resolved in `scope`'s template and
    /// untargeted timelines applied to `default_target`
    pub(crate) fn begin_clock(
        &mut self,
        scope: NodeId,
        default_target: NodeId,
        storyboard: &Storyboard,
    ) -> Result<weft_animation::ClockId> {
        let tree = &self.tree;
        let nodes = &self.nodes;
        let id = self.clock.begin(
            storyboard,
            |target| resolve_target(tree, nodes, scope, default_target, target),
            |node, property| (tree.get_value(node, property), tree.base_value(node, property)),
        )?;
        Ok(id)
    }

    fn stop_named_storyboard(&mut self, host: NodeId, role: TableRole, name: &str) -> Result<()> {
        let Some(state) = self.nodes.get_mut(host) else {
            return Ok(());
        };
        let Some(index) = state
            .storyboards
            .iter()
            .position(|s| s.role == role && s.name.as_deref() == Some(name))
        else {
            tracing::trace!(?host, name, "no running storyboard to stop");
            return Ok(());
        };
        let begun = state.storyboards.remove(index);
        if self.clock.is_running(begun.clock) {
            self.clock.stop(begun.clock)?;
        }
        self.apply_clock_output()
    }

    /// Run the event triggers listening for `event` on `node`
    pub(crate) fn fire_event_triggers(&mut self, node: NodeId, event: RoutedEvent) -> Result<()> {
        let mut listeners: SmallVec<[(NodeId, TableRole, usize); 4]> = SmallVec::from_slice(&[
            (node, TableRole::ThemeStyle, 0),
            (node, TableRole::Style, 0),
            (node, TableRole::Template, 0),
        ]);
        if let (Some(parent), Some(slot)) = (self.templated_parent(node), self.template_child_index(node)) {
            if slot > 0 {
                listeners.push((parent, TableRole::Template, slot));
            }
        }

        for (host, role, slot) in listeners {
            let Some(tables) = self.applied_tables(host, role) else {
                continue;
            };
            for trigger in &tables.triggers {
                if trigger.event == Some((event, slot)) {
                    tracing::debug!(?host, ?role, event = self.events.name(event), "event trigger fired");
                    self.run_actions(host, role, &trigger.enter_actions)?;
                }
            }
        }
        Ok(())
    }
}

fn style_slot(state: &NodeState, role: TableRole) -> &Option<StyleInstance> {
    match role {
        TableRole::ThemeStyle => &state.theme_style,
        _ => &state.style,
    }
}

fn style_slot_mut(state: &mut NodeState, role: TableRole) -> &mut Option<StyleInstance> {
    match role {
        TableRole::ThemeStyle => &mut state.theme_style,
        _ => &mut state.style,
    }
}

/// Map an animation target to a node: explicit nodes first, then names in
/// `scope`'s template (and its templated parent's), then the default
fn resolve_target(
    tree: &ElementTree,
    nodes: &SecondaryMap<NodeId, NodeState>,
    scope: NodeId,
    default_target: NodeId,
    target: &AnimationTarget,
) -> Option<NodeId> {
    if let Some(node) = target.node {
        return tree.contains(node).then_some(node);
    }
    let Some(name) = target.target_name.as_deref() else {
        return Some(default_target);
    };
    let state = nodes.get(scope)?;
    if let Some(found) = state.template.as_ref().and_then(|t| t.names.get(name)) {
        return Some(*found);
    }
    let parent = state.templated_parent?;
    nodes.get(parent)?.template.as_ref()?.names.get(name).copied()
}
