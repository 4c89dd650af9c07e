//! Style and template compiler
//!
//! Setters, trigger setters and template node values are flattened into
//! per-slot tables. Slot 0 is the styled (or templated) element itself;
//! template children are numbered from 1 in document order.
//!
//! Each `(slot, property)` keeps the plain value (last write wins, so a
//! derived style processed after its base overrides it) and the ordered
//! list of trigger values. When several active triggers set the same
//! property, the one declared last wins; any active trigger beats the plain
//! value because trigger values are written to a higher value source.
//!
//! Side indexes answer the questions asked at runtime without rescanning the
//! tables: which slots depend on a resource key, which properties of which
//! slot feed trigger conditions, and which properties of the templated
//! parent are read through template bindings.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::sync::Arc;

use weft_core::{BaseValueSource, ObjectRef, ObjectValue, PropertyId, PropertyRegistry, Value};

use crate::error::{Result, StyleError};
use crate::events::RoutedEvent;
use crate::resources::ResourceKey;
use crate::setter::{EventSetter, Setter, SetterValue};
use crate::trigger::{Binding, BindingRoot, ConditionSource, Trigger, TriggerAction, TriggerKind};

/// Value as stored in a compiled table
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum CompiledValue {
    /// Shared by every instance
    Shared(Value),
    /// Copied for every instance
    PerInstance(Arc<ObjectValue>),
    TemplateBinding(PropertyId),
    StaticResource(ResourceKey),
    DynamicResource(ResourceKey),
}

impl CompiledValue {
    pub(crate) fn instantiate_object(prototype: &ObjectValue) -> Value {
        let type_key = prototype.type_key();
        Value::Object(ObjectRef::new(prototype.clone()).with_type(type_key))
    }
}

impl From<&SetterValue> for CompiledValue {
    fn from(value: &SetterValue) -> Self {
        match value {
            SetterValue::Value(v) => CompiledValue::Shared(v.clone()),
            SetterValue::TemplateBinding(p) => CompiledValue::TemplateBinding(*p),
            SetterValue::StaticResource(k) => CompiledValue::StaticResource(k.clone()),
            SetterValue::DynamicResource(k) => CompiledValue::DynamicResource(k.clone()),
        }
    }
}

/// Which value sources a table writes to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TableRole {
    Style,
    ThemeStyle,
    Template,
}

impl TableRole {
    pub(crate) const ALL: [TableRole; 3] = [TableRole::ThemeStyle, TableRole::Style, TableRole::Template];

    pub(crate) fn setter_source(self) -> BaseValueSource {
        match self {
            TableRole::Style => BaseValueSource::Style,
            TableRole::ThemeStyle => BaseValueSource::ThemeStyle,
            TableRole::Template => BaseValueSource::ParentTemplate,
        }
    }

    pub(crate) fn trigger_source(self, slot: usize) -> BaseValueSource {
        match self {
            TableRole::Style => BaseValueSource::StyleTrigger,
            TableRole::ThemeStyle => BaseValueSource::ThemeStyleTrigger,
            TableRole::Template if slot == 0 => BaseValueSource::TemplateTrigger,
            TableRole::Template => BaseValueSource::ParentTemplateTrigger,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PropertyRecord {
    pub(crate) value: Option<CompiledValue>,
    /// (trigger index, value) in declaration order
    pub(crate) triggered: SmallVec<[(usize, CompiledValue); 1]>,
}

#[derive(Debug, Default)]
pub(crate) struct SlotRecord {
    pub(crate) properties: IndexMap<PropertyId, PropertyRecord>,
}

#[derive(Clone, Debug)]
pub(crate) enum CompiledConditionSource {
    Property(PropertyId),
    Binding(Binding),
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledCondition {
    pub(crate) slot: usize,
    pub(crate) source: CompiledConditionSource,
    pub(crate) value: Value,
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledTrigger {
    pub(crate) conditions: SmallVec<[CompiledCondition; 1]>,
    /// Set for event triggers: the event and the slot it is raised on
    pub(crate) event: Option<(RoutedEvent, usize)>,
    pub(crate) enter_actions: Vec<TriggerAction>,
    pub(crate) exit_actions: Vec<TriggerAction>,
    /// `(slot, property)` pairs this trigger sets
    pub(crate) targets: SmallVec<[(usize, PropertyId); 2]>,
}

/// Flattened, indexed form of a sealed style or template
#[derive(Debug, Default)]
pub struct CompiledTables {
    pub(crate) slots: Vec<SlotRecord>,
    pub(crate) triggers: Vec<CompiledTrigger>,
    pub(crate) resource_dependents: FxHashMap<ResourceKey, SmallVec<[(usize, PropertyId); 2]>>,
    pub(crate) container_dependents: FxHashSet<PropertyId>,
    pub(crate) trigger_sources: FxHashMap<(usize, PropertyId), SmallVec<[usize; 2]>>,
    pub(crate) template_bindings: FxHashMap<PropertyId, SmallVec<[(usize, PropertyId); 2]>>,
    /// Templated-parent properties read by binding conditions
    pub(crate) templated_parent_sources: FxHashMap<PropertyId, SmallVec<[usize; 2]>>,
    pub(crate) event_setters: Vec<EventSetter>,
}

impl CompiledTables {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Plain (non-trigger) value for `(slot, property)` when it is a literal
    pub fn value(&self, slot: usize, property: PropertyId) -> Option<&Value> {
        match self.record(slot, property)?.value.as_ref()? {
            CompiledValue::Shared(value) => Some(value),
            _ => None,
        }
    }

    /// Literal values a trigger contributes, in trigger order
    pub fn triggered_values(&self, slot: usize, property: PropertyId) -> Vec<&Value> {
        self.record(slot, property)
            .map(|r| {
                r.triggered
                    .iter()
                    .filter_map(|(_, v)| match v {
                        CompiledValue::Shared(value) => Some(value),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `(slot, property)` pairs that read `key` as a dynamic resource
    pub fn resource_dependents(&self, key: &ResourceKey) -> &[(usize, PropertyId)] {
        self.resource_dependents
            .get(key)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Properties of the styled element that feed trigger conditions
    pub fn container_dependents(&self) -> &FxHashSet<PropertyId> {
        &self.container_dependents
    }

    pub fn event_setter_count(&self) -> usize {
        self.event_setters.len()
    }

    pub(crate) fn record(&self, slot: usize, property: PropertyId) -> Option<&PropertyRecord> {
        self.slots.get(slot)?.properties.get(&property)
    }

    pub(crate) fn has_event_triggers(&self) -> bool {
        self.triggers.iter().any(|t| t.event.is_some())
    }

    pub(crate) fn has_loaded_handlers(&self) -> bool {
        self.event_setters
            .iter()
            .any(|s| s.event == RoutedEvent::LOADED || s.event == RoutedEvent::UNLOADED)
            || self.triggers.iter().any(|t| {
                matches!(t.event, Some((e, _)) if e == RoutedEvent::LOADED || e == RoutedEvent::UNLOADED)
            })
    }
}

/// Reject setters on properties a style or template manages itself
pub(crate) fn check_setter(registry: &PropertyRegistry, setter: &Setter) -> Result<()> {
    let wk = registry.well_known();
    if setter.property == wk.name || setter.property == wk.style {
        return Err(StyleError::ReservedSetterProperty(
            registry.property_name(setter.property).to_string(),
        ));
    }
    Ok(())
}

pub(crate) struct TableBuilder<'a> {
    registry: &'a PropertyRegistry,
    tables: CompiledTables,
}

impl<'a> TableBuilder<'a> {
    pub(crate) fn new(registry: &'a PropertyRegistry) -> Self {
        Self {
            registry,
            tables: CompiledTables::default(),
        }
    }

    fn slot_mut(&mut self, slot: usize) -> &mut SlotRecord {
        if self.tables.slots.len() <= slot {
            self.tables.slots.resize_with(slot + 1, SlotRecord::default);
        }
        &mut self.tables.slots[slot]
    }

    /// Make sure the table has at least `count` slots
    pub(crate) fn reserve_slots(&mut self, count: usize) {
        if count > 0 {
            self.slot_mut(count - 1);
        }
    }

    /// Record a plain value; a later call for the same pair replaces it
    pub(crate) fn add_value(&mut self, slot: usize, property: PropertyId, value: CompiledValue) {
        self.index_value(slot, property, &value);
        self.slot_mut(slot)
            .properties
            .entry(property)
            .or_default()
            .value = Some(value);
    }

    pub(crate) fn add_setter(&mut self, slot: usize, setter: &Setter) -> Result<()> {
        check_setter(self.registry, setter)?;
        self.add_value(slot, setter.property, CompiledValue::from(&setter.value));
        Ok(())
    }

    pub(crate) fn add_event_setter(&mut self, setter: &EventSetter) {
        self.tables.event_setters.push(setter.clone());
    }

    /// Compile a trigger. `resolve` maps a child name (`None` for the
    /// element itself) to its slot.
    pub(crate) fn add_trigger(
        &mut self,
        trigger: &Trigger,
        resolve: &mut dyn FnMut(Option<&str>) -> Result<usize>,
    ) -> Result<()> {
        let index = self.tables.triggers.len();

        let (conditions, event) = match &trigger.kind {
            TriggerKind::Event { event, source_name } => {
                if !trigger.setters.is_empty() {
                    return Err(StyleError::EventTriggerWithSetters);
                }
                (SmallVec::new(), Some((*event, resolve(source_name.as_deref())?)))
            }
            TriggerKind::Conditions(conditions) => {
                let mut compiled = SmallVec::new();
                for condition in conditions {
                    let (slot, source) = match &condition.source {
                        ConditionSource::Property {
                            property,
                            source_name,
                        } => {
                            let slot = resolve(source_name.as_deref())?;
                            self.add_trigger_source(slot, *property, index);
                            (slot, CompiledConditionSource::Property(*property))
                        }
                        ConditionSource::Binding(binding) => {
                            match binding.root {
                                BindingRoot::Own(property) => {
                                    self.add_trigger_source(0, property, index)
                                }
                                BindingRoot::TemplatedParent(property) => {
                                    let list = self
                                        .tables
                                        .templated_parent_sources
                                        .entry(property)
                                        .or_default();
                                    if !list.contains(&index) {
                                        list.push(index);
                                    }
                                }
                            }
                            (0, CompiledConditionSource::Binding(binding.clone()))
                        }
                    };
                    compiled.push(CompiledCondition {
                        slot,
                        source,
                        value: condition.value.clone(),
                    });
                }
                (compiled, None)
            }
        };

        let mut targets = SmallVec::new();
        for setter in &trigger.setters {
            check_setter(self.registry, setter)?;
            let slot = resolve(setter.target_name.as_deref())?;
            let value = CompiledValue::from(&setter.value);
            self.index_value(slot, setter.property, &value);
            self.slot_mut(slot)
                .properties
                .entry(setter.property)
                .or_default()
                .triggered
                .push((index, value));
            if !targets.contains(&(slot, setter.property)) {
                targets.push((slot, setter.property));
            }
        }

        self.tables.triggers.push(CompiledTrigger {
            conditions,
            event,
            enter_actions: trigger.enter_actions.clone(),
            exit_actions: trigger.exit_actions.clone(),
            targets,
        });
        Ok(())
    }

    fn add_trigger_source(&mut self, slot: usize, property: PropertyId, trigger: usize) {
        if slot == 0 {
            self.tables.container_dependents.insert(property);
        }
        let list = self
            .tables
            .trigger_sources
            .entry((slot, property))
            .or_default();
        if !list.contains(&trigger) {
            list.push(trigger);
        }
    }

    fn index_value(&mut self, slot: usize, property: PropertyId, value: &CompiledValue) {
        match value {
            CompiledValue::DynamicResource(key) => {
                let list = self
                    .tables
                    .resource_dependents
                    .entry(key.clone())
                    .or_default();
                if !list.contains(&(slot, property)) {
                    list.push((slot, property));
                }
            }
            CompiledValue::TemplateBinding(source) => {
                let list = self.tables.template_bindings.entry(*source).or_default();
                if !list.contains(&(slot, property)) {
                    list.push((slot, property));
                }
            }
            _ => {}
        }
    }

    pub(crate) fn finish(self) -> CompiledTables {
        self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::Color;

    fn root_only(name: Option<&str>) -> Result<usize> {
        match name {
            None => Ok(0),
            Some(other) => Err(StyleError::UnknownChildName(other.to_string())),
        }
    }

    #[test]
    fn test_last_plain_value_wins() {
        let registry = PropertyRegistry::new();
        let wk = registry.well_known();
        let mut builder = TableBuilder::new(&registry);
        builder
            .add_setter(0, &Setter::new(wk.background, Color::RED))
            .unwrap();
        builder
            .add_setter(0, &Setter::new(wk.background, Color::BLUE))
            .unwrap();
        let tables = builder.finish();
        assert_eq!(tables.value(0, wk.background), Some(&Value::Color(Color::BLUE)));
    }

    #[test]
    fn test_trigger_indexes() {
        let registry = PropertyRegistry::new();
        let wk = registry.well_known();
        let mut builder = TableBuilder::new(&registry);
        let trigger = Trigger::property(wk.is_mouse_over, true)
            .with_setter(Setter::dynamic_resource(wk.background, "HoverBrush"));
        builder.add_trigger(&trigger, &mut root_only).unwrap();
        let tables = builder.finish();

        assert!(tables.container_dependents().contains(&wk.is_mouse_over));
        assert_eq!(
            tables.resource_dependents(&"HoverBrush".into()),
            &[(0, wk.background)]
        );
        assert_eq!(tables.trigger_sources[&(0, wk.is_mouse_over)].as_slice(), &[0]);
        assert_eq!(tables.triggers[0].targets.as_slice(), &[(0, wk.background)]);
    }

    #[test]
    fn test_reserved_properties_and_event_setters_rejected() {
        let registry = PropertyRegistry::new();
        let wk = registry.well_known();
        let mut builder = TableBuilder::new(&registry);
        assert_eq!(
            builder.add_setter(0, &Setter::new(wk.name, "x")),
            Err(StyleError::ReservedSetterProperty("Name".into()))
        );

        let bad = Trigger::event(RoutedEvent::CLICK).with_setter(Setter::new(wk.tag, 1));
        assert_eq!(
            builder.add_trigger(&bad, &mut root_only),
            Err(StyleError::EventTriggerWithSetters)
        );
    }

    #[test]
    fn test_unknown_target_name() {
        let registry = PropertyRegistry::new();
        let wk = registry.well_known();
        let mut builder = TableBuilder::new(&registry);
        let trigger = Trigger::property(wk.is_mouse_over, true)
            .with_setter(Setter::new(wk.tag, 1).with_target_name("Missing"));
        assert_eq!(
            builder.add_trigger(&trigger, &mut root_only),
            Err(StyleError::UnknownChildName("Missing".into()))
        );
    }
}
