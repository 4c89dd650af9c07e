//! Styles
//!
//! A [`Style`] is a shared handle: cloning it yields the same style, and
//! equality is identity. Until sealed it may be edited; sealing validates the
//! `BasedOn` chain and flattens every setter and trigger (base first) into
//! [`CompiledTables`]. Afterwards every mutator fails with
//! [`StyleError::Sealed`].
//!
//! ```ignore
//! let style = Style::builder(button)
//!     .setter(Setter::new(wk.background, Color::RED))
//!     .trigger(
//!         Trigger::property(wk.is_mouse_over, true)
//!             .with_setter(Setter::new(wk.background, Color::BLUE)),
//!     )
//!     .build();
//! style.seal(&registry)?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use weft_core::{ObjectRef, PropertyRegistry, TypeKey, Value};

use crate::compiler::{CompiledTables, TableBuilder};
use crate::error::{Result, StyleError};
use crate::resources::{ResourceDictionary, ResourceKey};
use crate::setter::{EventSetter, Setter, SetterBase};
use crate::trigger::{ConditionSource, Trigger, TriggerKind};

static NEXT_GLOBAL_INDEX: AtomicU64 = AtomicU64::new(1);

struct StyleDefinition {
    target_type: Option<TypeKey>,
    based_on: Option<Style>,
    setters: Vec<SetterBase>,
    triggers: Vec<Trigger>,
}

struct StyleInner {
    global_index: u64,
    definition: RwLock<StyleDefinition>,
    resources: ResourceDictionary,
    compiled: OnceLock<Arc<CompiledTables>>,
}

#[derive(Clone)]
pub struct Style {
    inner: Arc<StyleInner>,
}

impl PartialEq for Style {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let def = self.inner.definition.read();
        f.debug_struct("Style")
            .field("global_index", &self.inner.global_index)
            .field("target_type", &def.target_type)
            .field("based_on", &def.based_on.as_ref().map(Style::global_index))
            .field("setters", &def.setters.len())
            .field("triggers", &def.triggers.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl Style {
    pub fn new(target_type: Option<TypeKey>) -> Self {
        Self {
            inner: Arc::new(StyleInner {
                global_index: NEXT_GLOBAL_INDEX.fetch_add(1, Ordering::Relaxed),
                definition: RwLock::new(StyleDefinition {
                    target_type,
                    based_on: None,
                    setters: Vec::new(),
                    triggers: Vec::new(),
                }),
                resources: ResourceDictionary::new(),
                compiled: OnceLock::new(),
            }),
        }
    }

    pub fn builder(target_type: TypeKey) -> StyleBuilder {
        StyleBuilder {
            style: Style::new(Some(target_type)),
        }
    }

    /// Process-wide identity, increasing in creation order
    pub fn global_index(&self) -> u64 {
        self.inner.global_index
    }

    pub fn ptr_eq(&self, other: &Style) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Definition
    // =========================================================================

    pub fn target_type(&self) -> Option<TypeKey> {
        self.inner.definition.read().target_type
    }

    pub fn based_on(&self) -> Option<Style> {
        self.inner.definition.read().based_on.clone()
    }

    pub fn resources(&self) -> &ResourceDictionary {
        &self.inner.resources
    }

    pub fn setters(&self) -> Vec<SetterBase> {
        self.inner.definition.read().setters.clone()
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        self.inner.definition.read().triggers.clone()
    }

    pub fn set_target_type(&self, target_type: Option<TypeKey>) -> Result<()> {
        self.edit(|def| def.target_type = target_type)
    }

    pub fn set_based_on(&self, based_on: Option<Style>) -> Result<()> {
        self.edit(|def| def.based_on = based_on)
    }

    pub fn add_setter(&self, setter: Setter) -> Result<()> {
        self.edit(|def| def.setters.push(SetterBase::Setter(setter)))
    }

    pub fn add_event_setter(&self, setter: EventSetter) -> Result<()> {
        self.edit(|def| def.setters.push(SetterBase::EventSetter(setter)))
    }

    pub fn add_trigger(&self, trigger: Trigger) -> Result<()> {
        self.edit(|def| def.triggers.push(trigger))
    }

    fn edit(&self, f: impl FnOnce(&mut StyleDefinition)) -> Result<()> {
        if self.is_sealed() {
            return Err(StyleError::Sealed("style"));
        }
        f(&mut self.inner.definition.write());
        Ok(())
    }

    // =========================================================================
    // Sealing
    // =========================================================================

    pub fn is_sealed(&self) -> bool {
        self.inner.compiled.get().is_some()
    }

    /// Validate and compile. Sealing an already sealed style does nothing.
    pub fn seal(&self, registry: &PropertyRegistry) -> Result<()> {
        if self.is_sealed() {
            return Ok(());
        }
        let chain = self.based_on_chain()?;

        if let Some(base) = self.based_on() {
            base.seal(registry)?;
            if let (Some(derived), Some(base_type)) = (self.target_type(), base.target_type()) {
                if !registry.is_assignable_from(base_type, derived) {
                    return Err(StyleError::BasedOnTypeMismatch {
                        derived: registry.type_name(derived).to_string(),
                        base: registry.type_name(base_type).to_string(),
                    });
                }
            }
        }
        self.validate(registry)?;

        let mut builder = TableBuilder::new(registry);
        builder.reserve_slots(1);
        let mut style_only = |name: Option<&str>| match name {
            None => Ok(0),
            Some(name) => Err(StyleError::TargetNameInStyle(name.to_string())),
        };
        // Base first so derived setters overwrite and derived triggers win ties
        for style in chain.iter().rev() {
            let def = style.inner.definition.read();
            for setter in &def.setters {
                match setter {
                    SetterBase::Setter(s) => builder.add_setter(0, s)?,
                    SetterBase::EventSetter(e) => builder.add_event_setter(e),
                }
            }
        }
        for style in chain.iter().rev() {
            let def = style.inner.definition.read();
            for trigger in &def.triggers {
                builder.add_trigger(trigger, &mut style_only)?;
            }
        }

        let tables = Arc::new(builder.finish());
        tracing::debug!(
            style = self.global_index(),
            triggers = tables.trigger_count(),
            chain = chain.len(),
            "style sealed"
        );
        // Another thread may have sealed concurrently; either result is equivalent
        let _ = self.inner.compiled.set(tables);
        Ok(())
    }

    /// This style followed by its `BasedOn` ancestors, nearest first
    fn based_on_chain(&self) -> Result<Vec<Style>> {
        let mut chain = vec![self.clone()];
        let mut seen = FxHashSet::default();
        seen.insert(self.global_index());
        let mut current = self.based_on();
        while let Some(style) = current {
            if !seen.insert(style.global_index()) {
                return Err(StyleError::CircularBasedOn(self.global_index()));
            }
            current = style.based_on();
            chain.push(style);
        }
        Ok(chain)
    }

    fn validate(&self, registry: &PropertyRegistry) -> Result<()> {
        let def = self.inner.definition.read();
        for setter in &def.setters {
            if let SetterBase::Setter(s) = setter {
                if let Some(name) = &s.target_name {
                    return Err(StyleError::TargetNameInStyle(name.to_string()));
                }
                crate::compiler::check_setter(registry, s)?;
            }
        }
        for trigger in &def.triggers {
            if let TriggerKind::Conditions(conditions) = &trigger.kind {
                for condition in conditions {
                    if let ConditionSource::Property {
                        source_name: Some(name),
                        ..
                    } = &condition.source
                    {
                        return Err(StyleError::TargetNameInStyle(name.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Compiled tables; `None` until sealed
    pub fn compiled(&self) -> Option<Arc<CompiledTables>> {
        self.inner.compiled.get().cloned()
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Look `key` up in this style's resources, then along `BasedOn`
    pub fn find_resource(&self, key: &ResourceKey) -> Result<Option<Value>> {
        let mut current = Some(self.clone());
        let mut steps = 0usize;
        while let Some(style) = current {
            if let Some(value) = style.resources().get(key)? {
                return Ok(Some(value));
            }
            steps += 1;
            if steps > 1024 {
                return Err(StyleError::CircularBasedOn(self.global_index()));
            }
            current = style.based_on();
        }
        Ok(None)
    }

    // =========================================================================
    // Value conversion
    // =========================================================================

    /// Store the style in a property or dictionary
    pub fn to_value(&self) -> Value {
        Value::Object(ObjectRef::from_arc(self.inner.clone(), true))
    }

    pub fn from_value(value: &Value) -> Option<Style> {
        value
            .as_object()?
            .downcast_arc::<StyleInner>()
            .map(|inner| Style { inner })
    }
}

impl From<Style> for Value {
    fn from(style: Style) -> Self {
        style.to_value()
    }
}

/// Fluent construction of an unsealed style
pub struct StyleBuilder {
    style: Style,
}

impl StyleBuilder {
    fn definition(&self) -> parking_lot::RwLockWriteGuard<'_, StyleDefinition> {
        self.style.inner.definition.write()
    }

    pub fn based_on(self, base: &Style) -> Self {
        self.definition().based_on = Some(base.clone());
        self
    }

    pub fn setter(self, setter: Setter) -> Self {
        self.definition().setters.push(SetterBase::Setter(setter));
        self
    }

    pub fn event_setter(self, setter: EventSetter) -> Self {
        self.definition()
            .setters
            .push(SetterBase::EventSetter(setter));
        self
    }

    pub fn trigger(self, trigger: Trigger) -> Self {
        self.definition().triggers.push(trigger);
        self
    }

    pub fn resource(self, key: impl Into<ResourceKey>, value: impl Into<Value>) -> Result<Self> {
        self.style.resources().insert(key, value)?;
        Ok(self)
    }

    pub fn build(self) -> Style {
        self.style
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{Color, TypeKind};

    fn button_registry() -> (PropertyRegistry, TypeKey) {
        let mut registry = PropertyRegistry::new();
        let content_control = registry.well_known().content_control;
        let button = registry
            .register_type("Button", Some(content_control), TypeKind::Element)
            .unwrap();
        (registry, button)
    }

    #[test]
    fn test_seal_is_idempotent() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let style = Style::builder(button)
            .setter(Setter::new(wk.background, Color::RED))
            .build();

        style.seal(&registry).unwrap();
        let first = style.compiled().unwrap();
        style.seal(&registry).unwrap();
        let second = style.compiled().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.value(0, wk.background), Some(&Value::Color(Color::RED)));
        assert_eq!(first.triggered_values(0, wk.background).len(), 0);
    }

    #[test]
    fn test_sealed_style_rejects_mutation() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let style = Style::builder(button).build();
        style.seal(&registry).unwrap();
        assert_eq!(
            style.add_setter(Setter::new(wk.tag, 1)),
            Err(StyleError::Sealed("style"))
        );
        assert!(style.set_based_on(None).is_err());
    }

    #[test]
    fn test_based_on_override_law() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let base = Style::builder(wk.control)
            .setter(Setter::new(wk.background, Color::RED))
            .setter(Setter::new(wk.foreground, Color::WHITE))
            .build();
        let derived = Style::builder(button)
            .based_on(&base)
            .setter(Setter::new(wk.background, Color::BLUE))
            .build();

        derived.seal(&registry).unwrap();
        assert!(base.is_sealed());
        let tables = derived.compiled().unwrap();
        assert_eq!(tables.value(0, wk.background), Some(&Value::Color(Color::BLUE)));
        assert_eq!(tables.value(0, wk.foreground), Some(&Value::Color(Color::WHITE)));
    }

    #[test]
    fn test_circular_based_on() {
        let (registry, button) = button_registry();
        let a = Style::new(Some(button));
        let b = Style::new(Some(button));
        a.set_based_on(Some(b.clone())).unwrap();
        b.set_based_on(Some(a.clone())).unwrap();
        assert_eq!(a.seal(&registry), Err(StyleError::CircularBasedOn(a.global_index())));

        let c = Style::new(Some(button));
        c.set_based_on(Some(c.clone())).unwrap();
        assert!(matches!(c.seal(&registry), Err(StyleError::CircularBasedOn(_))));
        // break the self-reference so the Arc can drop
        c.set_based_on(None).unwrap();
        a.set_based_on(None).unwrap();
    }

    #[test]
    fn test_based_on_type_mismatch() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let base = Style::builder(button).build();
        let derived = Style::builder(wk.control).based_on(&base).build();
        assert!(matches!(
            derived.seal(&registry),
            Err(StyleError::BasedOnTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_style_rejects_target_names_and_event_setters_in_event_triggers() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let named = Style::builder(button)
            .setter(Setter::new(wk.tag, 1).with_target_name("Part"))
            .build();
        assert_eq!(
            named.seal(&registry),
            Err(StyleError::TargetNameInStyle("Part".into()))
        );

        let event = Style::builder(button)
            .trigger(
                Trigger::event(crate::events::RoutedEvent::CLICK)
                    .with_setter(Setter::new(wk.tag, 1)),
            )
            .build();
        assert_eq!(event.seal(&registry), Err(StyleError::EventTriggerWithSetters));
        assert!(!event.is_sealed());
    }

    #[test]
    fn test_find_resource_walks_based_on() {
        let (_, button) = button_registry();
        let base = Style::builder(button).resource("accent", Color::RED).unwrap().build();
        let derived = Style::builder(button).based_on(&base).build();
        assert_eq!(
            derived.find_resource(&"accent".into()).unwrap(),
            Some(Value::Color(Color::RED))
        );
        assert_eq!(derived.find_resource(&"missing".into()).unwrap(), None);
    }

    #[test]
    fn test_value_round_trip_keeps_identity() {
        let (_, button) = button_registry();
        let style = Style::builder(button).build();
        let value = style.to_value();
        let back = Style::from_value(&value).unwrap();
        assert!(back.ptr_eq(&style));
        assert_eq!(value, Value::from(style.clone()));
        assert!(Style::from_value(&Value::Int(3)).is_none());
    }
}
