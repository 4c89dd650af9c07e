//! Per-node layered property storage
//!
//! Each property keeps one base value per [`BaseValueSource`]; the highest
//! source wins. An animated value, when present, overrides every base
//! value. Writes report a [`PropertyChange`] only when the effective value
//! actually changed, which is what drives trigger re-evaluation upstream.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::Result;
use crate::property::{PropertyId, PropertyRegistry};
use crate::value::Value;

/// Where a base value came from, lowest precedence first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BaseValueSource {
    Default,
    Inherited,
    ThemeStyle,
    ThemeStyleTrigger,
    Style,
    TemplateTrigger,
    StyleTrigger,
    ImplicitStyleReference,
    ParentTemplate,
    ParentTemplateTrigger,
    Local,
}

/// Effective value change reported by a store write
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyChange {
    pub property: PropertyId,
    pub old: Value,
    pub new: Value,
}

#[derive(Clone, Debug, Default)]
struct ValueEntry {
    layers: SmallVec<[(BaseValueSource, Value); 2]>,
    animated: Option<Value>,
}

impl ValueEntry {
    fn base(&self) -> Option<(BaseValueSource, &Value)> {
        self.layers
            .iter()
            .max_by_key(|(source, _)| *source)
            .map(|(source, value)| (*source, value))
    }

    fn effective(&self) -> Option<&Value> {
        self.animated
            .as_ref()
            .or_else(|| self.base().map(|(_, v)| v))
    }

    fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.animated.is_none()
    }
}

/// Layered property values of a single node
#[derive(Clone, Debug, Default)]
pub struct PropertyStore {
    entries: FxHashMap<PropertyId, ValueEntry>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective value, falling back to the property default
    pub fn get(&self, registry: &PropertyRegistry, property: PropertyId) -> Value {
        self.entries
            .get(&property)
            .and_then(ValueEntry::effective)
            .cloned()
            .unwrap_or_else(|| registry.default_value(property))
    }

    /// Source of the winning base value
    pub fn base_value_source(&self, property: PropertyId) -> BaseValueSource {
        self.entries
            .get(&property)
            .and_then(ValueEntry::base)
            .map(|(source, _)| source)
            .unwrap_or(BaseValueSource::Default)
    }

    /// Value stored for one particular source
    pub fn value_from(&self, property: PropertyId, source: BaseValueSource) -> Option<&Value> {
        self.entries.get(&property).and_then(|entry| {
            entry
                .layers
                .iter()
                .find(|(s, _)| *s == source)
                .map(|(_, v)| v)
        })
    }

    pub fn has_local(&self, property: PropertyId) -> bool {
        self.value_from(property, BaseValueSource::Local).is_some()
    }

    pub fn is_animated(&self, property: PropertyId) -> bool {
        self.entries
            .get(&property)
            .is_some_and(|entry| entry.animated.is_some())
    }

    /// Write a base value for `source`. Writing [`Value::Unset`] clears it.
    pub fn set(
        &mut self,
        registry: &PropertyRegistry,
        property: PropertyId,
        source: BaseValueSource,
        value: Value,
    ) -> Result<Option<PropertyChange>> {
        if value.is_unset() {
            return Ok(self.clear(registry, property, source));
        }
        registry.validate(property, &value)?;

        let old = self.get(registry, property);
        let entry = self.entries.entry(property).or_default();
        match entry.layers.iter_mut().find(|(s, _)| *s == source) {
            Some(slot) => slot.1 = value,
            None => entry.layers.push((source, value)),
        }
        Ok(self.change(registry, property, old))
    }

    pub fn clear(
        &mut self,
        registry: &PropertyRegistry,
        property: PropertyId,
        source: BaseValueSource,
    ) -> Option<PropertyChange> {
        let old = self.get(registry, property);
        let entry = self.entries.get_mut(&property)?;
        let before = entry.layers.len();
        entry.layers.retain(|(s, _)| *s != source);
        if entry.layers.len() == before {
            return None;
        }
        if entry.is_empty() {
            self.entries.remove(&property);
        }
        self.change(registry, property, old)
    }

    pub fn set_animated(
        &mut self,
        registry: &PropertyRegistry,
        property: PropertyId,
        value: Value,
    ) -> Result<Option<PropertyChange>> {
        registry.validate(property, &value)?;
        let old = self.get(registry, property);
        self.entries.entry(property).or_default().animated = Some(value);
        Ok(self.change(registry, property, old))
    }

    pub fn clear_animated(
        &mut self,
        registry: &PropertyRegistry,
        property: PropertyId,
    ) -> Option<PropertyChange> {
        let old = self.get(registry, property);
        let entry = self.entries.get_mut(&property)?;
        entry.animated.take()?;
        if entry.is_empty() {
            self.entries.remove(&property);
        }
        self.change(registry, property, old)
    }

    /// Value ignoring any running animation
    pub fn base_value(&self, registry: &PropertyRegistry, property: PropertyId) -> Value {
        self.entries
            .get(&property)
            .and_then(ValueEntry::base)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| registry.default_value(property))
    }

    /// Properties with at least one stored value
    pub fn properties(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.entries.keys().copied()
    }

    fn change(
        &self,
        registry: &PropertyRegistry,
        property: PropertyId,
        old: Value,
    ) -> Option<PropertyChange> {
        let new = self.get(registry, property);
        (old != new).then_some(PropertyChange { property, old, new })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Color;

    #[test]
    fn test_precedence() {
        let registry = PropertyRegistry::new();
        let bg = registry.well_known().background;
        let mut store = PropertyStore::new();

        store
            .set(&registry, bg, BaseValueSource::Style, Color::RED.into())
            .unwrap();
        assert_eq!(store.get(&registry, bg), Value::Color(Color::RED));

        store
            .set(&registry, bg, BaseValueSource::StyleTrigger, Color::BLUE.into())
            .unwrap();
        assert_eq!(store.get(&registry, bg), Value::Color(Color::BLUE));

        // Lower source written later doesn't win
        store
            .set(&registry, bg, BaseValueSource::ThemeStyle, Color::GREEN.into())
            .unwrap();
        assert_eq!(store.get(&registry, bg), Value::Color(Color::BLUE));
        assert_eq!(store.base_value_source(bg), BaseValueSource::StyleTrigger);

        store.clear(&registry, bg, BaseValueSource::StyleTrigger);
        assert_eq!(store.get(&registry, bg), Value::Color(Color::RED));
    }

    #[test]
    fn test_change_reporting() {
        let registry = PropertyRegistry::new();
        let tag = registry.well_known().tag;
        let mut store = PropertyStore::new();

        let change = store
            .set(&registry, tag, BaseValueSource::Local, Value::from(1))
            .unwrap();
        assert_eq!(
            change,
            Some(PropertyChange {
                property: tag,
                old: Value::Unset,
                new: Value::Int(1)
            })
        );

        // Same value again: no change
        let change = store
            .set(&registry, tag, BaseValueSource::Style, Value::from(1))
            .unwrap();
        assert!(change.is_none());
    }

    #[test]
    fn test_animation_overrides_local() {
        let registry = PropertyRegistry::new();
        let opacity = registry.well_known().opacity;
        let mut store = PropertyStore::new();

        store
            .set(&registry, opacity, BaseValueSource::Local, Value::Float(0.5))
            .unwrap();
        store
            .set_animated(&registry, opacity, Value::Float(0.25))
            .unwrap();
        assert_eq!(store.get(&registry, opacity), Value::Float(0.25));
        assert_eq!(store.base_value(&registry, opacity), Value::Float(0.5));

        store.clear_animated(&registry, opacity);
        assert_eq!(store.get(&registry, opacity), Value::Float(0.5));
    }

    #[test]
    fn test_rejected_value_leaves_store_untouched() {
        let registry = PropertyRegistry::new();
        let opacity = registry.well_known().opacity;
        let mut store = PropertyStore::new();

        assert!(store
            .set(&registry, opacity, BaseValueSource::Local, Value::Float(4.0))
            .is_err());
        assert_eq!(store.get(&registry, opacity), Value::Float(1.0));
        assert!(!store.has_local(opacity));
    }
}
