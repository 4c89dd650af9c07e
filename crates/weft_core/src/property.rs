//! Type and property registry
//!
//! The registry is the schema shared by every tree: element types with their
//! base-type chain, and dependency properties with their metadata. It is
//! built once, then shared immutably behind an `Arc`.
//!
//! ```ignore
//! let mut registry = PropertyRegistry::new();
//! let control = registry.well_known().control;
//! let button = registry.register_type("Button", Some(control), TypeKind::Element)?;
//! let is_default = registry.register_property(button, "IsDefault", PropertyMetadata::new(false))?;
//! ```

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::error::{CoreError, Result};
use crate::value::Value;
use crate::well_known::WellKnown;

/// Handle to a registered type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(u32);

impl TypeKey {
    pub fn to_raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Self {
        TypeKey(raw)
    }
}

/// Handle to a registered dependency property (its global index)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(u32);

impl PropertyId {
    pub fn global_index(self) -> u32 {
        self.0
    }

    pub(crate) fn placeholder() -> Self {
        PropertyId(u32::MAX)
    }
}

/// What kind of object a type produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Visual + logical tree participant
    Element,
    /// Logical-only tree participant (flow content, definitions)
    ContentElement,
    /// 3D visual; no child index, no template invalidation
    Visual3D,
    /// Non-element object that can be frozen and shared
    Freezable,
    /// Non-element collection; never shareable
    Collection,
    /// Any other non-element object
    Plain,
}

impl TypeKind {
    pub fn is_tree_node(self) -> bool {
        matches!(
            self,
            TypeKind::Element | TypeKind::ContentElement | TypeKind::Visual3D
        )
    }
}

bitflags! {
    /// Property metadata flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PropertyFlags: u32 {
        const INHERITS = 1 << 0;
        const AFFECTS_MEASURE = 1 << 1;
        const AFFECTS_ARRANGE = 1 << 2;
        const AFFECTS_RENDER = 1 << 3;
        /// Inherit across inheritance-behavior skip boundaries
        const OVERRIDES_INHERITANCE_BEHAVIOR = 1 << 4;
    }
}

/// Validation callback; returns a reason on rejection
pub type Validator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Per-property metadata
#[derive(Clone)]
pub struct PropertyMetadata {
    pub default: Value,
    pub flags: PropertyFlags,
    validator: Option<Validator>,
}

impl PropertyMetadata {
    pub fn new(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            flags: PropertyFlags::empty(),
            validator: None,
        }
    }

    pub fn unset() -> Self {
        Self::new(Value::Unset)
    }

    pub fn inherits(mut self) -> Self {
        self.flags |= PropertyFlags::INHERITS;
        self
    }

    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn is_inherited(&self) -> bool {
        self.flags.contains(PropertyFlags::INHERITS)
    }

    pub fn overrides_inheritance_behavior(&self) -> bool {
        self.flags
            .contains(PropertyFlags::OVERRIDES_INHERITANCE_BEHAVIOR)
    }

    fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match &self.validator {
            Some(validate) if !value.is_unset() => validate(value),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for PropertyMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMetadata")
            .field("default", &self.default)
            .field("flags", &self.flags)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct TypeInfo {
    name: Arc<str>,
    base: Option<TypeKey>,
    kind: TypeKind,
    properties: FxHashMap<Arc<str>, PropertyId>,
}

#[derive(Debug)]
struct PropertyInfo {
    name: Arc<str>,
    owner: TypeKey,
    metadata: PropertyMetadata,
}

/// Registry of element types and dependency properties
#[derive(Debug)]
pub struct PropertyRegistry {
    types: Vec<TypeInfo>,
    type_names: FxHashMap<Arc<str>, TypeKey>,
    properties: Vec<PropertyInfo>,
    inheritable: Vec<PropertyId>,
    well_known: WellKnown,
}

impl Default for PropertyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyRegistry {
    /// Create a registry pre-populated with the framework's own types and
    /// properties
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            type_names: FxHashMap::default(),
            properties: Vec::new(),
            inheritable: Vec::new(),
            well_known: WellKnown::placeholder(),
        };
        registry.well_known = WellKnown::register(&mut registry);
        registry
    }

    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    // =========================================================================
    // Types
    // =========================================================================

    pub fn register_type(
        &mut self,
        name: &str,
        base: Option<TypeKey>,
        kind: TypeKind,
    ) -> Result<TypeKey> {
        if self.type_names.contains_key(name) {
            return Err(CoreError::DuplicateRegistration(format!("type '{name}'")));
        }
        Ok(self.define_type(name, base, kind))
    }

    pub(crate) fn define_type(
        &mut self,
        name: &str,
        base: Option<TypeKey>,
        kind: TypeKind,
    ) -> TypeKey {
        let key = TypeKey(self.types.len() as u32);
        let name: Arc<str> = Arc::from(name);
        self.types.push(TypeInfo {
            name: name.clone(),
            base,
            kind,
            properties: FxHashMap::default(),
        });
        self.type_names.insert(name, key);
        key
    }

    pub fn find_type(&self, name: &str) -> Option<TypeKey> {
        self.type_names.get(name).copied()
    }

    pub fn type_name(&self, key: TypeKey) -> &str {
        self.types
            .get(key.0 as usize)
            .map(|t| &*t.name)
            .unwrap_or("<unknown>")
    }

    pub fn type_kind(&self, key: TypeKey) -> Option<TypeKind> {
        self.types.get(key.0 as usize).map(|t| t.kind)
    }

    pub fn base_type(&self, key: TypeKey) -> Option<TypeKey> {
        self.types.get(key.0 as usize).and_then(|t| t.base)
    }

    /// `true` if `derived` is `base` or inherits from it
    pub fn is_assignable_from(&self, base: TypeKey, derived: TypeKey) -> bool {
        let mut current = Some(derived);
        while let Some(key) = current {
            if key == base {
                return true;
            }
            current = self.base_type(key);
        }
        false
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn register_property(
        &mut self,
        owner: TypeKey,
        name: &str,
        metadata: PropertyMetadata,
    ) -> Result<PropertyId> {
        let Some(owner_info) = self.types.get(owner.0 as usize) else {
            return Err(CoreError::DuplicateRegistration(format!(
                "property '{name}' on unknown owner type"
            )));
        };
        if owner_info.properties.contains_key(name) {
            return Err(CoreError::DuplicateRegistration(format!(
                "property '{}.{name}'",
                owner_info.name
            )));
        }

        Ok(self.define_property(owner, name, metadata))
    }

    pub(crate) fn define_property(
        &mut self,
        owner: TypeKey,
        name: &str,
        metadata: PropertyMetadata,
    ) -> PropertyId {
        let id = PropertyId(self.properties.len() as u32);
        let name: Arc<str> = Arc::from(name);
        if metadata.is_inherited() {
            self.inheritable.push(id);
        }
        self.properties.push(PropertyInfo {
            name: name.clone(),
            owner,
            metadata,
        });
        if let Some(info) = self.types.get_mut(owner.0 as usize) {
            info.properties.insert(name, id);
        }
        id
    }

    /// Find a property by name on `type_key` or any of its base types
    pub fn find_property(&self, type_key: TypeKey, name: &str) -> Option<PropertyId> {
        let mut current = Some(type_key);
        while let Some(key) = current {
            let info = self.types.get(key.0 as usize)?;
            if let Some(id) = info.properties.get(name) {
                return Some(*id);
            }
            current = info.base;
        }
        None
    }

    pub fn property_name(&self, id: PropertyId) -> &str {
        self.properties
            .get(id.0 as usize)
            .map(|p| &*p.name)
            .unwrap_or("<unknown>")
    }

    pub fn property_owner(&self, id: PropertyId) -> Option<TypeKey> {
        self.properties.get(id.0 as usize).map(|p| p.owner)
    }

    /// Metadata of a property issued by this registry
    pub fn metadata(&self, id: PropertyId) -> &PropertyMetadata {
        &self.properties[id.0 as usize].metadata
    }

    pub fn default_value(&self, id: PropertyId) -> Value {
        self.metadata(id).default.clone()
    }

    /// All properties flagged `INHERITS`, in registration order
    pub fn inheritable_properties(&self) -> &[PropertyId] {
        &self.inheritable
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Run the property's validator against `value`
    pub fn validate(&self, id: PropertyId, value: &Value) -> Result<()> {
        self.metadata(id)
            .validate(value)
            .map_err(|reason| CoreError::InvalidValue {
                property: self.property_name(id).to_string(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_property_walks_base_types() {
        let mut registry = PropertyRegistry::new();
        let control = registry.well_known().control;
        let button = registry
            .register_type("Button", Some(control), TypeKind::Element)
            .unwrap();

        let background = registry.find_property(button, "Background");
        assert_eq!(background, Some(registry.well_known().background));
        assert!(registry.find_property(button, "Nope").is_none());
        assert!(registry.is_assignable_from(control, button));
        assert!(!registry.is_assignable_from(button, control));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = PropertyRegistry::new();
        let fe = registry.well_known().framework_element;
        assert!(registry.register_type("FrameworkElement", None, TypeKind::Element).is_err());
        registry
            .register_property(fe, "Custom", PropertyMetadata::new(1))
            .unwrap();
        assert!(registry
            .register_property(fe, "Custom", PropertyMetadata::new(2))
            .is_err());
    }

    #[test]
    fn test_validator() {
        let mut registry = PropertyRegistry::new();
        let fe = registry.well_known().framework_element;
        let width = registry
            .register_property(
                fe,
                "Width",
                PropertyMetadata::new(0.0).with_validator(|v| match v.as_float() {
                    Some(f) if f >= 0.0 => Ok(()),
                    _ => Err("must be a non-negative number".into()),
                }),
            )
            .unwrap();

        assert!(registry.validate(width, &Value::Float(10.0)).is_ok());
        assert!(matches!(
            registry.validate(width, &Value::Float(-1.0)),
            Err(CoreError::InvalidValue { .. })
        ));
        assert!(registry.validate(width, &Value::Unset).is_ok());
    }

    #[test]
    fn test_inheritable_list() {
        let registry = PropertyRegistry::new();
        let wk = registry.well_known();
        let inheritable = registry.inheritable_properties();
        assert!(inheritable.contains(&wk.flow_direction));
        assert!(inheritable.contains(&wk.data_context));
        assert!(!inheritable.contains(&wk.background));
    }
}
