//! Resources
//!
//! - [`ResourceDictionary`]: keyed, mergeable resource store with deferred values
//! - [`DeferredResourceReference`]: a lookup result that resolves on demand
//! - [`ThemeResourceCache`]: theme dictionaries and the theme style cache

mod dictionary;
mod reference;
mod theme;

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use weft_core::{NodeId, TypeKey};

pub use dictionary::{ResourceChangeSink, ResourceDictionary, ResourceFactory};
pub use reference::DeferredResourceReference;
pub use theme::ThemeResourceCache;

/// Key of a dictionary entry
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// Explicit `x:Key`
    Name(Arc<str>),
    /// Implicit style for a type
    Type(TypeKey),
    /// Implicit data template for a data type
    DataTemplate(TypeKey),
}

impl ResourceKey {
    pub fn name(name: &str) -> Self {
        ResourceKey::Name(Arc::from(name))
    }

    pub fn is_implicit_style_key(&self) -> bool {
        matches!(self, ResourceKey::Type(_))
    }

    pub fn is_data_template_key(&self) -> bool {
        matches!(self, ResourceKey::DataTemplate(_))
    }
}

impl From<&str> for ResourceKey {
    fn from(name: &str) -> Self {
        ResourceKey::name(name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Name(name) => write!(f, "{name}"),
            ResourceKey::Type(t) => write!(f, "{{Type #{}}}", t.to_raw()),
            ResourceKey::DataTemplate(t) => write!(f, "{{DataTemplate #{}}}", t.to_raw()),
        }
    }
}

/// Who a dictionary serves
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceOwner {
    Element(NodeId),
    Application,
}

/// What changed in a dictionary
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceChange {
    Keys(SmallVec<[ResourceKey; 2]>),
    /// Structural change; every key must be considered changed
    Catastrophic,
}

impl ResourceChange {
    pub fn single(key: ResourceKey) -> Self {
        let mut keys = SmallVec::new();
        keys.push(key);
        ResourceChange::Keys(keys)
    }

    pub fn affects(&self, key: &ResourceKey) -> bool {
        match self {
            ResourceChange::Keys(keys) => keys.contains(key),
            ResourceChange::Catastrophic => true,
        }
    }

    pub fn may_affect_implicit_styles(&self) -> bool {
        match self {
            ResourceChange::Keys(keys) => keys.iter().any(ResourceKey::is_implicit_style_key),
            ResourceChange::Catastrophic => true,
        }
    }

    pub fn may_affect_data_templates(&self) -> bool {
        match self {
            ResourceChange::Keys(keys) => keys.iter().any(ResourceKey::is_data_template_key),
            ResourceChange::Catastrophic => true,
        }
    }
}

/// A change notification queued for the owners of a dictionary
#[derive(Clone, Debug, PartialEq)]
pub struct ResourcesChanged {
    pub owners: SmallVec<[ResourceOwner; 2]>,
    pub change: ResourceChange,
}
