//! Setters
//!
//! A [`Setter`] assigns a value to a property of the styled element (or, in
//! a template trigger, of a named template child). An [`EventSetter`]
//! attaches a routed event handler while its style is applied.

use std::fmt;
use std::sync::Arc;

use weft_core::{Color, NodeId, ObjectRef, PropertyId, TypeKey, Value};

use crate::events::{EventHandler, RoutedEvent};
use crate::resources::ResourceKey;

/// Right-hand side of a setter
#[derive(Clone, Debug, PartialEq)]
pub enum SetterValue {
    Value(Value),
    /// Value of a property on the templated parent, tracked for changes
    TemplateBinding(PropertyId),
    /// Looked up once when applied; a miss is an error
    StaticResource(ResourceKey),
    /// Looked up when applied and again whenever the resource changes; a
    /// miss yields no value
    DynamicResource(ResourceKey),
}

impl SetterValue {
    pub fn resource_key(&self) -> Option<&ResourceKey> {
        match self {
            SetterValue::StaticResource(key) | SetterValue::DynamicResource(key) => Some(key),
            _ => None,
        }
    }
}

macro_rules! setter_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for SetterValue {
                fn from(value: $ty) -> Self {
                    SetterValue::Value(value.into())
                }
            }
        )*
    };
}

setter_value_from!(Value, bool, i32, i64, f64, &str, String, Color, TypeKey, NodeId, ObjectRef);

#[derive(Clone, Debug, PartialEq)]
pub struct Setter {
    pub property: PropertyId,
    pub value: SetterValue,
    pub target_name: Option<Arc<str>>,
}

impl Setter {
    pub fn new(property: PropertyId, value: impl Into<SetterValue>) -> Self {
        Self {
            property,
            value: value.into(),
            target_name: None,
        }
    }

    pub fn template_binding(property: PropertyId, source: PropertyId) -> Self {
        Self::new(property, SetterValue::TemplateBinding(source))
    }

    pub fn static_resource(property: PropertyId, key: impl Into<ResourceKey>) -> Self {
        Self::new(property, SetterValue::StaticResource(key.into()))
    }

    pub fn dynamic_resource(property: PropertyId, key: impl Into<ResourceKey>) -> Self {
        Self::new(property, SetterValue::DynamicResource(key.into()))
    }

    /// Target a named template child instead of the templated element
    pub fn with_target_name(mut self, name: &str) -> Self {
        self.target_name = Some(Arc::from(name));
        self
    }
}

#[derive(Clone)]
pub struct EventSetter {
    pub event: RoutedEvent,
    pub handler: EventHandler,
    pub handled_events_too: bool,
}

impl EventSetter {
    pub fn new(event: RoutedEvent, handler: EventHandler) -> Self {
        Self {
            event,
            handler,
            handled_events_too: false,
        }
    }

    pub fn handled_events_too(mut self) -> Self {
        self.handled_events_too = true;
        self
    }
}

impl fmt::Debug for EventSetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSetter")
            .field("event", &self.event)
            .field("handled_events_too", &self.handled_events_too)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum SetterBase {
    Setter(Setter),
    EventSetter(EventSetter),
}

impl From<Setter> for SetterBase {
    fn from(setter: Setter) -> Self {
        SetterBase::Setter(setter)
    }
}

impl From<EventSetter> for SetterBase {
    fn from(setter: EventSetter) -> Self {
        SetterBase::EventSetter(setter)
    }
}
