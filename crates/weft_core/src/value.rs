//! Dynamically typed property values
//!
//! Every property in the engine stores a [`Value`]. Primitive variants are
//! compared structurally; [`ObjectRef`] compares by identity, the same way a
//! reference-typed property would.
//!
//! Values decide whether they may be shared between template instances via
//! [`Value::is_shareable`]: primitives, strings, colors and types always are,
//! objects only once frozen.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::element::NodeId;
use crate::property::TypeKey;

/// RGBA color with linear components in the 0..1 range
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);
    pub const GRAY: Color = Color::rgb(0.5, 0.5, 0.5);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_hex(hex: u32) -> Self {
        let r = ((hex >> 16) & 0xFF) as f32 / 255.0;
        let g = ((hex >> 8) & 0xFF) as f32 / 255.0;
        let b = (hex & 0xFF) as f32 / 255.0;
        Self::rgb(r, g, b)
    }

    /// Linear interpolation between two colors
    pub fn lerp(a: &Color, b: &Color, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        Color {
            r: a.r + (b.r - a.r) * t,
            g: a.g + (b.g - a.g) * t,
            b: a.b + (b.b - a.b) * t,
            a: a.a + (b.a - a.a) * t,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Shared, type-erased object stored in a property
///
/// Equality is identity: two `ObjectRef`s are equal only if they point at
/// the same allocation.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Arc<dyn Any + Send + Sync>,
    type_key: Option<TypeKey>,
    frozen: bool,
}

impl ObjectRef {
    /// Wrap a mutable (unfrozen) object
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_key: None,
            frozen: false,
        }
    }

    /// Wrap an object that will never change again
    pub fn frozen<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_key: None,
            frozen: true,
        }
    }

    /// Wrap an already shared allocation
    pub fn from_arc(inner: Arc<dyn Any + Send + Sync>, frozen: bool) -> Self {
        Self {
            inner,
            type_key: None,
            frozen,
        }
    }

    /// Tag the object with the registry type it was constructed from
    pub fn with_type(mut self, type_key: TypeKey) -> Self {
        self.type_key = Some(type_key);
        self
    }

    pub fn type_key(&self) -> Option<TypeKey> {
        self.type_key
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Recover the shared allocation as a concrete type
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.inner) as *const (),
            Arc::as_ptr(&other.inner) as *const (),
        )
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("ptr", &(Arc::as_ptr(&self.inner) as *const ()))
            .field("type_key", &self.type_key)
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// A property value
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// No value; reading an unset property yields its default
    #[default]
    Unset,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Color(Color),
    Type(TypeKey),
    Node(NodeId),
    Object(ObjectRef),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Value::Object(ObjectRef::new(value))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            Value::Color(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<TypeKey> {
        match self {
            Value::Type(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Downcast an object value to a concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_object().and_then(|o| o.downcast_ref::<T>())
    }

    /// Whether a single instance of this value can be handed to every
    /// instance of a template without being re-created
    pub fn is_shareable(&self) -> bool {
        match self {
            Value::Unset
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Color(_)
            | Value::Type(_) => true,
            Value::Node(_) => false,
            Value::Object(o) => o.is_frozen(),
        }
    }

    /// Registry type of the value when it is known
    pub fn type_key(&self) -> Option<TypeKey> {
        match self {
            Value::Object(o) => o.type_key(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Color> for Value {
    fn from(v: Color) -> Self {
        Value::Color(v)
    }
}

impl From<TypeKey> for Value {
    fn from(v: TypeKey) -> Self {
        Value::Type(v)
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Value::Node(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

/// Generic object built from markup: a typed property bag with optional
/// collection items
///
/// Non-element values in templates (brushes, transforms, collections) are
/// materialized as `ObjectValue`s. Freezable types with shareable contents
/// are frozen once and shared by every template instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectValue {
    type_key: TypeKey,
    properties: Vec<(Arc<str>, Value)>,
    items: Vec<Value>,
}

impl ObjectValue {
    pub fn new(type_key: TypeKey) -> Self {
        Self {
            type_key,
            properties: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Set a named property, replacing an earlier assignment
    pub fn set_property(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.properties.iter_mut().find(|(n, _)| &**n == name) {
            slot.1 = value;
        } else {
            self.properties.push((Arc::from(name), value));
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set_property(name, value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, v)| v)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(n, v)| (&**n, v))
    }

    pub fn push_item(&mut self, value: Value) {
        self.items.push(value);
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Whether every contained value can be shared
    pub fn contents_shareable(&self) -> bool {
        self.properties.iter().all(|(_, v)| v.is_shareable())
            && self.items.iter().all(Value::is_shareable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_identity_equality() {
        let a = ObjectRef::new(5u32);
        let b = a.clone();
        let c = ObjectRef::new(5u32);
        assert_eq!(Value::Object(a.clone()), Value::Object(b));
        assert_ne!(Value::Object(a), Value::Object(c));
    }

    #[test]
    fn test_shareability() {
        assert!(Value::from(3).is_shareable());
        assert!(Value::from("text").is_shareable());
        assert!(!Value::object(vec![1, 2]).is_shareable());
        assert!(Value::Object(ObjectRef::frozen(vec![1, 2])).is_shareable());
    }

    #[test]
    fn test_object_value_properties() {
        let mut obj = ObjectValue::new(TypeKey::from_raw(0)).with_property("Color", Color::RED);
        obj.set_property("Color", Value::Color(Color::BLUE));
        assert_eq!(obj.property("Color"), Some(&Value::Color(Color::BLUE)));
        assert!(obj.contents_shareable());
        obj.push_item(Value::object(1u8));
        assert!(!obj.contents_shareable());
    }

    #[test]
    fn test_color_lerp_clamps() {
        let c = Color::lerp(&Color::BLACK, &Color::WHITE, 2.0);
        assert_eq!(c, Color::WHITE);
    }
}
