//! Deferred template content
//!
//! Template content recorded as a stream of markup node events and replayed
//! when the template is sealed. Replaying builds the same [`TemplateNode`]
//! tree a [`FrameworkElementFactory`](super::FrameworkElementFactory) would.
//!
//! Non-element objects (brushes, transforms, collections) become
//! [`ObjectValue`]s. A frozen-able object whose contents are all shareable is
//! frozen once and shared by every instance; anything else (collections,
//! plain objects, freezables holding mutable values) is copied per instance.
//! Resource references inside nested objects are not supported.

use std::sync::Arc;

use weft_core::{
    ObjectRef, ObjectValue, PropertyId, PropertyRegistry, TypeKey, TypeKind, Value,
};

use super::TemplateNode;
use crate::compiler::CompiledValue;
use crate::error::{Result, StyleError};
use crate::resources::ResourceKey;

/// Member of the current object
#[derive(Clone, Debug, PartialEq)]
pub enum Member {
    Property(PropertyId),
    /// Property of a non-element object, or an element property by name
    Named(Arc<str>),
    /// `x:Name`
    Name,
    /// Child elements, or collection items
    Content,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MarkupValue {
    Literal(Value),
    TemplateBinding(PropertyId),
    StaticResource(ResourceKey),
    DynamicResource(ResourceKey),
}

impl From<Value> for MarkupValue {
    fn from(value: Value) -> Self {
        MarkupValue::Literal(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MarkupNode {
    StartObject(TypeKey),
    /// The current value of the open member; its content is added to it
    GetObject,
    EndObject,
    StartMember(Member),
    EndMember,
    Value(MarkupValue),
    NamespaceDeclaration {
        prefix: Arc<str>,
        namespace: Arc<str>,
    },
}

/// Recorded markup for a template's visual tree
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateContent {
    nodes: Vec<MarkupNode>,
}

impl TemplateContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = MarkupNode>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn push(&mut self, node: MarkupNode) {
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[MarkupNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replay the stream into a template node tree
    pub(crate) fn replay(&self, registry: &PropertyRegistry, share_values: bool) -> Result<TemplateNode> {
        let mut replay = Replay {
            registry,
            share_values,
            stack: Vec::new(),
            root: None,
            position: 0,
        };
        for (position, node) in self.nodes.iter().enumerate() {
            replay.position = position;
            replay.step(node)?;
        }
        replay.position = self.nodes.len();
        if !replay.stack.is_empty() {
            return Err(replay.error("unexpected end of markup"));
        }
        let root = replay.root.take();
        root.ok_or_else(|| replay.error("template content has no root element"))
    }
}

/// Completed non-element object
struct BuiltObject {
    object: ObjectValue,
    kind: TypeKind,
    /// Every contained value can be shared
    shareable: bool,
}

enum Frame {
    Element {
        node: TemplateNode,
        member: Option<Member>,
    },
    Object {
        object: BuiltObject,
        member: Option<Member>,
    },
    /// Opened by `GetObject`; forwards content to the frame below
    Existing { member: Option<Member> },
}

impl Frame {
    fn member(&self) -> Option<&Member> {
        match self {
            Frame::Element { member, .. }
            | Frame::Object { member, .. }
            | Frame::Existing { member } => member.as_ref(),
        }
    }

    fn member_mut(&mut self) -> &mut Option<Member> {
        match self {
            Frame::Element { member, .. }
            | Frame::Object { member, .. }
            | Frame::Existing { member } => member,
        }
    }
}

enum Built {
    Element(TemplateNode),
    Object(BuiltObject),
}

struct Replay<'a> {
    registry: &'a PropertyRegistry,
    share_values: bool,
    stack: Vec<Frame>,
    root: Option<TemplateNode>,
    position: usize,
}

impl Replay<'_> {
    fn error(&self, message: impl Into<String>) -> StyleError {
        StyleError::Parse {
            position: self.position,
            message: message.into(),
        }
    }

    fn step(&mut self, node: &MarkupNode) -> Result<()> {
        match node {
            MarkupNode::NamespaceDeclaration { .. } => Ok(()),
            MarkupNode::StartObject(type_key) => self.start_object(*type_key),
            MarkupNode::GetObject => {
                self.require_open_member()?;
                self.stack.push(Frame::Existing { member: None });
                Ok(())
            }
            MarkupNode::EndObject => self.end_object(),
            MarkupNode::StartMember(member) => {
                let Some(frame) = self.stack.last_mut() else {
                    return Err(self.error("member outside of an object"));
                };
                if frame.member().is_some() {
                    return Err(self.error("member started inside another member"));
                }
                *frame.member_mut() = Some(member.clone());
                Ok(())
            }
            MarkupNode::EndMember => {
                let Some(frame) = self.stack.last_mut() else {
                    return Err(self.error("end of member outside of an object"));
                };
                if frame.member_mut().take().is_none() {
                    return Err(self.error("end of member without a start"));
                }
                Ok(())
            }
            MarkupNode::Value(value) => self.value(value),
        }
    }

    fn require_open_member(&self) -> Result<()> {
        match self.stack.last() {
            Some(frame) if frame.member().is_some() => Ok(()),
            Some(_) => Err(self.error("object outside of a member")),
            None => Err(self.error("object value outside of the root element")),
        }
    }

    fn start_object(&mut self, type_key: TypeKey) -> Result<()> {
        let Some(kind) = self.registry.type_kind(type_key) else {
            return Err(self.error(format!("unknown type #{}", type_key.to_raw())));
        };
        if self.stack.is_empty() {
            if self.root.is_some() {
                return Err(self.error("template content has more than one root"));
            }
            if !kind.is_tree_node() {
                return Err(self.error("template root must be an element"));
            }
        } else {
            self.require_open_member()?;
        }

        let frame = if kind.is_tree_node() {
            Frame::Element {
                node: TemplateNode {
                    type_key,
                    kind,
                    name: None,
                    slot: None,
                    values: Vec::new(),
                    children: Vec::new(),
                },
                member: None,
            }
        } else {
            Frame::Object {
                object: BuiltObject {
                    object: ObjectValue::new(type_key),
                    kind,
                    shareable: true,
                },
                member: None,
            }
        };
        self.stack.push(frame);
        Ok(())
    }

    fn end_object(&mut self) -> Result<()> {
        let Some(frame) = self.stack.pop() else {
            return Err(self.error("end of object without a start"));
        };
        if frame.member().is_some() {
            return Err(self.error("object ended with an open member"));
        }
        let built = match frame {
            Frame::Element { node, .. } => Built::Element(node),
            Frame::Object { object, .. } => Built::Object(object),
            Frame::Existing { .. } => return Ok(()),
        };

        if self.stack.is_empty() {
            return match built {
                Built::Element(node) => {
                    self.root = Some(node);
                    Ok(())
                }
                Built::Object(_) => Err(self.error("template root must be an element")),
            };
        }
        self.attach(built)
    }

    /// Attach a completed object to the member it was declared in
    fn attach(&mut self, built: Built) -> Result<()> {
        let mut index = self.stack.len() - 1;
        let mut member = self.stack[index].member().cloned();
        // `GetObject` content goes to the object owning the open member
        if let Frame::Existing { .. } = self.stack[index] {
            if member != Some(Member::Content) {
                return Err(self.error("collection content must use the content member"));
            }
            if index == 0 {
                return Err(self.error("collection without an owner"));
            }
            index -= 1;
            member = Some(Member::Content);
        }
        let share = self.share_values;
        let position = self.position;
        let registry = self.registry;
        let error = |message: &str| StyleError::Parse {
            position,
            message: message.to_string(),
        };

        match (&mut self.stack[index], member, built) {
            (Frame::Element { node, .. }, Some(Member::Content), Built::Element(child)) => {
                node.children.push(child);
                Ok(())
            }
            (Frame::Element { node, .. }, Some(Member::Property(property)), Built::Object(object)) => {
                node.values.push((property, compile_object(object, share)));
                Ok(())
            }
            (Frame::Element { node, .. }, Some(Member::Named(name)), Built::Object(object)) => {
                let property = registry
                    .find_property(node.type_key, &name)
                    .ok_or_else(|| error("unknown property"))?;
                node.values.push((property, compile_object(object, share)));
                Ok(())
            }
            (Frame::Element { .. }, _, Built::Element(_)) => {
                Err(error("elements may only appear as content"))
            }
            (Frame::Element { .. }, _, Built::Object(_)) => {
                Err(error("objects may only appear as property values"))
            }
            (Frame::Object { object, .. }, Some(member), Built::Object(child)) => {
                let (value, shareable) = nest_object(child);
                object.shareable &= shareable;
                match member {
                    Member::Content => object.object.push_item(value),
                    Member::Named(name) => object.object.set_property(&name, value),
                    Member::Property(property) => {
                        object
                            .object
                            .set_property(registry.property_name(property), value)
                    }
                    Member::Name => return Err(error("objects cannot be named")),
                }
                Ok(())
            }
            (Frame::Object { .. }, _, _) => Err(error("elements cannot be nested in objects")),
            (Frame::Existing { .. }, _, _) => Err(error("nested collection without an owner")),
        }
    }

    fn value(&mut self, value: &MarkupValue) -> Result<()> {
        let Some(frame) = self.stack.last_mut() else {
            return Err(self.error("value outside of an object"));
        };
        let registry = self.registry;
        let position = self.position;
        let error = |message: &str| StyleError::Parse {
            position,
            message: message.to_string(),
        };

        match frame {
            Frame::Element { node, member } => match (member.clone(), value) {
                (Some(Member::Name), MarkupValue::Literal(Value::Str(name))) => {
                    node.name = Some(name.clone());
                    Ok(())
                }
                (Some(Member::Name), _) => Err(error("name must be a string literal")),
                (Some(Member::Property(property)), value) => {
                    push_element_value(registry, node, property, value);
                    Ok(())
                }
                (Some(Member::Named(name)), value) => {
                    let property = registry
                        .find_property(node.type_key, &name)
                        .ok_or_else(|| error("unknown property"))?;
                    push_element_value(registry, node, property, value);
                    Ok(())
                }
                (Some(Member::Content), _) => Err(error("text content is not supported")),
                (None, _) => Err(error("value outside of a member")),
            },
            Frame::Object { object, member } => {
                let MarkupValue::Literal(literal) = value else {
                    return Err(error("markup extensions are not supported inside objects"));
                };
                object.shareable &= literal.is_shareable();
                match member {
                    Some(Member::Content) => object.object.push_item(literal.clone()),
                    Some(Member::Named(name)) => object.object.set_property(name, literal.clone()),
                    Some(Member::Property(property)) => object
                        .object
                        .set_property(registry.property_name(*property), literal.clone()),
                    Some(Member::Name) => return Err(error("objects cannot be named")),
                    None => return Err(error("value outside of a member")),
                }
                Ok(())
            }
            Frame::Existing { .. } => Err(error("values cannot be added to a collection")),
        }
    }
}

fn push_element_value(
    registry: &PropertyRegistry,
    node: &mut TemplateNode,
    property: PropertyId,
    value: &MarkupValue,
) {
    let compiled = match value {
        MarkupValue::Literal(Value::Str(name)) if property == registry.well_known().name => {
            node.name = Some(name.clone());
            return;
        }
        MarkupValue::Literal(v) => CompiledValue::Shared(v.clone()),
        MarkupValue::TemplateBinding(source) => CompiledValue::TemplateBinding(*source),
        MarkupValue::StaticResource(key) => CompiledValue::StaticResource(key.clone()),
        MarkupValue::DynamicResource(key) => CompiledValue::DynamicResource(key.clone()),
    };
    node.values.push((property, compiled));
}

/// Decide whether an object set on an element is shared or copied
fn compile_object(built: BuiltObject, share_values: bool) -> CompiledValue {
    if share_values && built.kind == TypeKind::Freezable && built.shareable {
        let type_key = built.object.type_key();
        CompiledValue::Shared(Value::Object(
            ObjectRef::frozen(built.object).with_type(type_key),
        ))
    } else {
        CompiledValue::PerInstance(Arc::new(built.object))
    }
}

/// Value of an object nested in another, and whether it can be shared
fn nest_object(built: BuiltObject) -> (Value, bool) {
    let type_key = built.object.type_key();
    if built.kind == TypeKind::Freezable && built.shareable {
        (
            Value::Object(ObjectRef::frozen(built.object).with_type(type_key)),
            true,
        )
    } else {
        (
            Value::Object(ObjectRef::new(built.object).with_type(type_key)),
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brush_registry() -> (PropertyRegistry, TypeKey) {
        let mut registry = PropertyRegistry::new();
        let freezable = registry.well_known().freezable;
        let brush = registry
            .register_type("SolidColorBrush", Some(freezable), TypeKind::Freezable)
            .unwrap();
        (registry, brush)
    }

    #[test]
    fn test_replay_builds_tree() {
        let (registry, brush) = brush_registry();
        let wk = *registry.well_known();
        let content = TemplateContent::from_nodes([
            MarkupNode::NamespaceDeclaration {
                prefix: Arc::from("x"),
                namespace: Arc::from("urn:weft"),
            },
            MarkupNode::StartObject(wk.panel),
            MarkupNode::StartMember(Member::Name),
            MarkupNode::Value(MarkupValue::Literal(Value::str("Root"))),
            MarkupNode::EndMember,
            MarkupNode::StartMember(Member::Property(wk.tag)),
            MarkupNode::StartObject(brush),
            MarkupNode::StartMember(Member::Named(Arc::from("Color"))),
            MarkupNode::Value(MarkupValue::Literal(Value::Color(weft_core::Color::RED))),
            MarkupNode::EndMember,
            MarkupNode::EndObject,
            MarkupNode::EndMember,
            MarkupNode::StartMember(Member::Content),
            MarkupNode::StartObject(wk.content_presenter),
            MarkupNode::EndObject,
            MarkupNode::EndMember,
            MarkupNode::EndObject,
        ]);

        let root = content.replay(&registry, true).unwrap();
        assert_eq!(root.name.as_deref(), Some("Root"));
        assert_eq!(root.children.len(), 1);
        assert!(matches!(
            &root.values[0],
            (p, CompiledValue::Shared(Value::Object(o))) if *p == wk.tag && o.is_frozen()
        ));

        let unshared = content.replay(&registry, false).unwrap();
        assert!(matches!(&unshared.values[0].1, CompiledValue::PerInstance(_)));
    }

    #[test]
    fn test_collections_are_per_instance() {
        let registry = PropertyRegistry::new();
        let wk = *registry.well_known();
        let content = TemplateContent::from_nodes([
            MarkupNode::StartObject(wk.panel),
            MarkupNode::StartMember(Member::Property(wk.tag)),
            MarkupNode::StartObject(wk.collection),
            MarkupNode::StartMember(Member::Content),
            MarkupNode::Value(MarkupValue::Literal(Value::Int(1))),
            MarkupNode::EndMember,
            MarkupNode::EndObject,
            MarkupNode::EndMember,
            MarkupNode::EndObject,
        ]);
        let root = content.replay(&registry, true).unwrap();
        assert!(matches!(&root.values[0].1, CompiledValue::PerInstance(obj) if obj.items().len() == 1));
    }

    #[test]
    fn test_get_object_adds_children() {
        let registry = PropertyRegistry::new();
        let wk = *registry.well_known();
        let content = TemplateContent::from_nodes([
            MarkupNode::StartObject(wk.grid),
            MarkupNode::StartMember(Member::Named(Arc::from("RowDefinitions"))),
            MarkupNode::GetObject,
            MarkupNode::StartMember(Member::Content),
            MarkupNode::StartObject(wk.row_definition),
            MarkupNode::EndObject,
            MarkupNode::StartObject(wk.row_definition),
            MarkupNode::EndObject,
            MarkupNode::EndMember,
            MarkupNode::EndObject,
            MarkupNode::EndMember,
            MarkupNode::EndObject,
        ]);
        let root = content.replay(&registry, true).unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].type_key, wk.row_definition);
    }

    #[test]
    fn test_malformed_streams_report_position() {
        let registry = PropertyRegistry::new();
        let wk = *registry.well_known();

        let unbalanced = TemplateContent::from_nodes([
            MarkupNode::StartObject(wk.panel),
            MarkupNode::StartMember(Member::Content),
        ]);
        assert_eq!(
            unbalanced.replay(&registry, true),
            Err(StyleError::Parse {
                position: 2,
                message: "unexpected end of markup".into()
            })
        );

        let stray_end = TemplateContent::from_nodes([MarkupNode::EndMember]);
        assert!(matches!(
            stray_end.replay(&registry, true),
            Err(StyleError::Parse { position: 0, .. })
        ));

        let object_root = TemplateContent::from_nodes([
            MarkupNode::StartObject(wk.freezable),
            MarkupNode::EndObject,
        ]);
        assert!(matches!(
            object_root.replay(&registry, true),
            Err(StyleError::Parse { position: 0, .. })
        ));

        let value_in_content = TemplateContent::from_nodes([
            MarkupNode::StartObject(wk.panel),
            MarkupNode::Value(MarkupValue::Literal(Value::Int(1))),
        ]);
        assert!(matches!(
            value_in_content.replay(&registry, true),
            Err(StyleError::Parse { position: 1, .. })
        ));
    }

    #[test]
    fn test_stream_without_root_element() {
        let registry = PropertyRegistry::new();
        let empty = TemplateContent::from_nodes(Vec::<MarkupNode>::new());
        assert_eq!(
            empty.replay(&registry, true),
            Err(StyleError::Parse {
                position: 0,
                message: "template content has no root element".into()
            })
        );
    }
}
