//! Templates
//!
//! A [`FrameworkTemplate`] describes a visual tree that is instantiated for
//! every element using it: control templates through an element's
//! `Template` property, data templates through content presenters. The tree
//! comes either from a [`FrameworkElementFactory`] or from recorded
//! [`TemplateContent`] markup.
//!
//! Sealing assigns each tree node a slot (slot 0 is the templated element,
//! the template root is slot 1, then document order) and a name. Unnamed
//! nodes get a generated `"<slot>_T"` name; user names ending in `_T` are
//! reserved. Values and triggers are compiled into the same
//! [`CompiledTables`] styles use.

mod content;
mod factory;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use weft_core::{
    CompatibilityOptions, ObjectRef, PropertyId, PropertyRegistry, TypeKey, TypeKind, Value,
};

pub use content::{MarkupNode, MarkupValue, Member, TemplateContent};
pub use factory::FrameworkElementFactory;

use crate::compiler::{CompiledTables, CompiledValue, TableBuilder};
use crate::error::{Result, StyleError};
use crate::resources::{ResourceDictionary, ResourceKey};
use crate::trigger::Trigger;
use crate::visual_state::VisualStateGroup;

/// Suffix of generated child names
pub const GENERATED_NAME_SUFFIX: &str = "_T";

static NEXT_GLOBAL_INDEX: AtomicU64 = AtomicU64::new(1);

/// One node of a template's visual tree
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TemplateNode {
    pub(crate) type_key: TypeKey,
    pub(crate) kind: TypeKind,
    pub(crate) name: Option<Arc<str>>,
    /// `None` for 3D visuals
    pub(crate) slot: Option<usize>,
    pub(crate) values: Vec<(PropertyId, CompiledValue)>,
    pub(crate) children: Vec<TemplateNode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateKind {
    Control { target_type: Option<TypeKey> },
    Data { data_type: Option<TypeKey> },
}

#[derive(Clone, Debug, Default)]
enum TemplateSource {
    #[default]
    Empty,
    Factory(FrameworkElementFactory),
    Content(TemplateContent),
}

#[derive(Default)]
struct TemplateDefinition {
    source: TemplateSource,
    triggers: Vec<Trigger>,
    visual_state_groups: Vec<Arc<VisualStateGroup>>,
}

struct TemplateInner {
    global_index: u64,
    kind: TemplateKind,
    definition: RwLock<TemplateDefinition>,
    resources: ResourceDictionary,
    sealed: OnceLock<Arc<SealedTemplate>>,
}

/// Compiled form of a template
#[derive(Debug)]
pub struct SealedTemplate {
    pub(crate) root: Option<TemplateNode>,
    child_names: Vec<Arc<str>>,
    name_to_slot: FxHashMap<Arc<str>, usize>,
    tables: Arc<CompiledTables>,
    pub(crate) visual_state_groups: Vec<Arc<VisualStateGroup>>,
}

impl SealedTemplate {
    /// Slot of a named (or generated-name) child
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.name_to_slot.get(name).copied()
    }

    /// Child names in slot order; index 0 is slot 1
    pub fn child_names(&self) -> &[Arc<str>] {
        &self.child_names
    }

    /// Number of slots including slot 0
    pub fn slot_count(&self) -> usize {
        self.child_names.len() + 1
    }

    pub fn tables(&self) -> &Arc<CompiledTables> {
        &self.tables
    }
}

#[derive(Clone)]
pub struct FrameworkTemplate {
    inner: Arc<TemplateInner>,
}

impl PartialEq for FrameworkTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for FrameworkTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameworkTemplate")
            .field("global_index", &self.inner.global_index)
            .field("kind", &self.inner.kind)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl FrameworkTemplate {
    fn with_kind(kind: TemplateKind) -> Self {
        Self {
            inner: Arc::new(TemplateInner {
                global_index: NEXT_GLOBAL_INDEX.fetch_add(1, Ordering::Relaxed),
                kind,
                definition: RwLock::new(TemplateDefinition::default()),
                resources: ResourceDictionary::new(),
                sealed: OnceLock::new(),
            }),
        }
    }

    pub fn control(target_type: Option<TypeKey>) -> TemplateBuilder {
        TemplateBuilder {
            template: Self::with_kind(TemplateKind::Control { target_type }),
        }
    }

    pub fn data(data_type: Option<TypeKey>) -> TemplateBuilder {
        TemplateBuilder {
            template: Self::with_kind(TemplateKind::Data { data_type }),
        }
    }

    pub fn global_index(&self) -> u64 {
        self.inner.global_index
    }

    pub fn ptr_eq(&self, other: &FrameworkTemplate) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn kind(&self) -> TemplateKind {
        self.inner.kind
    }

    pub fn resources(&self) -> &ResourceDictionary {
        &self.inner.resources
    }

    /// Whether a control template may be applied to an element of `element_type`
    pub fn is_valid_for(&self, registry: &PropertyRegistry, element_type: TypeKey) -> Result<()> {
        match self.inner.kind {
            TemplateKind::Control {
                target_type: Some(target),
            } if !registry.is_assignable_from(target, element_type) => {
                Err(StyleError::InvalidTemplate(format!(
                    "template targets '{}', element is '{}'",
                    registry.type_name(target),
                    registry.type_name(element_type)
                )))
            }
            TemplateKind::Control { .. } => Ok(()),
            TemplateKind::Data { .. } => Err(StyleError::InvalidTemplate(
                "data templates cannot be used as control templates".into(),
            )),
        }
    }

    pub fn set_visual_tree(&self, factory: FrameworkElementFactory) -> Result<()> {
        self.edit(|def| def.source = TemplateSource::Factory(factory))
    }

    pub fn set_content(&self, content: TemplateContent) -> Result<()> {
        self.edit(|def| def.source = TemplateSource::Content(content))
    }

    pub fn add_trigger(&self, trigger: Trigger) -> Result<()> {
        self.edit(|def| def.triggers.push(trigger))
    }

    /// Visual state groups given to the template root of every instance
    pub fn add_visual_state_group(&self, group: VisualStateGroup) -> Result<()> {
        self.edit(|def| def.visual_state_groups.push(Arc::new(group)))
    }

    fn edit(&self, f: impl FnOnce(&mut TemplateDefinition)) -> Result<()> {
        if self.is_sealed() {
            return Err(StyleError::Sealed("template"));
        }
        f(&mut self.inner.definition.write());
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.get().is_some()
    }

    pub fn sealed(&self) -> Option<Arc<SealedTemplate>> {
        self.inner.sealed.get().cloned()
    }

    pub fn find_resource(&self, key: &ResourceKey) -> Result<Option<Value>> {
        self.inner.resources.get(key)
    }

    /// Compile the template. Sealing an already sealed template does nothing.
    pub fn seal(
        &self,
        registry: &PropertyRegistry,
        options: &CompatibilityOptions,
    ) -> Result<Arc<SealedTemplate>> {
        if let Some(sealed) = self.inner.sealed.get() {
            return Ok(sealed.clone());
        }

        let def = self.inner.definition.read();
        let mut root = match &def.source {
            TemplateSource::Empty => None,
            TemplateSource::Factory(factory) => Some(factory.to_node(registry)?),
            TemplateSource::Content(content) => {
                Some(content.replay(registry, options.share_template_values)?)
            }
        };

        let mut names = NameTable::default();
        if let Some(root) = root.as_mut() {
            names.assign(root)?;
            if let TemplateKind::Control {
                target_type: Some(target),
            } = self.inner.kind
            {
                alias_presenters(registry, target, root)?;
            }
        }

        let mut builder = TableBuilder::new(registry);
        builder.reserve_slots(names.child_names.len() + 1);
        if let Some(root) = &root {
            add_node_values(&mut builder, root);
        }
        let mut resolve = |name: Option<&str>| match name {
            None => Ok(0),
            Some(name) => names
                .name_to_slot
                .get(name)
                .copied()
                .ok_or_else(|| StyleError::UnknownChildName(name.to_string())),
        };
        for trigger in &def.triggers {
            builder.add_trigger(trigger, &mut resolve)?;
        }
        let tables = Arc::new(builder.finish());

        tracing::debug!(
            template = self.global_index(),
            slots = names.child_names.len() + 1,
            triggers = tables.trigger_count(),
            "template sealed"
        );
        let sealed = Arc::new(SealedTemplate {
            root,
            child_names: names.child_names,
            name_to_slot: names.name_to_slot,
            tables,
            visual_state_groups: def.visual_state_groups.clone(),
        });
        drop(def);
        Ok(self.inner.sealed.get_or_init(|| sealed).clone())
    }

    pub fn to_value(&self) -> Value {
        Value::Object(ObjectRef::from_arc(self.inner.clone(), true))
    }

    pub fn from_value(value: &Value) -> Option<FrameworkTemplate> {
        value
            .as_object()?
            .downcast_arc::<TemplateInner>()
            .map(|inner| FrameworkTemplate { inner })
    }
}

impl From<FrameworkTemplate> for Value {
    fn from(template: FrameworkTemplate) -> Self {
        template.to_value()
    }
}

pub struct TemplateBuilder {
    template: FrameworkTemplate,
}

impl TemplateBuilder {
    fn definition(&self) -> parking_lot::RwLockWriteGuard<'_, TemplateDefinition> {
        self.template.inner.definition.write()
    }

    pub fn visual_tree(self, factory: FrameworkElementFactory) -> Self {
        self.definition().source = TemplateSource::Factory(factory);
        self
    }

    pub fn content(self, content: TemplateContent) -> Self {
        self.definition().source = TemplateSource::Content(content);
        self
    }

    pub fn trigger(self, trigger: Trigger) -> Self {
        self.definition().triggers.push(trigger);
        self
    }

    pub fn visual_state_group(self, group: VisualStateGroup) -> Self {
        self.definition().visual_state_groups.push(Arc::new(group));
        self
    }

    pub fn resource(self, key: impl Into<ResourceKey>, value: impl Into<Value>) -> Result<Self> {
        self.template.resources().insert(key, value)?;
        Ok(self)
    }

    pub fn build(self) -> FrameworkTemplate {
        self.template
    }
}

#[derive(Default)]
struct NameTable {
    child_names: Vec<Arc<str>>,
    name_to_slot: FxHashMap<Arc<str>, usize>,
}

impl NameTable {
    /// Number nodes in document order and register their names
    fn assign(&mut self, node: &mut TemplateNode) -> Result<()> {
        if node.kind != TypeKind::Visual3D {
            let slot = self.child_names.len() + 1;
            let name = match &node.name {
                Some(name) => {
                    if name.ends_with(GENERATED_NAME_SUFFIX) {
                        return Err(StyleError::ReservedChildName(name.to_string()));
                    }
                    name.clone()
                }
                None => Arc::from(format!("{slot}{GENERATED_NAME_SUFFIX}")),
            };
            if self.name_to_slot.contains_key(&name) {
                return Err(StyleError::DuplicateChildName(name.to_string()));
            }
            self.name_to_slot.insert(name.clone(), slot);
            self.child_names.push(name);
            node.slot = Some(slot);
        } else if let Some(name) = &node.name {
            if name.ends_with(GENERATED_NAME_SUFFIX) {
                return Err(StyleError::ReservedChildName(name.to_string()));
            }
        }
        for child in &mut node.children {
            self.assign(child)?;
        }
        Ok(())
    }
}

/// Bind unconfigured content presenters to the templated parent's content
fn alias_presenters(
    registry: &PropertyRegistry,
    target: TypeKey,
    node: &mut TemplateNode,
) -> Result<()> {
    let wk = registry.well_known();
    if registry.is_assignable_from(wk.content_presenter, node.type_key) {
        alias_content_presenter(registry, target, node)?;
    } else if registry.is_assignable_from(wk.grid_view_row_presenter, node.type_key) {
        let has_content = node
            .values
            .iter()
            .any(|(p, _)| *p == wk.row_presenter_content);
        if !has_content {
            if let Some(source) = registry.find_property(target, "Content") {
                node.values.push((
                    wk.row_presenter_content,
                    CompiledValue::TemplateBinding(source),
                ));
            }
        }
    }
    for child in &mut node.children {
        alias_presenters(registry, target, child)?;
    }
    Ok(())
}

fn alias_content_presenter(
    registry: &PropertyRegistry,
    target: TypeKey,
    node: &mut TemplateNode,
) -> Result<()> {
    let wk = registry.well_known();
    let is_set = |node: &TemplateNode, property: PropertyId| {
        node.values.iter().any(|(p, _)| *p == property)
    };

    let explicit_source = node.values.iter().find_map(|(p, v)| match v {
        CompiledValue::Shared(Value::Str(s)) if *p == wk.content_source => Some(s.clone()),
        _ => None,
    });
    let source: Arc<str> = explicit_source.clone().unwrap_or_else(|| Arc::from("Content"));
    if source.is_empty() {
        return Ok(());
    }

    if !is_set(node, wk.presenter_content) {
        match registry.find_property(target, &source) {
            Some(property) => node
                .values
                .push((wk.presenter_content, CompiledValue::TemplateBinding(property))),
            None if explicit_source.is_some() => {
                return Err(StyleError::MissingContentSource {
                    property: source.to_string(),
                    target: registry.type_name(target).to_string(),
                })
            }
            None => return Ok(()),
        }
    }

    let siblings = [
        ("Template", wk.presenter_content_template),
        ("TemplateSelector", wk.presenter_content_template_selector),
        ("StringFormat", wk.presenter_content_string_format),
    ];
    for (suffix, presenter_property) in siblings {
        if is_set(node, presenter_property) {
            continue;
        }
        if let Some(property) = registry.find_property(target, &format!("{source}{suffix}")) {
            node.values
                .push((presenter_property, CompiledValue::TemplateBinding(property)));
        }
    }
    Ok(())
}

fn add_node_values(builder: &mut TableBuilder<'_>, node: &TemplateNode) {
    if let Some(slot) = node.slot {
        for (property, value) in &node.values {
            builder.add_value(slot, *property, value.clone());
        }
    }
    for child in &node.children {
        add_node_values(builder, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setter::Setter;
    use weft_core::Color;

    fn options() -> CompatibilityOptions {
        CompatibilityOptions::default()
    }

    fn button_registry() -> (PropertyRegistry, TypeKey) {
        let mut registry = PropertyRegistry::new();
        let content_control = registry.well_known().content_control;
        let button = registry
            .register_type("Button", Some(content_control), TypeKind::Element)
            .unwrap();
        (registry, button)
    }

    #[test]
    fn test_slots_and_generated_names() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let template = FrameworkTemplate::control(Some(button))
            .visual_tree(
                FrameworkElementFactory::new(wk.panel)
                    .with_name("Border")
                    .with_child(FrameworkElementFactory::new(wk.content_presenter))
                    .with_child(FrameworkElementFactory::new(wk.framework_element).with_name("Glyph")),
            )
            .build();

        let sealed = template.seal(&registry, &options()).unwrap();
        assert_eq!(sealed.slot_count(), 4);
        assert_eq!(sealed.slot_of("Border"), Some(1));
        assert_eq!(sealed.slot_of("2_T"), Some(2));
        assert_eq!(sealed.slot_of("Glyph"), Some(3));

        let again = template.seal(&registry, &options()).unwrap();
        assert!(Arc::ptr_eq(&sealed, &again));
        assert!(template.set_visual_tree(FrameworkElementFactory::new(wk.panel)).is_err());
    }

    #[test]
    fn test_duplicate_and_reserved_names() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let duplicate = FrameworkTemplate::control(Some(button))
            .visual_tree(
                FrameworkElementFactory::new(wk.panel)
                    .with_name("Part")
                    .with_child(FrameworkElementFactory::new(wk.panel).with_name("Part")),
            )
            .build();
        assert_eq!(
            duplicate.seal(&registry, &options()).unwrap_err(),
            StyleError::DuplicateChildName("Part".into())
        );

        let reserved = FrameworkTemplate::control(Some(button))
            .visual_tree(FrameworkElementFactory::new(wk.panel).with_name("1_T"))
            .build();
        assert_eq!(
            reserved.seal(&registry, &options()).unwrap_err(),
            StyleError::ReservedChildName("1_T".into())
        );
        assert!(!reserved.is_sealed());
    }

    #[test]
    fn test_content_presenter_aliasing() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let template = FrameworkTemplate::control(Some(button))
            .visual_tree(FrameworkElementFactory::new(wk.content_presenter))
            .build();
        let sealed = template.seal(&registry, &options()).unwrap();
        let tables = sealed.tables();
        assert!(matches!(
            tables.record(1, wk.presenter_content).and_then(|r| r.value.clone()),
            Some(CompiledValue::TemplateBinding(p)) if p == wk.content
        ));
        assert!(matches!(
            tables.record(1, wk.presenter_content_template).and_then(|r| r.value.clone()),
            Some(CompiledValue::TemplateBinding(p)) if p == wk.content_template
        ));
        assert_eq!(
            tables.template_bindings[&wk.content].as_slice(),
            &[(1, wk.presenter_content)]
        );
    }

    #[test]
    fn test_missing_explicit_content_source() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let template = FrameworkTemplate::control(Some(button))
            .visual_tree(
                FrameworkElementFactory::new(wk.content_presenter)
                    .with_value(wk.content_source, "Header"),
            )
            .build();
        assert_eq!(
            template.seal(&registry, &options()).unwrap_err(),
            StyleError::MissingContentSource {
                property: "Header".into(),
                target: "Button".into()
            }
        );
    }

    #[test]
    fn test_triggers_resolve_child_names() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let template = FrameworkTemplate::control(Some(button))
            .visual_tree(FrameworkElementFactory::new(wk.panel).with_name("Border"))
            .trigger(
                Trigger::property(wk.is_mouse_over, true)
                    .with_setter(Setter::new(wk.tag, Color::BLUE).with_target_name("Border")),
            )
            .build();
        let sealed = template.seal(&registry, &options()).unwrap();
        assert_eq!(sealed.tables().triggers[0].targets.as_slice(), &[(1, wk.tag)]);

        let unknown = FrameworkTemplate::control(Some(button))
            .visual_tree(FrameworkElementFactory::new(wk.panel))
            .trigger(
                Trigger::property(wk.is_mouse_over, true)
                    .with_setter(Setter::new(wk.tag, 1).with_target_name("Nope")),
            )
            .build();
        assert_eq!(
            unknown.seal(&registry, &options()).unwrap_err(),
            StyleError::UnknownChildName("Nope".into())
        );
    }

    #[test]
    fn test_factory_and_content_are_isomorphic() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let from_factory = FrameworkTemplate::control(Some(button))
            .visual_tree(
                FrameworkElementFactory::new(wk.panel)
                    .with_name("Root")
                    .with_value(wk.tag, 7)
                    .with_child(FrameworkElementFactory::new(wk.framework_element)),
            )
            .build();
        let from_content = FrameworkTemplate::control(Some(button))
            .content(TemplateContent::from_nodes([
                MarkupNode::StartObject(wk.panel),
                MarkupNode::StartMember(Member::Name),
                MarkupNode::Value(MarkupValue::Literal(Value::str("Root"))),
                MarkupNode::EndMember,
                MarkupNode::StartMember(Member::Property(wk.tag)),
                MarkupNode::Value(MarkupValue::Literal(Value::Int(7))),
                MarkupNode::EndMember,
                MarkupNode::StartMember(Member::Content),
                MarkupNode::StartObject(wk.framework_element),
                MarkupNode::EndObject,
                MarkupNode::EndMember,
                MarkupNode::EndObject,
            ]))
            .build();

        let a = from_factory.seal(&registry, &options()).unwrap();
        let b = from_content.seal(&registry, &options()).unwrap();
        assert_eq!(a.root, b.root);
        assert_eq!(a.child_names(), b.child_names());
    }

    #[test]
    fn test_validity_for_element_type() {
        let (registry, button) = button_registry();
        let wk = *registry.well_known();
        let template = FrameworkTemplate::control(Some(button)).build();
        assert!(template.is_valid_for(&registry, button).is_ok());
        assert!(template.is_valid_for(&registry, wk.control).is_err());
        let data = FrameworkTemplate::data(None).build();
        assert!(data.is_valid_for(&registry, button).is_err());
    }
}
