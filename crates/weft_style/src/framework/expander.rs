//! Template instantiation
//!
//! Expanding a sealed template creates one node per template node, links
//! them the way their kinds allow (visual where both ends have a visual
//! tree, logical otherwise, grid definitions into the grid's collections)
//! and attaches the root under the templated element. Every generated node
//! records its templated parent and slot. Values are applied after the
//! subtree is built, then the template's triggers are evaluated once.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use weft_core::{BaseValueSource, CoreError, NodeId, NodeKind, PropertyId, TypeKey, Value};

use super::{Framework, NodeState};
use crate::compiler::{CompiledValue, TableRole};
use crate::error::Result;
use crate::resources::ResourceKey;
use crate::template::{FrameworkTemplate, SealedTemplate, TemplateNode};

/// A template applied to one element
pub(crate) struct TemplateInstance {
    pub(crate) template: FrameworkTemplate,
    pub(crate) sealed: Arc<SealedTemplate>,
    /// Indexed by slot; slot 0 is the templated element
    pub(crate) children: Vec<Option<NodeId>>,
    pub(crate) root: Option<NodeId>,
    /// 3D visuals have no slot
    pub(crate) visual3d: Vec<NodeId>,
    pub(crate) names: FxHashMap<Arc<str>, NodeId>,
    pub(crate) active: Vec<bool>,
    /// Expanded by a content presenter rather than a `Template` property
    pub(crate) data: bool,
}

impl TemplateInstance {
    fn new(host: NodeId, template: FrameworkTemplate, sealed: Arc<SealedTemplate>, data: bool) -> Self {
        let mut children = vec![None; sealed.slot_count()];
        children[0] = Some(host);
        let active = vec![false; sealed.tables().trigger_count()];
        Self {
            template,
            sealed,
            children,
            root: None,
            visual3d: Vec::new(),
            names: FxHashMap::default(),
            active,
            data,
        }
    }

    pub(crate) fn slot_node(&self, slot: usize) -> Option<NodeId> {
        self.children.get(slot).copied().flatten()
    }

    /// Every generated node, slot order first
    pub(crate) fn generated(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children
            .iter()
            .skip(1)
            .flatten()
            .copied()
            .chain(self.visual3d.iter().copied())
    }
}

impl Framework {
    /// Apply whatever the `Template` property now holds
    pub(crate) fn update_template(&mut self, host: NodeId) -> Result<()> {
        let wk = *self.registry.well_known();
        let template = FrameworkTemplate::from_value(&self.tree.get_value(host, wk.template));
        let current = self
            .state(host)
            .and_then(|s| s.template.as_ref())
            .filter(|t| !t.data)
            .map(|t| t.template.clone());
        match (&current, &template) {
            (Some(a), Some(b)) if a.ptr_eq(b) => return Ok(()),
            (None, None) => return Ok(()),
            _ => {}
        }

        let sealed = match &template {
            Some(template) => {
                if let Some(element) = self.tree.type_of(host) {
                    template.is_valid_for(&self.registry, element)?;
                }
                Some(template.seal(&self.registry, &self.config.compatibility)?)
            }
            None => None,
        };
        self.teardown_template(host, true)?;
        match (template, sealed) {
            (Some(template), Some(sealed)) => self.expand(host, template, sealed, false),
            _ => Ok(()),
        }
    }

    /// Re-pick the content a presenter shows
    ///
    /// Node content becomes the presenter's visual child. Any other content
    /// is shown through the explicit content template or the data template
    /// found for its type, with the content as the presenter's data context.
    pub(crate) fn update_presenter(&mut self, presenter: NodeId) -> Result<()> {
        let wk = *self.registry.well_known();
        self.teardown_template(presenter, true)?;
        self.detach_presented(presenter)?;

        let content = self.tree.get_value(presenter, wk.presenter_content);
        if let Value::Node(child) = content {
            self.write(presenter, wk.data_context, BaseValueSource::ParentTemplate, None)?;
            self.tree.add_visual_child(presenter, child)?;
            self.state_mut(presenter)?.presented = Some(child);
            return self.on_attached(child);
        }
        if content.is_unset() {
            return self.write(presenter, wk.data_context, BaseValueSource::ParentTemplate, None);
        }

        self.write(
            presenter,
            wk.data_context,
            BaseValueSource::ParentTemplate,
            Some(content.clone()),
        )?;
        let Some(template) = self.content_template_for(presenter, &content)? else {
            tracing::trace!(?presenter, "no data template for presenter content");
            return Ok(());
        };
        let sealed = template.seal(&self.registry, &self.config.compatibility)?;
        self.expand(presenter, template, sealed, true)
    }

    pub(crate) fn content_template_for(&self, presenter: NodeId, content: &Value) -> Result<Option<FrameworkTemplate>> {
        let wk = self.registry.well_known();
        let explicit = self.tree.get_value(presenter, wk.presenter_content_template);
        if let Some(template) = FrameworkTemplate::from_value(&explicit) {
            return Ok(Some(template));
        }

        let mut data_type: Option<TypeKey> = content.type_key();
        let mut steps = 0;
        while let Some(current) = data_type {
            if let Some(found) = self.find_resource(presenter, &ResourceKey::DataTemplate(current))? {
                if let Some(template) = FrameworkTemplate::from_value(&found) {
                    return Ok(Some(template));
                }
            }
            steps += 1;
            if steps > self.config.max_tree_depth {
                break;
            }
            data_type = self.registry.base_type(current);
        }
        Ok(None)
    }

    pub(crate) fn detach_presented(&mut self, presenter: NodeId) -> Result<()> {
        let Some(child) = self.nodes.get_mut(presenter).and_then(|s| s.presented.take()) else {
            return Ok(());
        };
        if self.tree.contains(child) && self.tree.visual_parent(child) == Some(presenter) {
            self.tree.remove_visual_child(presenter, child)?;
            self.on_detached(child, presenter)?;
        }
        Ok(())
    }

    // =========================================================================
    // Expansion
    // =========================================================================

    fn expand(
        &mut self,
        host: NodeId,
        template: FrameworkTemplate,
        sealed: Arc<SealedTemplate>,
        data: bool,
    ) -> Result<()> {
        let mut instance = TemplateInstance::new(host, template, sealed.clone(), data);
        let mut local_values = Vec::new();
        if let Some(root) = &sealed.root {
            let id = self.instantiate(host, root, &sealed, &mut instance, &mut local_values, None)?;
            instance.root = Some(id);
        }
        let root = instance.root;
        let index = instance.template.global_index();
        self.state_mut(host)?.template = Some(instance);

        tracing::debug!(
            ?host,
            template = index,
            slots = sealed.slot_count(),
            data,
            "template expanded"
        );

        let Some(root) = root else {
            return Ok(());
        };

        // Flag lifecycle listeners while the generated tree is still
        // detached so attaching it broadcasts Loaded to them
        let tables = sealed.tables().clone();
        for trigger in &tables.triggers {
            if let Some((event, slot)) = trigger.event {
                if event.is_lifecycle() {
                    if let Some(node) = self.slot_node(host, TableRole::Template, slot) {
                        self.add_loaded_change_handler(node);
                    }
                }
            }
        }
        self.link_to_host(host, root)?;

        for slot in 1..sealed.slot_count() {
            let Some(node) = self.slot_node(host, TableRole::Template, slot) else {
                continue;
            };
            let Some(record) = tables.slots.get(slot) else {
                continue;
            };
            let plain: Vec<(PropertyId, CompiledValue)> = record
                .properties
                .iter()
                .filter_map(|(p, r)| r.value.clone().map(|v| (*p, v)))
                .collect();
            for (property, value) in plain {
                let value = self.resolve_compiled(node, host, TableRole::Template, &value)?;
                self.write(node, property, BaseValueSource::ParentTemplate, value)?;
            }
        }
        for (node, property, value) in local_values {
            let value = self.resolve_compiled(node, host, TableRole::Template, &value)?;
            self.write(node, property, BaseValueSource::Local, value)?;
        }

        self.on_attached(root)?;
        let all: Vec<usize> = (0..tables.trigger_count()).collect();
        self.evaluate_triggers(host, TableRole::Template, &all)?;

        for group in &sealed.visual_state_groups {
            self.install_visual_state_group(root, group.clone())?;
        }
        Ok(())
    }

    fn instantiate(
        &mut self,
        host: NodeId,
        node: &TemplateNode,
        sealed: &SealedTemplate,
        instance: &mut TemplateInstance,
        local_values: &mut Vec<(NodeId, PropertyId, CompiledValue)>,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let id = self.tree.create(node.type_key)?;
        self.nodes.insert(
            id,
            NodeState {
                templated_parent: Some(host),
                template_child_index: node.slot,
                ..NodeState::default()
            },
        );

        match node.slot {
            Some(slot) => {
                if let Some(entry) = instance.children.get_mut(slot) {
                    *entry = Some(id);
                }
                if let Some(name) = sealed.child_names().get(slot - 1) {
                    instance.names.insert(name.clone(), id);
                }
            }
            None => {
                instance.visual3d.push(id);
                if let Some(name) = &node.name {
                    instance.names.insert(name.clone(), id);
                }
                for (property, value) in &node.values {
                    local_values.push((id, *property, value.clone()));
                }
            }
        }

        if let Some(parent) = parent {
            self.link_template_child(parent, id)?;
        }
        self.update_theme_style(id)?;
        for child in &node.children {
            self.instantiate(host, child, sealed, instance, local_values, Some(id))?;
        }
        Ok(id)
    }

    fn link_template_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let wk = *self.registry.well_known();
        let is_definition = self.tree.is_instance_of(child, wk.row_definition)
            || self.tree.is_instance_of(child, wk.column_definition);
        if is_definition && self.tree.is_instance_of(parent, wk.grid) {
            return self.add_grid_definition(parent, child);
        }
        if self.both_visual(parent, child) {
            self.tree.add_visual_child(parent, child)?;
        } else {
            self.tree.add_logical_child(parent, child)?;
        }
        Ok(())
    }

    fn link_to_host(&mut self, host: NodeId, root: NodeId) -> Result<()> {
        if self.both_visual(host, root) {
            self.tree.add_visual_child(host, root)?;
        } else {
            self.tree.add_logical_child(host, root)?;
        }
        Ok(())
    }

    fn both_visual(&self, a: NodeId, b: NodeId) -> bool {
        let visual = |n| self.tree.kind(n).is_some_and(NodeKind::has_visual_tree);
        visual(a) && visual(b)
    }

    /// Add a row or column definition to a grid's collections
    pub(crate) fn add_grid_definition(&mut self, grid: NodeId, definition: NodeId) -> Result<()> {
        let wk = *self.registry.well_known();
        if !self.tree.is_instance_of(grid, wk.grid) {
            return Err(CoreError::InvalidTreeOperation("definitions can only be added to a Grid".into()).into());
        }
        let is_row = self.tree.is_instance_of(definition, wk.row_definition);
        if !is_row && !self.tree.is_instance_of(definition, wk.column_definition) {
            return Err(CoreError::InvalidTreeOperation("not a row or column definition".into()).into());
        }
        self.ensure_node(definition)?;
        self.tree.add_logical_child(grid, definition)?;
        let state = self.state_mut(grid)?;
        if is_row {
            state.row_definitions.push(definition);
        } else {
            state.column_definitions.push(definition);
        }
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Remove the template applied to `host` and destroy its generated nodes
    ///
    /// With `notify`, a loaded generated tree receives Unloaded first.
    pub(crate) fn teardown_template(&mut self, host: NodeId, notify: bool) -> Result<()> {
        let Some(instance) = self.nodes.get_mut(host).and_then(|s| s.template.take()) else {
            return Ok(());
        };
        tracing::debug!(?host, template = instance.template.global_index(), "tearing down template");

        self.stop_storyboards(host, Some(TableRole::Template))?;
        self.transitions.retain(|t| t.control != host);
        if let Some(slot) = instance.sealed.tables().slots.first() {
            for (property, record) in &slot.properties {
                if !record.triggered.is_empty() {
                    self.write(host, *property, BaseValueSource::TemplateTrigger, None)?;
                }
            }
        }

        if let Some(root) = instance.root.filter(|r| self.tree.contains(*r)) {
            if notify && self.is_loaded(root) {
                self.broadcast_loaded_change(root, false)?;
            }
            if self.tree.visual_parent(root) == Some(host) {
                self.tree.remove_visual_child(host, root)?;
            } else if self.tree.logical_parent(root) == Some(host) {
                self.tree.remove_logical_child(host, root)?;
            }
        }

        let generated: Vec<NodeId> = instance.generated().collect();
        for node in generated.into_iter().rev() {
            if self.tree.contains(node) {
                self.dispose(node)?;
            }
        }
        self.remove_loaded_change_handler(host);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::StyleError;
    use crate::resources::ResourceKey;
    use crate::setter::Setter;
    use crate::template::{FrameworkElementFactory, FrameworkTemplate};
    use crate::test_support::Fixture;
    use crate::trigger::Trigger;
    use weft_core::{BaseValueSource, Color, ObjectRef, ObjectValue, Value};

    fn border_template(f: &Fixture) -> FrameworkTemplate {
        FrameworkTemplate::control(Some(f.button))
            .visual_tree(
                FrameworkElementFactory::new(f.wk.panel)
                    .with_name("Border")
                    .with_template_binding(f.wk.background, f.wk.background)
                    .with_child(FrameworkElementFactory::new(f.wk.content_presenter)),
            )
            .trigger(
                Trigger::property(f.wk.is_mouse_over, true)
                    .with_setter(Setter::new(f.wk.foreground, Color::GREEN).with_target_name("Border")),
            )
            .build()
    }

    #[test]
    fn test_expansion_records_slots_and_parents() {
        let mut f = Fixture::new();
        let button = f.fw.create(f.button).unwrap();
        f.fw.set_value(button, f.wk.template, border_template(&f)).unwrap();

        let border = f.fw.get_template_child(button, "Border").unwrap();
        assert_eq!(f.fw.template_root(button), Some(border));
        assert_eq!(f.fw.tree().visual_parent(border), Some(button));
        assert_eq!(f.fw.templated_parent(border), Some(button));
        assert_eq!(f.fw.template_child_index(border), Some(1));

        let presenter = f.fw.get_template_child(button, "2_T").unwrap();
        assert_eq!(f.fw.tree().visual_parent(presenter), Some(border));
        assert_eq!(f.fw.template_child_index(presenter), Some(2));
    }

    #[test]
    fn test_template_binding_tracks_templated_parent() {
        let mut f = Fixture::new();
        let button = f.fw.create(f.button).unwrap();
        f.fw.set_value(button, f.wk.template, border_template(&f)).unwrap();
        let border = f.fw.get_template_child(button, "Border").unwrap();

        f.fw.set_value(button, f.wk.background, Color::RED).unwrap();
        assert_eq!(f.fw.get_value(border, f.wk.background), Value::Color(Color::RED));
        assert_eq!(f.fw.value_source(border, f.wk.background), BaseValueSource::ParentTemplate);

        f.fw.clear_value(button, f.wk.background).unwrap();
        assert_eq!(f.fw.get_value(border, f.wk.background), Value::Color(Color::TRANSPARENT));
    }

    #[test]
    fn test_template_trigger_targets_named_child() {
        let mut f = Fixture::new();
        let button = f.fw.create(f.button).unwrap();
        f.fw.set_value(button, f.wk.template, border_template(&f)).unwrap();
        let border = f.fw.get_template_child(button, "Border").unwrap();

        f.fw.set_value(button, f.wk.is_mouse_over, true).unwrap();
        assert_eq!(f.fw.get_value(border, f.wk.foreground), Value::Color(Color::GREEN));
        assert_eq!(
            f.fw.value_source(border, f.wk.foreground),
            BaseValueSource::ParentTemplateTrigger
        );
        f.fw.set_value(button, f.wk.is_mouse_over, false).unwrap();
        assert_eq!(f.fw.get_value(border, f.wk.foreground), Value::Color(Color::BLACK));
    }

    #[test]
    fn test_presenter_shows_templated_parent_content() {
        let mut f = Fixture::new();
        let button = f.fw.create(f.button).unwrap();
        f.fw.set_value(button, f.wk.template, border_template(&f)).unwrap();
        let presenter = f.fw.get_template_child(button, "2_T").unwrap();

        let label = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.set_value(button, f.wk.content, label).unwrap();
        assert_eq!(f.fw.tree().visual_parent(label), Some(presenter));

        f.fw.clear_value(button, f.wk.content).unwrap();
        assert_eq!(f.fw.tree().visual_parent(label), None);
        assert!(f.fw.tree().contains(label));
    }

    #[test]
    fn test_presenter_expands_implicit_data_template() {
        let mut f = Fixture::new();
        let item_type = f.item;
        let data_template = FrameworkTemplate::data(Some(item_type))
            .visual_tree(FrameworkElementFactory::new(f.wk.framework_element).with_name("Text"))
            .build();
        f.fw.application_resources()
            .insert(ResourceKey::DataTemplate(item_type), data_template)
            .unwrap();

        let presenter = f.fw.create(f.wk.content_presenter).unwrap();
        let item = Value::Object(
            ObjectRef::new(ObjectValue::new(item_type).with_property("Title", "hello")).with_type(item_type),
        );
        f.fw.set_value(presenter, f.wk.presenter_content, item.clone()).unwrap();

        let text = f.fw.get_template_child(presenter, "Text").unwrap();
        assert_eq!(f.fw.templated_parent(text), Some(presenter));
        assert_eq!(f.fw.get_value(text, f.wk.data_context), item);
    }

    #[test]
    fn test_replacing_template_destroys_generated_tree() {
        let mut f = Fixture::new();
        let button = f.fw.create(f.button).unwrap();
        f.fw.set_value(button, f.wk.template, border_template(&f)).unwrap();
        let border = f.fw.get_template_child(button, "Border").unwrap();

        f.fw.clear_value(button, f.wk.template).unwrap();
        assert!(!f.fw.tree().contains(border));
        assert!(f.fw.template_root(button).is_none());
        assert!(f.fw.tree().visual_children(button).is_empty());
    }

    #[test]
    fn test_template_for_other_type_is_rejected() {
        let mut f = Fixture::new();
        let template = FrameworkTemplate::control(Some(f.button)).build();
        let panel = f.fw.create(f.wk.control).unwrap();
        assert!(matches!(
            f.fw.set_value(panel, f.wk.template, template),
            Err(StyleError::InvalidTemplate(_))
        ));
        assert!(f.fw.template_root(panel).is_none());
    }

    #[test]
    fn test_grid_definitions_from_template() {
        let mut f = Fixture::new();
        let template = FrameworkTemplate::control(Some(f.button))
            .visual_tree(
                FrameworkElementFactory::new(f.wk.grid)
                    .with_child(FrameworkElementFactory::new(f.wk.row_definition))
                    .with_child(FrameworkElementFactory::new(f.wk.column_definition)),
            )
            .build();
        let button = f.fw.create(f.button).unwrap();
        f.fw.set_value(button, f.wk.template, template).unwrap();
        let grid = f.fw.template_root(button).unwrap();
        assert_eq!(f.fw.row_definitions(grid).len(), 1);
        assert_eq!(f.fw.column_definitions(grid).len(), 1);
    }
}
