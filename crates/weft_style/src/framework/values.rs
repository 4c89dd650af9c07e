//! Property values and change notification
//!
//! Every write the engine makes goes through [`Framework::write`]. When the
//! effective value changes, [`Framework::on_property_changed`] reacts in a
//! fixed order: style, template and presenter properties first, then
//! inheritance to children, then trigger re-evaluation, then template
//! bindings that read the property.

use smallvec::SmallVec;
use weft_core::{
    BaseValueSource, CoreError, InheritanceBehavior, NodeId, PropertyChange, PropertyId, Value,
};

use super::Framework;
use crate::compiler::TableRole;
use crate::error::Result;

impl Framework {
    // =========================================================================
    // Public access
    // =========================================================================

    pub fn get_value(&self, node: NodeId, property: PropertyId) -> Value {
        self.tree.get_value(node, property)
    }

    pub fn value_source(&self, node: NodeId, property: PropertyId) -> BaseValueSource {
        self.tree.value_source(node, property)
    }

    /// Set a local value. Replaces any local resource reference on the
    /// property.
    pub fn set_value(
        &mut self,
        node: NodeId,
        property: PropertyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.ensure_node(node)?;
        self.state_mut(node)?.resource_refs.remove(&property);
        self.write(node, property, BaseValueSource::Local, Some(value.into()))
    }

    pub fn clear_value(&mut self, node: NodeId, property: PropertyId) -> Result<()> {
        self.ensure_node(node)?;
        self.state_mut(node)?.resource_refs.remove(&property);
        self.write(node, property, BaseValueSource::Local, None)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Set (`Some`) or clear (`None`) the value `source` contributes
    pub(crate) fn write(
        &mut self,
        node: NodeId,
        property: PropertyId,
        source: BaseValueSource,
        value: Option<Value>,
    ) -> Result<()> {
        let change = match value {
            Some(value) => self.tree.set_value_from(node, property, source, value)?,
            None => self.tree.clear_value_from(node, property, source)?,
        };
        if let Some(change) = change {
            tracing::trace!(
                ?node,
                property = self.registry.property_name(property),
                ?source,
                "effective value changed"
            );
            self.on_property_changed(node, &change)?;
        }
        Ok(())
    }

    pub(crate) fn on_property_changed(&mut self, node: NodeId, change: &PropertyChange) -> Result<()> {
        if self.change_depth > self.config.max_tree_depth {
            return Err(CoreError::TreeLoop {
                limit: self.config.max_tree_depth,
            }
            .into());
        }
        self.change_depth += 1;
        let result = self.dispatch_change(node, change.property);
        self.change_depth -= 1;
        result
    }

    fn dispatch_change(&mut self, node: NodeId, property: PropertyId) -> Result<()> {
        let wk = *self.registry.well_known();

        if property == wk.style {
            self.update_style(node)?;
        } else if property == wk.template {
            self.update_template(node)?;
        } else if (property == wk.presenter_content || property == wk.presenter_content_template)
            && self.tree.is_instance_of(node, wk.content_presenter)
        {
            self.update_presenter(node)?;
        }

        if self.registry.metadata(property).is_inherited() {
            self.propagate_inherited(node, property)?;
        }

        self.reevaluate_triggers(node, property)?;
        self.refresh_template_bindings(node, property)
    }

    fn reevaluate_triggers(&mut self, node: NodeId, property: PropertyId) -> Result<()> {
        for role in TableRole::ALL {
            let Some(tables) = self.applied_tables(node, role) else {
                continue;
            };
            if let Some(indices) = tables.trigger_sources.get(&(0, property)) {
                self.evaluate_triggers(node, role, indices)?;
            }
        }

        // Conditions of the templated parent's template that watch this child
        let (Some(parent), Some(slot)) = (self.templated_parent(node), self.template_child_index(node))
        else {
            return Ok(());
        };
        if slot == 0 {
            return Ok(());
        }
        if let Some(tables) = self.applied_tables(parent, TableRole::Template) {
            if let Some(indices) = tables.trigger_sources.get(&(slot, property)) {
                self.evaluate_triggers(parent, TableRole::Template, indices)?;
            }
        }
        Ok(())
    }

    /// Re-read template bindings and templated-parent conditions that
    /// depend on `property` of `node`
    fn refresh_template_bindings(&mut self, node: NodeId, property: PropertyId) -> Result<()> {
        if let Some(tables) = self.applied_tables(node, TableRole::Template) {
            if let Some(targets) = tables.template_bindings.get(&property) {
                for &(slot, target) in targets {
                    self.refresh_slot_property(node, TableRole::Template, slot, target)?;
                }
            }
        }

        let children: SmallVec<[NodeId; 8]> = self
            .state(node)
            .and_then(|s| s.template.as_ref())
            .map(|t| t.generated().collect())
            .unwrap_or_default();
        for child in children {
            for role in TableRole::ALL {
                let Some(tables) = self.applied_tables(child, role) else {
                    continue;
                };
                if role != TableRole::Template {
                    if let Some(targets) = tables.template_bindings.get(&property) {
                        for &(slot, target) in targets {
                            self.refresh_slot_property(child, role, slot, target)?;
                        }
                    }
                }
                if let Some(indices) = tables.templated_parent_sources.get(&property) {
                    self.evaluate_triggers(child, role, indices)?;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Inheritance
    // =========================================================================

    /// Push an inherited property from `node` down to the children that
    /// inherit from it
    pub(crate) fn propagate_inherited(&mut self, node: NodeId, property: PropertyId) -> Result<()> {
        for child in self.tree.all_children(node) {
            if self.tree.inheritance_parent(child) == Some(node) {
                self.update_inherited(child, property)?;
            }
        }
        Ok(())
    }

    /// Recompute the inherited layer of `property` on `node`
    pub(crate) fn update_inherited(&mut self, node: NodeId, property: PropertyId) -> Result<()> {
        let value = self
            .inheritance_source(node, property)
            .map(|parent| self.tree.get_value(parent, property))
            .filter(|value| *value != self.registry.default_value(property));
        self.write(node, property, BaseValueSource::Inherited, value)
    }

    /// Every inheritable property of `node`
    pub(crate) fn update_all_inherited(&mut self, node: NodeId) -> Result<()> {
        let properties = self.registry.inheritable_properties().to_vec();
        for property in properties {
            self.update_inherited(node, property)?;
        }
        Ok(())
    }

    /// Parent `node` inherits `property` from, if the edge lets it through
    fn inheritance_source(&self, node: NodeId, property: PropertyId) -> Option<NodeId> {
        let parent = self.tree.inheritance_parent(node)?;
        if self.registry.metadata(property).overrides_inheritance_behavior()
            || InheritanceBehavior::edge_allows(
                self.tree.inheritance_behavior(node),
                self.tree.inheritance_behavior(parent),
            )
        {
            Some(parent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::Fixture;
    use weft_core::{BaseValueSource, Color, InheritanceBehavior, Value};

    #[test]
    fn test_inherited_values_follow_attach_and_detach() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.set_value(panel, f.wk.foreground, Color::RED).unwrap();

        f.fw.add_visual_child(panel, child).unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.foreground), Value::Color(Color::RED));
        assert_eq!(f.fw.value_source(child, f.wk.foreground), BaseValueSource::Inherited);

        f.fw.set_value(panel, f.wk.foreground, Color::BLUE).unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.foreground), Value::Color(Color::BLUE));

        f.fw.remove_visual_child(panel, child).unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.foreground), Value::Color(Color::BLACK));
    }

    #[test]
    fn test_skip_boundary_blocks_all_but_forced_properties() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, child).unwrap();
        f.fw.set_inheritance_behavior(child, InheritanceBehavior::SkipAllNow)
            .unwrap();

        f.fw.set_value(panel, f.wk.font_size, 20.0).unwrap();
        f.fw.set_value(panel, f.wk.flow_direction, "RightToLeft").unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.font_size), Value::Float(12.0));
        assert_eq!(f.fw.get_value(child, f.wk.flow_direction), Value::str("RightToLeft"));
    }

    #[test]
    fn test_local_value_beats_inherited() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, child).unwrap();
        f.fw.set_value(child, f.wk.font_size, 9.0).unwrap();
        f.fw.set_value(panel, f.wk.font_size, 20.0).unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.font_size), Value::Float(9.0));

        f.fw.clear_value(child, f.wk.font_size).unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.font_size), Value::Float(20.0));
    }

    #[test]
    fn test_rejected_value_is_not_applied() {
        let mut f = Fixture::new();
        let node = f.fw.create(f.wk.framework_element).unwrap();
        assert!(f.fw.set_value(node, f.wk.opacity, 3.0).is_err());
        assert_eq!(f.fw.get_value(node, f.wk.opacity), Value::Float(1.0));
    }
}
