//! Resource lookup along the tree
//!
//! Each node on the way up is asked in order: its own dictionary, its
//! applied style (and `BasedOn` chain), its theme style, then the template
//! that generated it. The climb follows inheritance parents and stops at an
//! inheritance skip boundary; the boundary decides whether application and
//! theme resources are still consulted.

use weft_core::{BaseValueSource, CoreError, InheritanceBehavior, NodeId, PropertyId, SkipTarget, Value};

use super::{Framework, ResourcesChangedHandler};
use crate::error::Result;
use crate::resources::{ResourceChange, ResourceDictionary, ResourceKey, ResourceOwner};

impl Framework {
    /// Find `key` starting at `node`, falling back to application and theme
    /// resources. A miss is `Ok(None)`.
    pub fn find_resource(&self, node: NodeId, key: &ResourceKey) -> Result<Option<Value>> {
        let (found, skip) = self.find_in_tree(node, key)?;
        if found.is_some() {
            return Ok(found);
        }
        match skip {
            SkipTarget::App => match self.application_resources.get(key)? {
                Some(value) => Ok(Some(value)),
                None => self.theme.find_resource(key),
            },
            SkipTarget::Theme => self.theme.find_resource(key),
            SkipTarget::None => Ok(None),
        }
    }

    /// Tree and application lookup without theme dictionaries, used for
    /// implicit styles
    pub(crate) fn find_resource_excluding_theme(&self, node: NodeId, key: &ResourceKey) -> Result<Option<Value>> {
        let (found, skip) = self.find_in_tree(node, key)?;
        match (found, skip) {
            (Some(value), _) => Ok(Some(value)),
            (None, SkipTarget::App) => self.application_resources.get(key),
            (None, _) => Ok(None),
        }
    }

    fn find_in_tree(&self, node: NodeId, key: &ResourceKey) -> Result<(Option<Value>, SkipTarget)> {
        let mut current = node;
        let mut steps = 0;
        loop {
            if let Some(value) = self.find_on_node(current, key)? {
                return Ok((Some(value), SkipTarget::App));
            }
            let Some(parent) = self.tree.inheritance_parent(current) else {
                return Ok((None, SkipTarget::App));
            };
            let child_behavior = self.tree.inheritance_behavior(current);
            let parent_behavior = self.tree.inheritance_behavior(parent);
            if !InheritanceBehavior::edge_allows(child_behavior, parent_behavior) {
                let boundary = if child_behavior.is_now() {
                    child_behavior
                } else {
                    parent_behavior
                };
                return Ok((None, boundary.skip_target()));
            }
            steps += 1;
            if steps > self.config.max_tree_depth {
                return Err(CoreError::TreeLoop {
                    limit: self.config.max_tree_depth,
                }
                .into());
            }
            current = parent;
        }
    }

    fn find_on_node(&self, node: NodeId, key: &ResourceKey) -> Result<Option<Value>> {
        let Some(state) = self.state(node) else {
            return Ok(None);
        };
        if let Some(dictionary) = &state.resources {
            if let Some(value) = dictionary.get(key)? {
                return Ok(Some(value));
            }
        }
        for instance in [&state.style, &state.theme_style].into_iter().flatten() {
            if let Some(value) = instance.style.find_resource(key)? {
                return Ok(Some(value));
            }
        }
        let generator = state
            .templated_parent
            .and_then(|p| self.state(p))
            .and_then(|s| s.template.as_ref());
        match generator {
            Some(instance) => instance.template.find_resource(key),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Dictionaries
    // =========================================================================

    /// The node's own dictionary, created on first use
    pub fn resources(&mut self, node: NodeId) -> Result<ResourceDictionary> {
        self.ensure_node(node)?;
        if let Some(dictionary) = self.state(node).and_then(|s| s.resources.clone()) {
            return Ok(dictionary);
        }
        let dictionary = ResourceDictionary::new();
        dictionary.add_owner(ResourceOwner::Element(node));
        dictionary.set_change_sink(self.resource_sink.clone());
        self.state_mut(node)?.resources = Some(dictionary.clone());
        Ok(dictionary)
    }

    /// Replace the node's dictionary. Every resource below the node is
    /// re-resolved.
    pub fn set_resources(&mut self, node: NodeId, dictionary: Option<ResourceDictionary>) -> Result<()> {
        self.ensure_node(node)?;
        if let Some(dictionary) = &dictionary {
            dictionary.add_owner(ResourceOwner::Element(node));
            dictionary.set_change_sink(self.resource_sink.clone());
        }
        let old = std::mem::replace(&mut self.state_mut(node)?.resources, dictionary);
        if let Some(old) = old {
            old.remove_owner(ResourceOwner::Element(node));
        }
        self.invalidate_resources(node, &ResourceChange::Catastrophic)
    }

    /// Set `property` to the value of `key`, re-resolved whenever the
    /// resource or the node's position changes
    pub fn set_resource_reference(
        &mut self,
        node: NodeId,
        property: PropertyId,
        key: impl Into<ResourceKey>,
    ) -> Result<()> {
        self.ensure_node(node)?;
        let key = key.into();
        let value = self.find_resource(node, &key)?;
        self.state_mut(node)?.resource_refs.insert(property, key);
        self.write(node, property, BaseValueSource::Local, value)
    }

    /// Call `handler` whenever a resource change reaches `node`
    pub fn add_resources_changed_handler(&mut self, node: NodeId, handler: ResourcesChangedHandler) -> Result<()> {
        self.state_mut(node)?.resources_changed.push(handler);
        Ok(())
    }

    /// Deliver queued dictionary change notifications to their owners
    pub(crate) fn process_resource_changes(&mut self) -> Result<()> {
        let mut rounds = 0;
        loop {
            let changes = std::mem::take(&mut *self.resource_sink.lock());
            if changes.is_empty() {
                return Ok(());
            }
            rounds += 1;
            if rounds > self.config.max_tree_depth {
                return Err(CoreError::TreeLoop {
                    limit: self.config.max_tree_depth,
                }
                .into());
            }
            for changed in changes {
                tracing::debug!(owners = changed.owners.len(), change = ?changed.change, "resources changed");
                for owner in changed.owners {
                    match owner {
                        ResourceOwner::Element(node) => {
                            if self.tree.contains(node) {
                                self.invalidate_resources(node, &changed.change)?;
                            }
                        }
                        ResourceOwner::Application => {
                            for root in self.roots() {
                                self.invalidate_resources(root, &changed.change)?;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Re-apply theme styles and re-resolve every resource after theme
    /// dictionaries changed
    pub fn invalidate_theme(&mut self) -> Result<()> {
        let nodes: Vec<NodeId> = self.tree.ids().collect();
        for node in nodes {
            if self.tree.contains(node) {
                self.update_theme_style(node)?;
            }
        }
        for root in self.roots() {
            self.invalidate_resources(root, &ResourceChange::Catastrophic)?;
        }
        Ok(())
    }

    /// Nodes without an effective parent
    fn roots(&self) -> Vec<NodeId> {
        self.tree
            .ids()
            .filter(|n| self.tree.effective_parent(*n).is_none())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::resources::{ResourceDictionary, ResourceKey};
    use crate::setter::Setter;
    use crate::style::Style;
    use crate::test_support::Fixture;
    use weft_core::{BaseValueSource, Color, InheritanceBehavior, Value};

    #[test]
    fn test_lookup_climbs_to_application_then_theme() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, child).unwrap();

        let theme = ResourceDictionary::new();
        theme.insert("accent", Color::GRAY).unwrap();
        f.fw.theme().add_dictionary(theme);
        assert_eq!(
            f.fw.find_resource(child, &ResourceKey::name("accent")).unwrap(),
            Some(Value::Color(Color::GRAY))
        );

        f.fw.application_resources().insert("accent", Color::BLUE).unwrap();
        assert_eq!(
            f.fw.find_resource(child, &ResourceKey::name("accent")).unwrap(),
            Some(Value::Color(Color::BLUE))
        );

        f.fw.resources(panel).unwrap().insert("accent", Color::RED).unwrap();
        assert_eq!(
            f.fw.find_resource(child, &ResourceKey::name("accent")).unwrap(),
            Some(Value::Color(Color::RED))
        );
        assert_eq!(f.fw.find_resource(child, &ResourceKey::name("missing")).unwrap(), None);
    }

    #[test]
    fn test_skip_boundary_limits_lookup() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, child).unwrap();
        f.fw.resources(panel).unwrap().insert("k", 1).unwrap();
        f.fw.application_resources().insert("k", 2).unwrap();
        let theme = ResourceDictionary::new();
        theme.insert("k", 3).unwrap();
        f.fw.theme().add_dictionary(theme);

        let key = ResourceKey::name("k");
        f.fw.set_inheritance_behavior(child, InheritanceBehavior::SkipToAppNow).unwrap();
        assert_eq!(f.fw.find_resource(child, &key).unwrap(), Some(Value::Int(2)));
        f.fw.set_inheritance_behavior(child, InheritanceBehavior::SkipToThemeNow).unwrap();
        assert_eq!(f.fw.find_resource(child, &key).unwrap(), Some(Value::Int(3)));
        f.fw.set_inheritance_behavior(child, InheritanceBehavior::SkipAllNow).unwrap();
        assert_eq!(f.fw.find_resource(child, &key).unwrap(), None);
        f.fw.set_inheritance_behavior(child, InheritanceBehavior::Default).unwrap();
        assert_eq!(f.fw.find_resource(child, &key).unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn test_resource_reference_follows_dictionary_changes() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, child).unwrap();
        let dictionary = f.fw.resources(panel).unwrap();
        dictionary.insert("brush", Color::RED).unwrap();

        f.fw.set_resource_reference(child, f.wk.background, "brush").unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.background), Value::Color(Color::RED));

        dictionary.insert("brush", Color::GREEN).unwrap();
        f.fw.run_dispatcher().unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.background), Value::Color(Color::GREEN));

        f.fw.set_value(child, f.wk.background, Color::BLUE).unwrap();
        dictionary.insert("brush", Color::WHITE).unwrap();
        f.fw.run_dispatcher().unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.background), Value::Color(Color::BLUE));
    }

    #[test]
    fn test_resource_reference_follows_reparenting() {
        let mut f = Fixture::new();
        let left = f.fw.create(f.wk.panel).unwrap();
        let right = f.fw.create(f.wk.panel).unwrap();
        f.fw.resources(left).unwrap().insert("brush", Color::RED).unwrap();
        f.fw.resources(right).unwrap().insert("brush", Color::BLUE).unwrap();

        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(left, child).unwrap();
        f.fw.set_resource_reference(child, f.wk.background, "brush").unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.background), Value::Color(Color::RED));

        f.fw.remove_visual_child(left, child).unwrap();
        f.fw.add_visual_child(right, child).unwrap();
        assert_eq!(f.fw.get_value(child, f.wk.background), Value::Color(Color::BLUE));
    }

    #[test]
    fn test_implicit_style_applies_and_updates() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let button = f.fw.create(f.button).unwrap();
        let red = Style::builder(f.button)
            .setter(Setter::new(f.wk.background, Color::RED))
            .build();
        let dictionary = f.fw.resources(panel).unwrap();
        dictionary.insert(ResourceKey::Type(f.button), red).unwrap();

        f.fw.add_visual_child(panel, button).unwrap();
        assert_eq!(f.fw.get_value(button, f.wk.background), Value::Color(Color::RED));
        assert_eq!(
            f.fw.value_source(button, f.wk.style),
            BaseValueSource::ImplicitStyleReference
        );

        let blue = Style::builder(f.button)
            .setter(Setter::new(f.wk.background, Color::BLUE))
            .build();
        dictionary.insert(ResourceKey::Type(f.button), blue).unwrap();
        f.fw.run_dispatcher().unwrap();
        assert_eq!(f.fw.get_value(button, f.wk.background), Value::Color(Color::BLUE));

        f.fw.remove_visual_child(panel, button).unwrap();
        assert!(f.fw.applied_style(button).is_none());
        assert_eq!(f.fw.get_value(button, f.wk.background), Value::Color(Color::TRANSPARENT));
    }

    #[test]
    fn test_explicit_style_beats_implicit() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let button = f.fw.create(f.button).unwrap();
        let implicit = Style::builder(f.button)
            .setter(Setter::new(f.wk.background, Color::RED))
            .build();
        f.fw.resources(panel)
            .unwrap()
            .insert(ResourceKey::Type(f.button), implicit)
            .unwrap();
        let explicit = Style::builder(f.button)
            .setter(Setter::new(f.wk.background, Color::GREEN))
            .build();
        f.fw.set_value(button, f.wk.style, explicit).unwrap();

        f.fw.add_visual_child(panel, button).unwrap();
        assert_eq!(f.fw.get_value(button, f.wk.background), Value::Color(Color::GREEN));
    }

    #[test]
    fn test_resources_changed_listeners() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, child).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.fw.add_resources_changed_handler(child, Arc::new(move |_, node| sink.lock().push(node)))
            .unwrap();
        f.fw.resources(panel).unwrap().insert("k", 1).unwrap();
        f.fw.run_dispatcher().unwrap();
        assert_eq!(*seen.lock(), vec![child]);
    }
}
