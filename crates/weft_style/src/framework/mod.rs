//! Framework context
//!
//! [`Framework`] owns the element tree and every side table the styling
//! engine keeps per node: template child index and templated parent,
//! loaded-ness bookkeeping, the applied style, theme style and template,
//! resource references, event handlers and visual state groups.
//!
//! All tree mutations go through the framework so that inherited values,
//! implicit styles, resource references and Loaded/Unloaded notifications
//! follow every attach and detach.
//!
//! # Example
//!
//! ```ignore
//! let mut fw = Framework::new(Arc::new(registry));
//! let root = fw.create(wk.panel)?;
//! fw.set_presentation_root(root, true)?;
//! let button = fw.create(button_type)?;
//! fw.set_value(button, wk.style, style.to_value())?;
//! fw.add_visual_child(root, button)?;
//! fw.run_dispatcher();
//! ```

mod expander;
mod resources;
mod styling;
mod values;

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use slotmap::SecondaryMap;
use smallvec::SmallVec;
use weft_animation::{AnimationClock, ClockId};
use weft_core::{
    CoreError, Dispatcher, DispatcherOperation, ElementTree, FrameworkConfig, InheritanceBehavior,
    NodeId, NodeKind, PropertyId, PropertyRegistry, TypeKey, Value, WalkContext,
};

pub(crate) use expander::TemplateInstance;
pub(crate) use styling::StyleInstance;

use crate::compiler::TableRole;
use crate::error::Result;
use crate::events::{EventRegistry, HandlerEntry, RoutedEvent, RoutingStrategy};
use crate::resources::{
    ResourceChangeSink, ResourceDictionary, ResourceKey, ResourceOwner, ThemeResourceCache,
};
use crate::style::Style;
use crate::template::FrameworkTemplate;
use crate::trigger::ConditionContext;
use crate::visual_state::{GroupInstance, PendingTransition};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct NodeFlags: u8 {
        /// This node or a descendant listens for Loaded/Unloaded
        const SUBTREE_HAS_LOADED_CHANGE_HANDLER = 1 << 0;
        /// Cached loaded state; only maintained while the flag above is set
        const IS_LOADED = 1 << 1;
    }
}

/// A queued Loaded or Unloaded broadcast
#[derive(Clone, Copy, Debug)]
pub(crate) struct PendingBroadcast {
    pub(crate) operation: DispatcherOperation,
    /// Effective parent when the broadcast was scheduled
    pub(crate) parent: Option<NodeId>,
}

/// A storyboard begun by a trigger action
#[derive(Clone, Debug)]
pub(crate) struct BegunStoryboard {
    pub(crate) name: Option<Arc<str>>,
    pub(crate) clock: ClockId,
    pub(crate) role: TableRole,
}

/// Listener for resource changes affecting a node
pub type ResourcesChangedHandler = Arc<dyn Fn(&mut Framework, NodeId) + Send + Sync>;

#[derive(Default)]
pub(crate) struct NodeState {
    pub(crate) template_child_index: Option<usize>,
    pub(crate) templated_parent: Option<NodeId>,
    pub(crate) flags: NodeFlags,
    pub(crate) loaded_pending: Option<PendingBroadcast>,
    pub(crate) unloaded_pending: Option<PendingBroadcast>,
    pub(crate) style: Option<StyleInstance>,
    pub(crate) theme_style: Option<StyleInstance>,
    pub(crate) template: Option<TemplateInstance>,
    /// Node content a presenter attached as its visual child
    pub(crate) presented: Option<NodeId>,
    pub(crate) resources: Option<ResourceDictionary>,
    /// Local dynamic resource references
    pub(crate) resource_refs: FxHashMap<PropertyId, ResourceKey>,
    pub(crate) handlers: Vec<HandlerEntry>,
    pub(crate) resources_changed: Vec<ResourcesChangedHandler>,
    pub(crate) visual_state_groups: Vec<GroupInstance>,
    pub(crate) storyboards: Vec<BegunStoryboard>,
    pub(crate) row_definitions: Vec<NodeId>,
    pub(crate) column_definitions: Vec<NodeId>,
}

pub struct Framework {
    pub(crate) registry: Arc<PropertyRegistry>,
    pub(crate) tree: ElementTree,
    pub(crate) dispatcher: Dispatcher<Framework>,
    pub(crate) config: FrameworkConfig,
    pub(crate) theme: Arc<ThemeResourceCache>,
    pub(crate) application_resources: ResourceDictionary,
    pub(crate) resource_sink: ResourceChangeSink,
    pub(crate) clock: AnimationClock,
    pub(crate) nodes: SecondaryMap<NodeId, NodeState>,
    pub(crate) events: EventRegistry,
    pub(crate) next_handler_id: u64,
    pub(crate) transitions: Vec<PendingTransition>,
    /// Nesting of property change notifications
    pub(crate) change_depth: usize,
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("nodes", &self.tree.len())
            .field("pending_operations", &self.dispatcher.pending_count())
            .field("running_clocks", &self.clock.active_count())
            .finish()
    }
}

impl WalkContext for Framework {
    fn element_tree(&self) -> &ElementTree {
        &self.tree
    }
}

impl ConditionContext for Framework {
    fn value_of(&self, node: NodeId, property: PropertyId) -> Value {
        self.tree.get_value(node, property)
    }

    fn templated_parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.templated_parent(node)
    }
}

impl Framework {
    pub fn new(registry: Arc<PropertyRegistry>) -> Self {
        Self::with_config(registry, FrameworkConfig::default())
    }

    pub fn with_config(registry: Arc<PropertyRegistry>, config: FrameworkConfig) -> Self {
        Self::with_theme(registry, config, Arc::new(ThemeResourceCache::new()))
    }

    /// Build a framework sharing an existing theme cache
    pub fn with_theme(
        registry: Arc<PropertyRegistry>,
        config: FrameworkConfig,
        theme: Arc<ThemeResourceCache>,
    ) -> Self {
        let resource_sink = ResourceChangeSink::default();
        let application_resources = ResourceDictionary::new();
        application_resources.add_owner(ResourceOwner::Application);
        application_resources.set_change_sink(resource_sink.clone());
        application_resources.enable_cross_thread_access(theme.lock());

        Self {
            tree: ElementTree::new(registry.clone()),
            registry,
            dispatcher: Dispatcher::new(),
            config,
            theme,
            application_resources,
            resource_sink,
            clock: AnimationClock::new(),
            nodes: SecondaryMap::new(),
            events: EventRegistry::new(),
            next_handler_id: 0,
            transitions: Vec::new(),
            change_depth: 0,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn registry(&self) -> &Arc<PropertyRegistry> {
        &self.registry
    }

    pub fn tree(&self) -> &ElementTree {
        &self.tree
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn theme(&self) -> &Arc<ThemeResourceCache> {
        &self.theme
    }

    pub fn application_resources(&self) -> &ResourceDictionary {
        &self.application_resources
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn register_event(&mut self, name: &str, strategy: RoutingStrategy) -> Result<RoutedEvent> {
        self.events.register(name, strategy)
    }

    pub(crate) fn ensure_node(&self, node: NodeId) -> Result<()> {
        if self.tree.contains(node) && self.nodes.contains_key(node) {
            Ok(())
        } else {
            Err(CoreError::NodeNotFound(node).into())
        }
    }

    pub(crate) fn state(&self, node: NodeId) -> Option<&NodeState> {
        self.nodes.get(node)
    }

    pub(crate) fn state_mut(&mut self, node: NodeId) -> Result<&mut NodeState> {
        self.nodes
            .get_mut(node)
            .ok_or_else(|| CoreError::NodeNotFound(node).into())
    }

    pub(crate) fn flags(&self, node: NodeId) -> NodeFlags {
        self.nodes.get(node).map(|s| s.flags).unwrap_or_default()
    }

    pub(crate) fn is_framework_object(&self, node: NodeId) -> bool {
        self.tree
            .kind(node)
            .is_some_and(NodeKind::is_framework_object)
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Create a detached node. Its theme style, if any, is applied at once.
    pub fn create(&mut self, type_key: TypeKey) -> Result<NodeId> {
        let node = self.tree.create(type_key)?;
        self.nodes.insert(node, NodeState::default());
        self.update_theme_style(node)?;
        Ok(node)
    }

    /// Destroy a node
    ///
    /// A loaded node and its subtree receive Unloaded before it goes away.
    /// Its template-generated children are destroyed with it; its other
    /// children become detached roots.
    pub fn destroy(&mut self, node: NodeId) -> Result<()> {
        self.ensure_node(node)?;
        if self.is_loaded(node) {
            self.broadcast_loaded_change(node, false)?;
        }
        let parents = self.tree.parents(node);
        let orphans = self.tree.all_children(node);
        self.dispose(node)?;
        for parent in parents {
            self.remove_loaded_change_handler(parent);
        }
        for orphan in orphans {
            if self.tree.contains(orphan) {
                self.invalidate_tree(orphan)?;
            }
        }
        Ok(())
    }

    /// Drop a node and everything the framework generated for it
    pub(crate) fn dispose(&mut self, node: NodeId) -> Result<()> {
        self.teardown_template(node, false)?;
        self.detach_presented(node)?;
        self.stop_visual_state_clocks(node)?;
        self.stop_storyboards(node, None)?;

        if let Some(grid) = self.tree.logical_parent(node).and_then(|p| self.nodes.get_mut(p)) {
            grid.row_definitions.retain(|d| *d != node);
            grid.column_definitions.retain(|d| *d != node);
        }
        if let Some(mut state) = self.nodes.remove(node) {
            for pending in [state.loaded_pending.take(), state.unloaded_pending.take()]
                .into_iter()
                .flatten()
            {
                self.dispatcher.abort(pending.operation);
            }
            if let Some(dictionary) = &state.resources {
                dictionary.remove_owner(ResourceOwner::Element(node));
            }
        }
        self.transitions
            .retain(|t| t.holder != node && t.control != node);
        tracing::trace!(?node, "node disposed");
        self.tree.destroy(node)?;
        Ok(())
    }

    // =========================================================================
    // Tree mutation
    // =========================================================================

    pub fn add_visual_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.tree.add_visual_child(parent, child)?;
        self.on_attached(child)
    }

    pub fn remove_visual_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.tree.remove_visual_child(parent, child)?;
        self.on_detached(child, parent)
    }

    pub fn add_logical_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.tree.add_logical_child(parent, child)?;
        self.on_attached(child)
    }

    pub fn remove_logical_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.tree.remove_logical_child(parent, child)?;
        self.on_detached(child, parent)
    }

    /// Register a popup; its content is walked as a logical child of `owner`
    pub fn add_popup(&mut self, owner: NodeId, popup: NodeId) -> Result<()> {
        self.tree.add_popup(owner, popup)?;
        self.on_attached(popup)
    }

    pub fn remove_popup(&mut self, owner: NodeId, popup: NodeId) -> Result<()> {
        self.tree.remove_popup(owner, popup)?;
        self.on_detached(popup, owner)
    }

    pub fn set_inheritance_context(&mut self, node: NodeId, context: Option<NodeId>) -> Result<()> {
        let old = self.tree.inheritance_context(node);
        if old == context {
            return Ok(());
        }
        self.tree.set_inheritance_context(node, context)?;
        if let Some(old) = old {
            self.on_detached(node, old)?;
        }
        if context.is_some() {
            self.on_attached(node)?;
        }
        Ok(())
    }

    pub fn set_inheritance_behavior(
        &mut self,
        node: NodeId,
        behavior: InheritanceBehavior,
    ) -> Result<()> {
        if self.tree.inheritance_behavior(node) == behavior {
            return Ok(());
        }
        self.tree.set_inheritance_behavior(node, behavior)?;
        self.invalidate_tree(node)?;
        for child in self.tree.all_children(node) {
            self.invalidate_tree(child)?;
        }
        Ok(())
    }

    /// Mark `node` as hosted by a presentation source, loading its subtree
    pub fn set_presentation_root(&mut self, node: NodeId, hosted: bool) -> Result<()> {
        self.ensure_node(node)?;
        if self.tree.is_presentation_root(node) == hosted {
            return Ok(());
        }
        self.tree.set_presentation_root(node, hosted)?;
        self.on_presentation_changed(node, hosted)
    }

    /// Grid row definitions added by templates or [`Framework::add_row_definition`]
    pub fn row_definitions(&self, grid: NodeId) -> &[NodeId] {
        self.state(grid)
            .map(|s| s.row_definitions.as_slice())
            .unwrap_or(&[])
    }

    pub fn column_definitions(&self, grid: NodeId) -> &[NodeId] {
        self.state(grid)
            .map(|s| s.column_definitions.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_row_definition(&mut self, grid: NodeId, definition: NodeId) -> Result<()> {
        self.add_grid_definition(grid, definition)?;
        self.on_attached(definition)
    }

    pub fn add_column_definition(&mut self, grid: NodeId, definition: NodeId) -> Result<()> {
        self.add_grid_definition(grid, definition)?;
        self.on_attached(definition)
    }

    // =========================================================================
    // Templates and styles
    // =========================================================================

    pub fn templated_parent(&self, node: NodeId) -> Option<NodeId> {
        self.state(node).and_then(|s| s.templated_parent)
    }

    /// Slot of a template-generated node; 0 for the templated element itself
    pub fn template_child_index(&self, node: NodeId) -> Option<usize> {
        self.state(node).and_then(|s| s.template_child_index)
    }

    pub fn template_root(&self, node: NodeId) -> Option<NodeId> {
        self.state(node)?.template.as_ref()?.root
    }

    /// Find a named node in the template applied to `node`
    pub fn get_template_child(&self, node: NodeId, name: &str) -> Option<NodeId> {
        self.state(node)?.template.as_ref()?.names.get(name).copied()
    }

    pub fn applied_template(&self, node: NodeId) -> Option<FrameworkTemplate> {
        self.state(node)?
            .template
            .as_ref()
            .map(|t| t.template.clone())
    }

    pub fn applied_style(&self, node: NodeId) -> Option<Style> {
        self.state(node)?.style.as_ref().map(|s| s.style.clone())
    }

    pub fn applied_theme_style(&self, node: NodeId) -> Option<Style> {
        self.state(node)?.theme_style.as_ref().map(|s| s.style.clone())
    }

    // =========================================================================
    // Loaded state
    // =========================================================================

    pub fn subtree_has_loaded_change_handler(&self, node: NodeId) -> bool {
        self.flags(node)
            .contains(NodeFlags::SUBTREE_HAS_LOADED_CHANGE_HANDLER)
    }

    pub fn is_loaded_pending(&self, node: NodeId) -> bool {
        self.state(node).is_some_and(|s| {
            s.loaded_pending
                .is_some_and(|p| self.dispatcher.is_pending(p.operation))
        })
    }

    pub fn is_unloaded_pending(&self, node: NodeId) -> bool {
        self.state(node).is_some_and(|s| {
            s.unloaded_pending
                .is_some_and(|p| self.dispatcher.is_pending(p.operation))
        })
    }

    // =========================================================================
    // Time
    // =========================================================================

    /// Deliver pending resource changes, then run every queued dispatcher
    /// operation. Returns how many operations ran.
    pub fn run_dispatcher(&mut self) -> Result<usize> {
        self.process_resource_changes()?;
        Ok(Dispatcher::process_all(self, |fw| &mut fw.dispatcher))
    }

    pub fn has_pending_operations(&self) -> bool {
        self.dispatcher.has_pending()
    }

    /// Advance running animations by `dt` and finish completed transitions
    pub fn tick(&mut self, dt: Duration) -> Result<()> {
        self.clock.tick(dt);
        self.apply_clock_output()?;
        self.poll_transitions()
    }

    /// Apply animated values and released targets produced by the clock
    pub(crate) fn apply_clock_output(&mut self) -> Result<()> {
        let output = self.clock.drain();
        for animated in output.values {
            if !self.tree.contains(animated.node) {
                continue;
            }
            let change =
                self.tree
                    .set_animated_value(animated.node, animated.property, animated.value)?;
            if let Some(change) = change {
                self.on_property_changed(animated.node, &change)?;
            }
        }
        for (node, property) in output.released {
            if !self.tree.contains(node) {
                continue;
            }
            if let Some(change) = self.tree.clear_animated_value(node, property)? {
                self.on_property_changed(node, &change)?;
            }
        }
        Ok(())
    }

    /// Stop storyboards begun on `node`, all roles when `role` is `None`
    pub(crate) fn stop_storyboards(&mut self, node: NodeId, role: Option<TableRole>) -> Result<()> {
        let Some(state) = self.nodes.get_mut(node) else {
            return Ok(());
        };
        let mut stopped: SmallVec<[ClockId; 4]> = SmallVec::new();
        state.storyboards.retain(|s| {
            let matches = role.map_or(true, |r| s.role == r);
            if matches {
                stopped.push(s.clock);
            }
            !matches
        });
        for clock in stopped {
            if self.clock.is_running(clock) {
                self.clock.stop(clock)?;
            }
        }
        self.apply_clock_output()
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::Fixture;

    #[test]
    fn test_create_and_destroy() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, child).unwrap();
        assert_eq!(f.fw.tree().visual_parent(child), Some(panel));

        f.fw.destroy(panel).unwrap();
        assert!(!f.fw.tree().contains(panel));
        assert!(f.fw.tree().contains(child));
        assert_eq!(f.fw.tree().visual_parent(child), None);
        assert!(f.fw.destroy(panel).is_err());
    }

    #[test]
    fn test_create_rejects_non_element_types() {
        let mut f = Fixture::new();
        assert!(f.fw.create(f.wk.freezable).is_err());
    }

    #[test]
    fn test_grid_definitions() {
        let mut f = Fixture::new();
        let grid = f.fw.create(f.wk.grid).unwrap();
        let row = f.fw.create(f.wk.row_definition).unwrap();
        f.fw.add_row_definition(grid, row).unwrap();
        assert_eq!(f.fw.row_definitions(grid), &[row]);
        assert_eq!(f.fw.tree().logical_parent(row), Some(grid));
        assert!(f.fw.column_definitions(grid).is_empty());
    }
}
