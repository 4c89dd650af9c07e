//! Element tree
//!
//! A slotmap arena holding every node together with its three parent
//! relations:
//!
//! - **visual** parent/children (elements and 3D visuals only)
//! - **logical** parent/children (elements and content elements)
//! - **inheritance context** (a non-tree owner that still supplies
//!   inherited values and resources, e.g. a definition owned by a grid)
//!
//! The relations may diverge: a popup's child is logically owned by the
//! popup but lives in a different visual tree, and template-generated
//! visuals have a visual parent but no logical one. Algorithms that climb
//! the tree pick the relation they need through [`ElementTree::effective_parent`]
//! and [`ElementTree::inheritance_parent`], or [`ElementTree::parents`] when
//! they must visit all of them.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use slotmap::{new_key_type, Key, SlotMap};
use smallvec::SmallVec;

use crate::error::{CoreError, Result};
use crate::property::{PropertyId, PropertyRegistry, TypeKey, TypeKind};
use crate::store::{BaseValueSource, PropertyChange, PropertyStore};
use crate::value::Value;

new_key_type! {
    /// Generational handle of a tree node
    pub struct NodeId;
}

impl NodeId {
    /// Convert to a raw u64 representation
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    /// Create from a raw u64 representation
    pub fn from_raw(raw: u64) -> Self {
        Self::from(slotmap::KeyData::from_ffi(raw))
    }
}

/// The two framework object shapes plus 3D visuals
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Visual and logical tree participant
    Element,
    /// Logical-only participant
    ContentElement,
    /// 3D visual
    Visual3D,
}

impl NodeKind {
    pub fn is_framework_object(self) -> bool {
        matches!(self, NodeKind::Element | NodeKind::ContentElement)
    }

    pub fn has_visual_tree(self) -> bool {
        matches!(self, NodeKind::Element | NodeKind::Visual3D)
    }
}

/// Controls whether inherited values and resource lookups cross a node
///
/// `*Now` puts the boundary between the node and its parent: the node
/// itself no longer inherits. `*Next` puts it between the node and its
/// children: the node inherits normally, its children don't.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum InheritanceBehavior {
    #[default]
    Default,
    SkipToAppNow,
    SkipToAppNext,
    SkipToThemeNow,
    SkipToThemeNext,
    SkipAllNow,
    SkipAllNext,
}

/// Where a resource lookup continues after hitting a skip boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipTarget {
    App,
    Theme,
    None,
}

impl InheritanceBehavior {
    pub fn is_now(self) -> bool {
        matches!(
            self,
            Self::SkipToAppNow | Self::SkipToThemeNow | Self::SkipAllNow
        )
    }

    pub fn is_next(self) -> bool {
        matches!(
            self,
            Self::SkipToAppNext | Self::SkipToThemeNext | Self::SkipAllNext
        )
    }

    pub fn skip_target(self) -> SkipTarget {
        match self {
            Self::Default | Self::SkipToAppNow | Self::SkipToAppNext => SkipTarget::App,
            Self::SkipToThemeNow | Self::SkipToThemeNext => SkipTarget::Theme,
            Self::SkipAllNow | Self::SkipAllNext => SkipTarget::None,
        }
    }

    /// Whether a child may pull values from `parent` across this edge
    pub fn edge_allows(child: InheritanceBehavior, parent: InheritanceBehavior) -> bool {
        !child.is_now() && !parent.is_next()
    }
}

struct Node {
    kind: NodeKind,
    type_key: TypeKey,
    visual_parent: Option<NodeId>,
    visual_children: Vec<NodeId>,
    logical_parent: Option<NodeId>,
    logical_children: Vec<NodeId>,
    inheritance_context: Option<NodeId>,
    /// Nodes whose inheritance context is this node
    context_children: SmallVec<[NodeId; 2]>,
    popups: SmallVec<[NodeId; 1]>,
    /// Nodes this node is registered on as a popup
    popup_owners: SmallVec<[NodeId; 1]>,
    inheritance_behavior: InheritanceBehavior,
    values: PropertyStore,
}

/// Arena of nodes with visual, logical and inheritance-context relations
pub struct ElementTree {
    registry: Arc<PropertyRegistry>,
    nodes: SlotMap<NodeId, Node>,
    presentation_roots: FxHashSet<NodeId>,
}

impl ElementTree {
    pub fn new(registry: Arc<PropertyRegistry>) -> Self {
        Self {
            registry,
            nodes: SlotMap::with_key(),
            presentation_roots: FxHashSet::default(),
        }
    }

    pub fn registry(&self) -> &PropertyRegistry {
        &self.registry
    }

    pub fn shared_registry(&self) -> Arc<PropertyRegistry> {
        self.registry.clone()
    }

    /// Create a detached node of the given element type
    pub fn create(&mut self, type_key: TypeKey) -> Result<NodeId> {
        let kind = match self.registry.type_kind(type_key) {
            Some(TypeKind::Element) => NodeKind::Element,
            Some(TypeKind::ContentElement) => NodeKind::ContentElement,
            Some(TypeKind::Visual3D) => NodeKind::Visual3D,
            _ => {
                return Err(CoreError::NotAnElementType(
                    self.registry.type_name(type_key).to_string(),
                ))
            }
        };
        Ok(self.nodes.insert(Node {
            kind,
            type_key,
            visual_parent: None,
            visual_children: Vec::new(),
            logical_parent: None,
            logical_children: Vec::new(),
            inheritance_context: None,
            context_children: SmallVec::new(),
            popups: SmallVec::new(),
            popup_owners: SmallVec::new(),
            inheritance_behavior: InheritanceBehavior::Default,
            values: PropertyStore::new(),
        }))
    }

    /// Detach a node from every relation and drop it
    ///
    /// Children are left in the arena with the corresponding parent cleared.
    pub fn destroy(&mut self, node: NodeId) -> Result<()> {
        let Some(removed) = self.nodes.remove(node) else {
            return Err(CoreError::NodeNotFound(node));
        };
        if let Some(parent) = removed.visual_parent {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.visual_children.retain(|c| *c != node);
            }
        }
        if let Some(parent) = removed.logical_parent {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.logical_children.retain(|c| *c != node);
            }
        }
        for child in removed.visual_children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.visual_parent = None;
            }
        }
        for child in removed.logical_children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.logical_parent = None;
            }
        }
        if let Some(ctx) = removed.inheritance_context.and_then(|c| self.nodes.get_mut(c)) {
            ctx.context_children.retain(|c| *c != node);
        }
        for child in removed.context_children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.inheritance_context = None;
            }
        }
        for popup in removed.popups {
            if let Some(p) = self.nodes.get_mut(popup) {
                p.popup_owners.retain(|o| *o != node);
            }
        }
        for owner in removed.popup_owners {
            if let Some(o) = self.nodes.get_mut(owner) {
                o.popups.retain(|p| *p != node);
            }
        }
        self.presentation_roots.remove(&node);
        Ok(())
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.nodes.get(node).map(|n| n.kind)
    }

    pub fn type_of(&self, node: NodeId) -> Option<TypeKey> {
        self.nodes.get(node).map(|n| n.type_key)
    }

    /// `true` if the node's type is `base` or derives from it
    pub fn is_instance_of(&self, node: NodeId, base: TypeKey) -> bool {
        self.type_of(node)
            .is_some_and(|t| self.registry.is_assignable_from(base, t))
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys()
    }

    // =========================================================================
    // Relations
    // =========================================================================

    pub fn visual_parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.visual_parent)
    }

    pub fn visual_children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|n| n.visual_children.as_slice())
            .unwrap_or(&[])
    }

    pub fn logical_parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.logical_parent)
    }

    pub fn logical_children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|n| n.logical_children.as_slice())
            .unwrap_or(&[])
    }

    pub fn inheritance_context(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.inheritance_context)
    }

    /// Nodes using `node` as their inheritance context
    pub fn context_children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|n| n.context_children.as_slice())
            .unwrap_or(&[])
    }

    /// Owners `node` is registered on as a popup
    pub fn popup_owners(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|n| n.popup_owners.as_slice())
            .unwrap_or(&[])
    }

    pub fn popups(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|n| n.popups.as_slice())
            .unwrap_or(&[])
    }

    /// Parent used for loaded-ness: visual, then logical, then inheritance context
    pub fn effective_parent(&self, node: NodeId) -> Option<NodeId> {
        let n = self.nodes.get(node)?;
        n.visual_parent
            .or(n.logical_parent)
            .or(n.inheritance_context)
    }

    /// Parent used for property inheritance and resource lookup: logical,
    /// then visual, then inheritance context
    pub fn inheritance_parent(&self, node: NodeId) -> Option<NodeId> {
        let n = self.nodes.get(node)?;
        n.logical_parent
            .or(n.visual_parent)
            .or(n.inheritance_context)
    }

    /// Every distinct parent across the three relations
    pub fn parents(&self, node: NodeId) -> SmallVec<[NodeId; 3]> {
        let mut out = SmallVec::new();
        if let Some(n) = self.nodes.get(node) {
            for parent in [n.visual_parent, n.logical_parent, n.inheritance_context]
                .into_iter()
                .flatten()
            {
                if !out.contains(&parent) {
                    out.push(parent);
                }
            }
        }
        out
    }

    /// Every distinct child across visual, logical, popup and
    /// inheritance-context relations
    pub fn all_children(&self, node: NodeId) -> SmallVec<[NodeId; 8]> {
        let mut out: SmallVec<[NodeId; 8]> = SmallVec::new();
        if let Some(n) = self.nodes.get(node) {
            for child in n
                .visual_children
                .iter()
                .chain(n.logical_children.iter())
                .chain(n.popups.iter())
                .chain(n.context_children.iter())
            {
                if !out.contains(child) {
                    out.push(*child);
                }
            }
        }
        out
    }

    pub fn add_visual_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_pair(parent, child)?;
        if !self.kind_of(parent)?.has_visual_tree() || !self.kind_of(child)?.has_visual_tree() {
            return Err(CoreError::InvalidTreeOperation(
                "content elements have no visual tree".into(),
            ));
        }
        if self.visual_parent(child).is_some() {
            return Err(CoreError::InvalidTreeOperation(
                "child already has a visual parent".into(),
            ));
        }
        if self.is_visual_ancestor(child, parent) {
            return Err(CoreError::InvalidTreeOperation(
                "visual child would become its own ancestor".into(),
            ));
        }
        self.node_mut(child)?.visual_parent = Some(parent);
        self.node_mut(parent)?.visual_children.push(child);
        Ok(())
    }

    pub fn remove_visual_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.visual_parent(child) != Some(parent) {
            return Err(CoreError::InvalidTreeOperation(
                "node is not a visual child of the parent".into(),
            ));
        }
        self.node_mut(parent)?.visual_children.retain(|c| *c != child);
        self.node_mut(child)?.visual_parent = None;
        Ok(())
    }

    pub fn add_logical_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check_pair(parent, child)?;
        if self.kind_of(parent)? == NodeKind::Visual3D || self.kind_of(child)? == NodeKind::Visual3D
        {
            return Err(CoreError::InvalidTreeOperation(
                "3D visuals have no logical tree".into(),
            ));
        }
        if self.logical_parent(child).is_some() {
            return Err(CoreError::InvalidTreeOperation(
                "child already has a logical parent".into(),
            ));
        }
        if self.is_logical_ancestor(child, parent) {
            return Err(CoreError::InvalidTreeOperation(
                "logical child would become its own ancestor".into(),
            ));
        }
        self.node_mut(child)?.logical_parent = Some(parent);
        self.node_mut(parent)?.logical_children.push(child);
        Ok(())
    }

    pub fn remove_logical_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.logical_parent(child) != Some(parent) {
            return Err(CoreError::InvalidTreeOperation(
                "node is not a logical child of the parent".into(),
            ));
        }
        self.node_mut(parent)?.logical_children.retain(|c| *c != child);
        self.node_mut(child)?.logical_parent = None;
        Ok(())
    }

    pub fn set_inheritance_context(&mut self, node: NodeId, context: Option<NodeId>) -> Result<()> {
        if let Some(ctx) = context {
            self.check_pair(ctx, node)?;
        }
        let old = std::mem::replace(&mut self.node_mut(node)?.inheritance_context, context);
        if old == context {
            return Ok(());
        }
        if let Some(prev) = old.and_then(|o| self.nodes.get_mut(o)) {
            prev.context_children.retain(|c| *c != node);
        }
        if let Some(ctx) = context {
            self.node_mut(ctx)?.context_children.push(node);
        }
        Ok(())
    }

    /// Register a popup on its owner; walks treat it as a logical child
    pub fn add_popup(&mut self, owner: NodeId, popup: NodeId) -> Result<()> {
        self.check_pair(owner, popup)?;
        let node = self.node_mut(owner)?;
        if node.popups.contains(&popup) {
            return Ok(());
        }
        node.popups.push(popup);
        self.node_mut(popup)?.popup_owners.push(owner);
        Ok(())
    }

    pub fn remove_popup(&mut self, owner: NodeId, popup: NodeId) -> Result<()> {
        self.node_mut(owner)?.popups.retain(|p| *p != popup);
        if let Some(p) = self.nodes.get_mut(popup) {
            p.popup_owners.retain(|o| *o != owner);
        }
        Ok(())
    }

    pub fn inheritance_behavior(&self, node: NodeId) -> InheritanceBehavior {
        self.nodes
            .get(node)
            .map(|n| n.inheritance_behavior)
            .unwrap_or_default()
    }

    pub fn set_inheritance_behavior(
        &mut self,
        node: NodeId,
        behavior: InheritanceBehavior,
    ) -> Result<()> {
        self.node_mut(node)?.inheritance_behavior = behavior;
        Ok(())
    }

    // =========================================================================
    // Presentation sources
    // =========================================================================

    /// Mark `node` as hosted (or no longer hosted) by a presentation source
    pub fn set_presentation_root(&mut self, node: NodeId, hosted: bool) -> Result<()> {
        if !self.contains(node) {
            return Err(CoreError::NodeNotFound(node));
        }
        if hosted {
            self.presentation_roots.insert(node);
        } else {
            self.presentation_roots.remove(&node);
        }
        Ok(())
    }

    pub fn is_presentation_root(&self, node: NodeId) -> bool {
        self.presentation_roots.contains(&node)
    }

    pub fn presentation_roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.presentation_roots.iter().copied()
    }

    /// Whether the effective-parent chain reaches a presentation root
    pub fn is_connected_to_presentation_source(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        let mut steps = 0;
        while let Some(n) = current {
            if self.presentation_roots.contains(&n) {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.effective_parent(n);
        }
        false
    }

    // =========================================================================
    // Property access
    // =========================================================================

    pub fn get_value(&self, node: NodeId, property: PropertyId) -> Value {
        match self.nodes.get(node) {
            Some(n) => n.values.get(&self.registry, property),
            None => self.registry.default_value(property),
        }
    }

    pub fn base_value(&self, node: NodeId, property: PropertyId) -> Value {
        match self.nodes.get(node) {
            Some(n) => n.values.base_value(&self.registry, property),
            None => self.registry.default_value(property),
        }
    }

    pub fn value_source(&self, node: NodeId, property: PropertyId) -> BaseValueSource {
        self.nodes
            .get(node)
            .map(|n| n.values.base_value_source(property))
            .unwrap_or(BaseValueSource::Default)
    }

    pub fn value_from(
        &self,
        node: NodeId,
        property: PropertyId,
        source: BaseValueSource,
    ) -> Option<Value> {
        self.nodes
            .get(node)
            .and_then(|n| n.values.value_from(property, source).cloned())
    }

    pub fn local_value(&self, node: NodeId, property: PropertyId) -> Option<Value> {
        self.value_from(node, property, BaseValueSource::Local)
    }

    pub fn has_local_value(&self, node: NodeId, property: PropertyId) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|n| n.values.has_local(property))
    }

    /// Set a local value
    pub fn set_value(
        &mut self,
        node: NodeId,
        property: PropertyId,
        value: impl Into<Value>,
    ) -> Result<Option<PropertyChange>> {
        self.set_value_from(node, property, BaseValueSource::Local, value.into())
    }

    pub fn clear_value(&mut self, node: NodeId, property: PropertyId) -> Result<Option<PropertyChange>> {
        self.clear_value_from(node, property, BaseValueSource::Local)
    }

    pub fn set_value_from(
        &mut self,
        node: NodeId,
        property: PropertyId,
        source: BaseValueSource,
        value: Value,
    ) -> Result<Option<PropertyChange>> {
        let registry = self.registry.clone();
        let n = self
            .nodes
            .get_mut(node)
            .ok_or(CoreError::NodeNotFound(node))?;
        n.values.set(&registry, property, source, value)
    }

    pub fn clear_value_from(
        &mut self,
        node: NodeId,
        property: PropertyId,
        source: BaseValueSource,
    ) -> Result<Option<PropertyChange>> {
        let registry = self.registry.clone();
        let n = self
            .nodes
            .get_mut(node)
            .ok_or(CoreError::NodeNotFound(node))?;
        Ok(n.values.clear(&registry, property, source))
    }

    pub fn set_animated_value(
        &mut self,
        node: NodeId,
        property: PropertyId,
        value: Value,
    ) -> Result<Option<PropertyChange>> {
        let registry = self.registry.clone();
        let n = self
            .nodes
            .get_mut(node)
            .ok_or(CoreError::NodeNotFound(node))?;
        n.values.set_animated(&registry, property, value)
    }

    pub fn clear_animated_value(
        &mut self,
        node: NodeId,
        property: PropertyId,
    ) -> Result<Option<PropertyChange>> {
        let registry = self.registry.clone();
        let n = self
            .nodes
            .get_mut(node)
            .ok_or(CoreError::NodeNotFound(node))?;
        Ok(n.values.clear_animated(&registry, property))
    }

    pub fn store(&self, node: NodeId) -> Option<&PropertyStore> {
        self.nodes.get(node).map(|n| &n.values)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn node_mut(&mut self, node: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(node)
            .ok_or(CoreError::NodeNotFound(node))
    }

    fn kind_of(&self, node: NodeId) -> Result<NodeKind> {
        self.kind(node).ok_or(CoreError::NodeNotFound(node))
    }

    fn check_pair(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.contains(parent) {
            return Err(CoreError::NodeNotFound(parent));
        }
        if !self.contains(child) {
            return Err(CoreError::NodeNotFound(child));
        }
        if parent == child {
            return Err(CoreError::InvalidTreeOperation(
                "a node cannot be its own parent".into(),
            ));
        }
        Ok(())
    }

    fn is_visual_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.visual_parent(n);
        }
        false
    }

    fn is_logical_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.logical_parent(n);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ElementTree {
        ElementTree::new(Arc::new(PropertyRegistry::new()))
    }

    #[test]
    fn test_create_rejects_non_element_types() {
        let mut tree = tree();
        let freezable = tree.registry().well_known().freezable;
        assert!(matches!(
            tree.create(freezable),
            Err(CoreError::NotAnElementType(_))
        ));
    }

    #[test]
    fn test_divergent_parents() {
        let mut tree = tree();
        let fe = tree.registry().well_known().framework_element;
        let popup_owner = tree.create(fe).unwrap();
        let popup_root = tree.create(fe).unwrap();
        let child = tree.create(fe).unwrap();

        tree.add_logical_child(popup_owner, child).unwrap();
        tree.add_visual_child(popup_root, child).unwrap();

        assert_eq!(tree.effective_parent(child), Some(popup_root));
        assert_eq!(tree.inheritance_parent(child), Some(popup_owner));
        assert_eq!(tree.parents(child).len(), 2);
    }

    #[test]
    fn test_content_elements_have_no_visual_tree() {
        let mut tree = tree();
        let wk = *tree.registry().well_known();
        let grid = tree.create(wk.grid).unwrap();
        let row = tree.create(wk.row_definition).unwrap();
        assert!(tree.add_visual_child(grid, row).is_err());
        assert!(tree.add_logical_child(grid, row).is_ok());
    }

    #[test]
    fn test_ancestor_cycle_rejected_per_relation() {
        let mut tree = tree();
        let fe = tree.registry().well_known().framework_element;
        let a = tree.create(fe).unwrap();
        let b = tree.create(fe).unwrap();
        tree.add_visual_child(a, b).unwrap();
        assert!(tree.add_visual_child(b, a).is_err());
        // Cross-relation loops are representable; the walker guards them
        assert!(tree.add_logical_child(b, a).is_ok());
    }

    #[test]
    fn test_connection_follows_effective_parent() {
        let mut tree = tree();
        let fe = tree.registry().well_known().framework_element;
        let root = tree.create(fe).unwrap();
        let child = tree.create(fe).unwrap();
        tree.add_visual_child(root, child).unwrap();

        assert!(!tree.is_connected_to_presentation_source(child));
        tree.set_presentation_root(root, true).unwrap();
        assert!(tree.is_connected_to_presentation_source(child));

        tree.remove_visual_child(root, child).unwrap();
        assert!(!tree.is_connected_to_presentation_source(child));
    }

    #[test]
    fn test_destroy_clears_relations() {
        let mut tree = tree();
        let fe = tree.registry().well_known().framework_element;
        let parent = tree.create(fe).unwrap();
        let child = tree.create(fe).unwrap();
        let grandchild = tree.create(fe).unwrap();
        tree.add_visual_child(parent, child).unwrap();
        tree.add_visual_child(child, grandchild).unwrap();

        tree.destroy(child).unwrap();
        assert!(tree.visual_children(parent).is_empty());
        assert_eq!(tree.visual_parent(grandchild), None);
        assert!(tree.destroy(child).is_err());
    }

    #[test]
    fn test_context_children_follow_context_changes() {
        let mut tree = tree();
        let fe = tree.registry().well_known().framework_element;
        let first = tree.create(fe).unwrap();
        let second = tree.create(fe).unwrap();
        let mentee = tree.create(fe).unwrap();

        tree.set_inheritance_context(mentee, Some(first)).unwrap();
        assert_eq!(tree.context_children(first), &[mentee]);
        assert_eq!(tree.all_children(first).as_slice(), &[mentee]);

        tree.set_inheritance_context(mentee, Some(second)).unwrap();
        assert!(tree.context_children(first).is_empty());
        assert_eq!(tree.context_children(second), &[mentee]);

        tree.destroy(second).unwrap();
        assert_eq!(tree.inheritance_context(mentee), None);

        tree.set_inheritance_context(mentee, Some(first)).unwrap();
        tree.destroy(mentee).unwrap();
        assert!(tree.context_children(first).is_empty());
    }

    #[test]
    fn test_popup_owners_follow_popup_changes() {
        let mut tree = tree();
        let fe = tree.registry().well_known().framework_element;
        let owner = tree.create(fe).unwrap();
        let other = tree.create(fe).unwrap();
        let popup = tree.create(fe).unwrap();

        tree.add_popup(owner, popup).unwrap();
        tree.add_popup(owner, popup).unwrap();
        tree.add_popup(other, popup).unwrap();
        assert_eq!(tree.popup_owners(popup), &[owner, other]);

        tree.remove_popup(owner, popup).unwrap();
        assert_eq!(tree.popup_owners(popup), &[other]);

        tree.destroy(popup).unwrap();
        assert!(tree.popups(other).is_empty());

        let popup = tree.create(fe).unwrap();
        tree.add_popup(owner, popup).unwrap();
        tree.destroy(owner).unwrap();
        assert!(tree.popup_owners(popup).is_empty());
    }

    #[test]
    fn test_edge_allows() {
        use InheritanceBehavior::*;
        assert!(InheritanceBehavior::edge_allows(Default, Default));
        assert!(!InheritanceBehavior::edge_allows(SkipToAppNow, Default));
        assert!(!InheritanceBehavior::edge_allows(Default, SkipAllNext));
        assert!(InheritanceBehavior::edge_allows(SkipAllNext, Default));
    }
}
