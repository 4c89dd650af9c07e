//! Descendant walks over the merged logical + visual tree
//!
//! A node can have a visual parent that differs from its logical parent
//! (popup content, generated visuals), and a popup can also sit under its
//! owner's visual subtree. Such a node is reachable along several
//! relations; the walker remembers it on the first visit and silently drops
//! the later encounters, so every reachable node is visited exactly once.
//!
//! Visitors implement [`TreeVisitor`]. A plain closure
//! `FnMut(&mut C, NodeId, bool) -> bool` is a pre-order visitor; the `bool`
//! argument says whether the node was reached through a visual edge, and
//! returning `false` prunes the node's subtree. [`PrePost`] adds a
//! post-order callback that runs once a node's subtree is done (including
//! when the pre callback pruned it).

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::element::{ElementTree, NodeId, NodeKind};
use crate::error::{CoreError, Result};

/// Default maximum nesting depth before a walk reports a tree loop
pub const DEFAULT_RECURSION_LIMIT: usize = 1024;

/// Which relation a walk follows first
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TreeWalkPriority {
    /// Visual children, then popups, then logical-only children
    #[default]
    VisualTree,
    /// Logical children, then visual-only children, then popups
    LogicalTree,
}

/// Anything that can hand the walker the tree it walks
pub trait WalkContext {
    fn element_tree(&self) -> &ElementTree;
}

impl WalkContext for ElementTree {
    fn element_tree(&self) -> &ElementTree {
        self
    }
}

pub trait TreeVisitor<C> {
    /// Called before the node's children. Return `false` to skip them.
    fn visit(&mut self, ctx: &mut C, node: NodeId, via_visual: bool) -> bool;

    /// Called after the node's children
    fn post_visit(&mut self, _ctx: &mut C, _node: NodeId, _via_visual: bool) {}
}

impl<C, F> TreeVisitor<C> for F
where
    F: FnMut(&mut C, NodeId, bool) -> bool,
{
    fn visit(&mut self, ctx: &mut C, node: NodeId, via_visual: bool) -> bool {
        self(ctx, node, via_visual)
    }
}

/// Pre-order plus post-order closures
pub struct PrePost<F, G> {
    pub pre: F,
    pub post: G,
}

impl<F, G> PrePost<F, G> {
    pub fn new(pre: F, post: G) -> Self {
        Self { pre, post }
    }
}

impl<C, F, G> TreeVisitor<C> for PrePost<F, G>
where
    F: FnMut(&mut C, NodeId, bool) -> bool,
    G: FnMut(&mut C, NodeId, bool),
{
    fn visit(&mut self, ctx: &mut C, node: NodeId, via_visual: bool) -> bool {
        (self.pre)(ctx, node, via_visual)
    }

    fn post_visit(&mut self, ctx: &mut C, node: NodeId, via_visual: bool) {
        (self.post)(ctx, node, via_visual)
    }
}

type Children = SmallVec<[NodeId; 8]>;

/// Walker over the descendants of a node
#[derive(Debug)]
pub struct DescendentsWalker {
    priority: TreeWalkPriority,
    recursion_limit: usize,
    depth: usize,
    /// Encounters still expected for nodes with more than one parent
    pending: FxHashMap<NodeId, usize>,
}

impl DescendentsWalker {
    pub fn new(priority: TreeWalkPriority) -> Self {
        Self {
            priority,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            depth: 0,
            pending: FxHashMap::default(),
        }
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn priority(&self) -> TreeWalkPriority {
        self.priority
    }

    /// Walk `start` and its descendants
    pub fn start_walk<C, V>(&mut self, ctx: &mut C, start: NodeId, visitor: &mut V) -> Result<()>
    where
        C: WalkContext,
        V: TreeVisitor<C>,
    {
        self.walk(ctx, start, false, visitor)
    }

    /// Walk only the descendants of `start`
    pub fn start_walk_children<C, V>(
        &mut self,
        ctx: &mut C,
        start: NodeId,
        visitor: &mut V,
    ) -> Result<()>
    where
        C: WalkContext,
        V: TreeVisitor<C>,
    {
        self.walk(ctx, start, true, visitor)
    }

    fn walk<C, V>(&mut self, ctx: &mut C, start: NodeId, skip_start: bool, visitor: &mut V) -> Result<()>
    where
        C: WalkContext,
        V: TreeVisitor<C>,
    {
        self.depth = 0;
        self.pending.clear();
        if !ctx.element_tree().contains(start) {
            return Err(CoreError::NodeNotFound(start));
        }

        let via_visual = self.priority == TreeWalkPriority::VisualTree;
        let continue_walk = skip_start || visitor.visit(ctx, start, via_visual);
        if continue_walk {
            self.iterate_children(ctx, start, visitor)?;
        }
        if !skip_start {
            visitor.post_visit(ctx, start, via_visual);
        }
        Ok(())
    }

    fn visit_node<C, V>(&mut self, ctx: &mut C, node: NodeId, via_visual: bool, visitor: &mut V) -> Result<()>
    where
        C: WalkContext,
        V: TreeVisitor<C>,
    {
        if self.depth > self.recursion_limit {
            return Err(CoreError::TreeLoop {
                limit: self.recursion_limit,
            });
        }

        let tree = ctx.element_tree();
        if !tree.contains(node) {
            return Ok(());
        }

        if let Some(remaining) = self.pending.get_mut(&node) {
            // Already reached through another relation
            *remaining -= 1;
            if *remaining == 0 {
                self.pending.remove(&node);
            }
            return Ok(());
        }
        let parents = parent_count(tree, node);
        if parents > 1 {
            self.pending.insert(node, parents - 1);
        }

        if visitor.visit(ctx, node, via_visual) {
            self.iterate_children(ctx, node, visitor)?;
        }
        visitor.post_visit(ctx, node, via_visual);
        Ok(())
    }

    fn iterate_children<C, V>(&mut self, ctx: &mut C, node: NodeId, visitor: &mut V) -> Result<()>
    where
        C: WalkContext,
        V: TreeVisitor<C>,
    {
        self.depth += 1;
        let order = self.child_order(ctx.element_tree(), node);
        let result = order
            .into_iter()
            .try_for_each(|(child, via_visual)| self.visit_node(ctx, child, via_visual, visitor));
        self.depth -= 1;
        result
    }

    /// Children of `node` in visit order, collected before any is visited
    fn child_order(&self, tree: &ElementTree, node: NodeId) -> SmallVec<[(NodeId, bool); 8]> {
        let mut order = SmallVec::new();
        let Some(kind) = tree.kind(node) else {
            return order;
        };

        let visual: Children = tree.visual_children(node).iter().copied().collect();
        let logical: Children = tree.logical_children(node).iter().copied().collect();
        let popups: Children = tree.popups(node).iter().copied().collect();

        match kind {
            NodeKind::ContentElement => {
                order.extend(logical.into_iter().map(|c| (c, false)));
            }
            NodeKind::Visual3D => {
                order.extend(visual.into_iter().map(|c| (c, true)));
            }
            NodeKind::Element => match self.priority {
                TreeWalkPriority::VisualTree => {
                    order.extend(visual.into_iter().map(|c| (c, true)));
                    order.extend(popups.into_iter().map(|c| (c, false)));
                    order.extend(
                        logical
                            .into_iter()
                            .filter(|c| tree.visual_parent(*c) != Some(node))
                            .map(|c| (c, false)),
                    );
                }
                TreeWalkPriority::LogicalTree => {
                    order.extend(logical.into_iter().map(|c| (c, false)));
                    order.extend(
                        visual
                            .into_iter()
                            .filter(|c| tree.logical_parent(*c) != Some(node))
                            .map(|c| (c, true)),
                    );
                    order.extend(popups.into_iter().map(|c| (c, false)));
                }
            },
        }

        let mut seen: Children = SmallVec::new();
        order.retain(|(child, _)| {
            if seen.contains(child) {
                false
            } else {
                seen.push(*child);
                true
            }
        });
        order
    }
}

/// Distinct nodes `node` can be reached from: its visual parent, its
/// logical parent and every popup owner
fn parent_count(tree: &ElementTree, node: NodeId) -> usize {
    let mut parents: SmallVec<[NodeId; 4]> = SmallVec::new();
    let relations = tree
        .visual_parent(node)
        .into_iter()
        .chain(tree.logical_parent(node))
        .chain(tree.popup_owners(node).iter().copied());
    for parent in relations {
        if !parents.contains(&parent) {
            parents.push(parent);
        }
    }
    parents.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyRegistry;
    use rustc_hash::FxHashMap;
    use std::sync::Arc;

    struct Fixture {
        tree: ElementTree,
        root: NodeId,
        popup: NodeId,
        popup_child: NodeId,
        a: NodeId,
        b: NodeId,
    }

    /// root
    /// ├─ a (visual + logical)
    /// │  └─ b (visual only)
    /// └─ popup (registered on root, no parent of its own)
    ///
    /// popup_child: logical child of `popup`, visual child of `a`
    fn fixture() -> Fixture {
        let mut tree = ElementTree::new(Arc::new(PropertyRegistry::new()));
        let fe = tree.registry().well_known().framework_element;
        let root = tree.create(fe).unwrap();
        let a = tree.create(fe).unwrap();
        let b = tree.create(fe).unwrap();
        let popup = tree.create(fe).unwrap();
        let popup_child = tree.create(fe).unwrap();

        tree.add_visual_child(root, a).unwrap();
        tree.add_logical_child(root, a).unwrap();
        tree.add_visual_child(a, b).unwrap();
        tree.add_popup(root, popup).unwrap();
        tree.add_logical_child(popup, popup_child).unwrap();
        tree.add_visual_child(a, popup_child).unwrap();

        Fixture {
            tree,
            root,
            popup,
            popup_child,
            a,
            b,
        }
    }

    fn visit_counts(f: &mut Fixture, priority: TreeWalkPriority) -> FxHashMap<NodeId, usize> {
        let mut counts: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut visitor = |_: &mut ElementTree, node: NodeId, _: bool| {
            *counts.entry(node).or_default() += 1;
            true
        };
        DescendentsWalker::new(priority)
            .start_walk(&mut f.tree, f.root, &mut visitor)
            .unwrap();
        counts
    }

    #[test]
    fn test_walk_visits_each_node_once() {
        for priority in [TreeWalkPriority::VisualTree, TreeWalkPriority::LogicalTree] {
            let mut f = fixture();
            let counts = visit_counts(&mut f, priority);
            for node in [f.root, f.a, f.b, f.popup, f.popup_child] {
                assert_eq!(counts.get(&node), Some(&1), "{priority:?}");
            }
            assert_eq!(counts.len(), 5);
        }
    }

    #[test]
    fn test_popup_inside_owner_visual_subtree_visited_once() {
        for priority in [TreeWalkPriority::VisualTree, TreeWalkPriority::LogicalTree] {
            let mut f = fixture();
            let fe = f.tree.registry().well_known().framework_element;
            let nested = f.tree.create(fe).unwrap();
            f.tree.add_visual_child(f.b, nested).unwrap();
            f.tree.add_popup(f.root, nested).unwrap();
            f.tree.add_popup(f.a, nested).unwrap();

            let counts = visit_counts(&mut f, priority);
            assert_eq!(counts.get(&nested), Some(&1), "{priority:?}");
            assert_eq!(counts.len(), 6);

            // a second walk with the same walker starts clean
            let mut walker = DescendentsWalker::new(priority);
            for _ in 0..2 {
                let mut seen = Vec::new();
                let mut visitor = |_: &mut ElementTree, node: NodeId, _: bool| {
                    seen.push(node);
                    true
                };
                walker.start_walk(&mut f.tree, f.root, &mut visitor).unwrap();
                assert_eq!(seen.iter().filter(|n| **n == nested).count(), 1);
            }
        }
    }

    #[test]
    fn test_visual_first_order() {
        let mut f = fixture();
        let mut order = Vec::new();
        let mut visitor = |_: &mut ElementTree, node: NodeId, via_visual: bool| {
            order.push((node, via_visual));
            true
        };
        DescendentsWalker::new(TreeWalkPriority::VisualTree)
            .start_walk(&mut f.tree, f.root, &mut visitor)
            .unwrap();
        assert_eq!(
            order,
            vec![
                (f.root, true),
                (f.a, true),
                (f.b, true),
                (f.popup_child, true),
                (f.popup, false),
            ]
        );
    }

    #[test]
    fn test_logical_first_order() {
        let mut f = fixture();
        let mut order = Vec::new();
        let mut visitor = |_: &mut ElementTree, node: NodeId, _: bool| {
            order.push(node);
            true
        };
        DescendentsWalker::new(TreeWalkPriority::LogicalTree)
            .start_walk(&mut f.tree, f.root, &mut visitor)
            .unwrap();
        assert_eq!(order, vec![f.root, f.a, f.b, f.popup_child, f.popup]);
    }

    #[test]
    fn test_pruning_still_runs_post_visit() {
        let mut f = fixture();
        let mut pre = Vec::new();
        let mut post = Vec::new();
        let a = f.a;
        let mut visitor = PrePost::new(
            |_: &mut ElementTree, node: NodeId, _: bool| {
                pre.push(node);
                node != a
            },
            |_: &mut ElementTree, node: NodeId, _: bool| post.push(node),
        );
        DescendentsWalker::new(TreeWalkPriority::VisualTree)
            .start_walk(&mut f.tree, f.root, &mut visitor)
            .unwrap();
        drop(visitor);

        assert!(!pre.contains(&f.b));
        assert!(post.contains(&f.a));
        assert_eq!(post.last(), Some(&f.root));
        assert_eq!(pre.len(), post.len());
    }

    #[test]
    fn test_tree_loop_reported() {
        let mut tree = ElementTree::new(Arc::new(PropertyRegistry::new()));
        let fe = tree.registry().well_known().framework_element;
        let a = tree.create(fe).unwrap();
        let b = tree.create(fe).unwrap();
        // a -visual-> b -logical-> a
        tree.add_visual_child(a, b).unwrap();
        tree.add_logical_child(b, a).unwrap();

        let mut visitor = |_: &mut ElementTree, _: NodeId, _: bool| true;
        let result = DescendentsWalker::new(TreeWalkPriority::VisualTree)
            .with_recursion_limit(32)
            .start_walk(&mut tree, a, &mut visitor);
        assert_eq!(result, Err(CoreError::TreeLoop { limit: 32 }));
    }

    #[test]
    fn test_skip_start_node() {
        let mut f = fixture();
        let mut seen = Vec::new();
        let mut visitor = |_: &mut ElementTree, node: NodeId, _: bool| {
            seen.push(node);
            true
        };
        DescendentsWalker::new(TreeWalkPriority::VisualTree)
            .start_walk_children(&mut f.tree, f.root, &mut visitor)
            .unwrap();
        assert!(!seen.contains(&f.root));
        assert_eq!(seen.len(), 4);
    }
}
