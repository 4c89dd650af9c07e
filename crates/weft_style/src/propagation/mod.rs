//! Tree change propagation
//!
//! Attaching, detaching and resource changes all end in a walk over the
//! affected subtree. The walk follows visual children, popups and logical
//! children through [`DescendentsWalker`], then picks up nodes whose only
//! link into the subtree is an inheritance context.

mod loaded;
mod resources_changed;
mod tree_change;

use rustc_hash::FxHashSet;
use weft_core::{DescendentsWalker, NodeId, TreeWalkPriority};

use crate::error::{Result, StyleError};
use crate::framework::Framework;

/// Per-node callback of [`Framework::walk_subtree`]. Returning `false`
/// skips the node's children.
pub(crate) type SubtreeVisit<'a> = dyn FnMut(&mut Framework, NodeId) -> Result<bool> + 'a;

impl Framework {
    /// Visit `root` and its descendants once each, stopping at the first
    /// error
    pub(crate) fn walk_subtree(&mut self, root: NodeId, visit: &mut SubtreeVisit<'_>) -> Result<()> {
        let limit = self.config.max_tree_depth;
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut descended: Vec<NodeId> = Vec::new();
        let mut queue = vec![root];

        while let Some(start) = queue.pop() {
            let mut failure: Option<StyleError> = None;
            let mut visitor = |fw: &mut Framework, node: NodeId, _via_visual: bool| -> bool {
                if failure.is_some() || !visited.insert(node) {
                    return false;
                }
                match visit(fw, node) {
                    Ok(true) => {
                        descended.push(node);
                        true
                    }
                    Ok(false) => false,
                    Err(error) => {
                        failure = Some(error);
                        false
                    }
                }
            };
            DescendentsWalker::new(TreeWalkPriority::VisualTree)
                .with_recursion_limit(limit)
                .start_walk(self, start, &mut visitor)?;
            if let Some(error) = failure {
                return Err(error);
            }
            if queue.is_empty() {
                queue = self.context_only_children(&visited, descended.drain(..));
            }
        }
        Ok(())
    }

    /// Unvisited nodes attached only through the inheritance context of a
    /// node the walk descended into
    fn context_only_children(
        &self,
        visited: &FxHashSet<NodeId>,
        descended: impl Iterator<Item = NodeId>,
    ) -> Vec<NodeId> {
        let mut out = Vec::new();
        for ctx in descended {
            for node in self.tree.context_children(ctx) {
                if !visited.contains(node)
                    && self.tree.visual_parent(*node).is_none()
                    && self.tree.logical_parent(*node).is_none()
                    && !out.contains(node)
                {
                    out.push(*node);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::Fixture;

    #[test]
    fn test_walk_reaches_context_only_children() {
        let mut f = Fixture::new();
        let root = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.panel).unwrap();
        let mentor = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(root, child).unwrap();
        f.fw.set_inheritance_context(mentor, Some(child)).unwrap();

        let mut seen = Vec::new();
        f.fw.walk_subtree(root, &mut |_, node| {
            seen.push(node);
            Ok(true)
        })
        .unwrap();
        assert_eq!(seen, vec![root, child, mentor]);
    }

    #[test]
    fn test_walk_follows_context_chains_and_cleared_contexts() {
        let mut f = Fixture::new();
        let root = f.fw.create(f.wk.panel).unwrap();
        let mentor = f.fw.create(f.wk.framework_element).unwrap();
        let nested = f.fw.create(f.wk.framework_element).unwrap();
        let former = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.set_inheritance_context(mentor, Some(root)).unwrap();
        f.fw.set_inheritance_context(nested, Some(mentor)).unwrap();
        f.fw.set_inheritance_context(former, Some(root)).unwrap();
        f.fw.set_inheritance_context(former, None).unwrap();

        let mut seen = Vec::new();
        f.fw.walk_subtree(root, &mut |_, node| {
            seen.push(node);
            Ok(true)
        })
        .unwrap();
        assert_eq!(seen, vec![root, mentor, nested]);
    }

    #[test]
    fn test_pruned_node_hides_its_context_children() {
        let mut f = Fixture::new();
        let root = f.fw.create(f.wk.panel).unwrap();
        let mentor = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.set_inheritance_context(mentor, Some(root)).unwrap();

        let mut seen = Vec::new();
        f.fw.walk_subtree(root, &mut |_, node| {
            seen.push(node);
            Ok(false)
        })
        .unwrap();
        assert_eq!(seen, vec![root]);
    }
}
