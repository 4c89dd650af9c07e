//! Reacting to attach and detach
//!
//! Whenever a node gains or loses a parent, every node below it re-pulls
//! its inherited values, its implicit style and its resource references,
//! then the node's loaded state is brought in line with its new parent.

use weft_core::NodeId;

use crate::compiler::TableRole;
use crate::error::Result;
use crate::framework::Framework;

impl Framework {
    pub(crate) fn on_attached(&mut self, child: NodeId) -> Result<()> {
        self.invalidate_tree(child)?;
        if self.subtree_has_loaded_change_handler(child) {
            for parent in self.tree.parents(child) {
                self.add_loaded_change_handler(parent);
            }
        }
        self.sync_loaded_state(child)
    }

    pub(crate) fn on_detached(&mut self, child: NodeId, old_parent: NodeId) -> Result<()> {
        self.invalidate_tree(child)?;
        self.sync_loaded_state(child)?;
        self.remove_loaded_change_handler(old_parent);
        Ok(())
    }

    /// Re-resolve everything position-dependent in the subtree at `root`
    pub(crate) fn invalidate_tree(&mut self, root: NodeId) -> Result<()> {
        if !self.tree.contains(root) {
            return Ok(());
        }
        if self.tree.all_children(root).is_empty() {
            return self.invalidate_node(root);
        }
        self.walk_subtree(root, &mut |fw, node| {
            fw.invalidate_node(node)?;
            Ok(true)
        })
    }

    fn invalidate_node(&mut self, node: NodeId) -> Result<()> {
        self.update_all_inherited(node)?;
        self.refresh_implicit_style(node)?;
        self.refresh_resource_refs(node, None)?;
        for role in TableRole::ALL {
            self.refresh_resource_dependents(node, role, None)?;
        }
        self.refresh_data_template(node)
    }
}
