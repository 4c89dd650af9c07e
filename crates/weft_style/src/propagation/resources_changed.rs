//! Resource change invalidation
//!
//! A change in a dictionary owned by a node re-resolves, below that node,
//! every implicit style, local resource reference and dynamic resource value
//! of an applied style or template that the change may affect. Presenters
//! showing data through an implicit data template pick a new template when
//! the lookup now finds a different one.

use smallvec::SmallVec;
use weft_core::{BaseValueSource, NodeId, PropertyId, Value};

use crate::compiler::TableRole;
use crate::error::Result;
use crate::framework::Framework;
use crate::resources::{ResourceChange, ResourceKey};
use crate::template::FrameworkTemplate;

impl Framework {
    pub(crate) fn invalidate_resources(&mut self, owner: NodeId, change: &ResourceChange) -> Result<()> {
        if !self.tree.contains(owner) {
            return Ok(());
        }
        let mut listeners: Vec<NodeId> = Vec::new();
        self.walk_subtree(owner, &mut |fw, node| {
            if change.may_affect_implicit_styles() {
                fw.refresh_implicit_style(node)?;
            }
            fw.refresh_resource_refs(node, Some(change))?;
            for role in TableRole::ALL {
                fw.refresh_resource_dependents(node, role, Some(change))?;
            }
            if change.may_affect_data_templates() {
                fw.refresh_data_template(node)?;
            }
            if fw.state(node).is_some_and(|s| !s.resources_changed.is_empty()) {
                listeners.push(node);
            }
            Ok(true)
        })?;

        for node in listeners {
            let handlers = self
                .state(node)
                .map(|s| s.resources_changed.clone())
                .unwrap_or_default();
            for handler in handlers {
                handler(self, node);
            }
        }
        Ok(())
    }

    /// Re-resolve local resource references on `node`; all of them when
    /// `change` is `None`
    pub(crate) fn refresh_resource_refs(&mut self, node: NodeId, change: Option<&ResourceChange>) -> Result<()> {
        let refs: SmallVec<[(PropertyId, ResourceKey); 2]> = match self.state(node) {
            Some(state) => state
                .resource_refs
                .iter()
                .filter(|(_, key)| change.map_or(true, |c| c.affects(key)))
                .map(|(p, k)| (*p, k.clone()))
                .collect(),
            None => return Ok(()),
        };
        for (property, key) in refs {
            let value = self.find_resource(node, &key)?;
            self.write(node, property, BaseValueSource::Local, value)?;
        }
        Ok(())
    }

    /// Re-resolve dynamic resource values the table applied for `role`
    /// reads
    pub(crate) fn refresh_resource_dependents(
        &mut self,
        node: NodeId,
        role: TableRole,
        change: Option<&ResourceChange>,
    ) -> Result<()> {
        let Some(tables) = self.applied_tables(node, role) else {
            return Ok(());
        };
        let targets: SmallVec<[(usize, PropertyId); 4]> = tables
            .resource_dependents
            .iter()
            .filter(|(key, _)| change.map_or(true, |c| c.affects(key)))
            .flat_map(|(_, targets)| targets.iter().copied())
            .collect();
        for (slot, property) in targets {
            self.refresh_slot_property(node, role, slot, property)?;
        }
        Ok(())
    }

    /// Re-pick the data template of a presenter that relies on lookup
    pub(crate) fn refresh_data_template(&mut self, node: NodeId) -> Result<()> {
        let wk = *self.registry.well_known();
        if !self.tree.is_instance_of(node, wk.content_presenter) {
            return Ok(());
        }
        let explicit = self.tree.get_value(node, wk.presenter_content_template);
        if FrameworkTemplate::from_value(&explicit).is_some() {
            return Ok(());
        }
        let content = self.tree.get_value(node, wk.presenter_content);
        if content.is_unset() || matches!(content, Value::Node(_)) {
            return Ok(());
        }

        let wanted = self.content_template_for(node, &content)?;
        let current = self.applied_template(node);
        let unchanged = match (&wanted, &current) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            tracing::debug!(?node, "data template changed");
            self.update_presenter(node)?;
        }
        Ok(())
    }
}
