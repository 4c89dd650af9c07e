//! Loaded and Unloaded
//!
//! A node is loaded while it is connected to a presentation root. Only
//! nodes flagged `SUBTREE_HAS_LOADED_CHANGE_HANDLER` (they, or something
//! below them, listen for Loaded/Unloaded) cache that state; the flag is kept
//! up to date by walking upward whenever a listener comes or goes, so a
//! broadcast can prune every unflagged subtree.
//!
//! When a flagged node's parent chain changes, the change is queued on the
//! dispatcher at `Loaded` priority. At most one Loaded and one Unloaded
//! operation is outstanding per node; any newer attach or detach aborts
//! them before deciding again. The queued operation re-checks the node
//! before it broadcasts.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use weft_core::{DispatcherPriority, LoadedDispatch, NodeId};

use crate::compiler::CompiledTables;
use crate::error::Result;
use crate::events::RoutedEvent;
use crate::framework::{Framework, NodeFlags, PendingBroadcast};

impl Framework {
    /// Whether `node` is connected to a presentation root, as last broadcast
    pub fn is_loaded(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        let mut steps = 0;
        while let Some(n) = current {
            let flags = self.flags(n);
            if flags.contains(NodeFlags::SUBTREE_HAS_LOADED_CHANGE_HANDLER) {
                return flags.contains(NodeFlags::IS_LOADED);
            }
            if self.is_loaded_pending(n) {
                return false;
            }
            if self.is_unloaded_pending(n) {
                return true;
            }
            if self.tree.is_presentation_root(n) {
                return true;
            }
            steps += 1;
            if steps > self.config.max_tree_depth {
                return false;
            }
            current = self.tree.effective_parent(n);
        }
        false
    }

    /// Loaded state `node` should have given its current parent
    fn loaded_target(&self, node: NodeId) -> bool {
        self.tree.is_presentation_root(node)
            || self
                .tree
                .effective_parent(node)
                .is_some_and(|parent| self.is_loaded(parent))
    }

    // =========================================================================
    // Listener flag
    // =========================================================================

    /// Flag `node` and its ancestors as having a Loaded/Unloaded listener
    ///
    /// Newly flagged nodes start with the loaded state they already had;
    /// adding a listener never raises an event by itself.
    pub(crate) fn add_loaded_change_handler(&mut self, node: NodeId) {
        let mut flag: SmallVec<[(NodeId, bool); 8]> = SmallVec::new();
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if !seen.insert(n)
                || !self.nodes.contains_key(n)
                || self.subtree_has_loaded_change_handler(n)
            {
                continue;
            }
            flag.push((n, self.is_loaded(n)));
            stack.extend(self.tree.parents(n));
        }
        for (n, loaded) in flag {
            if let Some(state) = self.nodes.get_mut(n) {
                state.flags.insert(NodeFlags::SUBTREE_HAS_LOADED_CHANGE_HANDLER);
                state.flags.set(NodeFlags::IS_LOADED, loaded);
            }
        }
    }

    /// Clear the flag on `node` and its ancestors where nothing else
    /// justifies it
    pub(crate) fn remove_loaded_change_handler(&mut self, node: NodeId) {
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if !seen.insert(n) || !self.subtree_has_loaded_change_handler(n) {
                continue;
            }
            if self.has_own_lifecycle_handlers(n)
                || self
                    .tree
                    .all_children(n)
                    .iter()
                    .any(|c| self.subtree_has_loaded_change_handler(*c))
            {
                continue;
            }
            let Some(state) = self.nodes.get_mut(n) else {
                continue;
            };
            state.flags = NodeFlags::empty();
            let pending = [state.loaded_pending.take(), state.unloaded_pending.take()];
            for pending in pending.into_iter().flatten() {
                self.dispatcher.abort(pending.operation);
            }
            stack.extend(self.tree.parents(n));
        }
    }

    /// Whether Loaded or Unloaded would reach a handler or trigger on
    /// `node` itself
    pub(crate) fn has_own_lifecycle_handlers(&self, node: NodeId) -> bool {
        let Some(state) = self.state(node) else {
            return false;
        };
        if state.handlers.iter().any(|h| h.event.is_lifecycle()) {
            return true;
        }
        if [&state.style, &state.theme_style]
            .into_iter()
            .flatten()
            .any(|instance| instance.tables.has_loaded_handlers())
        {
            return true;
        }
        if state
            .template
            .as_ref()
            .is_some_and(|t| lifecycle_trigger_at(t.sealed.tables(), 0))
        {
            return true;
        }
        match (state.templated_parent, state.template_child_index) {
            (Some(parent), Some(slot)) if slot > 0 => self
                .state(parent)
                .and_then(|s| s.template.as_ref())
                .is_some_and(|t| lifecycle_trigger_at(t.sealed.tables(), slot)),
            _ => false,
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Bring the cached loaded state of `node` in line with its parent,
    /// queueing (or, when configured, running) the broadcast
    pub(crate) fn sync_loaded_state(&mut self, node: NodeId) -> Result<()> {
        if !self.subtree_has_loaded_change_handler(node) {
            return Ok(());
        }
        let target = self.loaded_target(node);
        let cached = self.flags(node).contains(NodeFlags::IS_LOADED);

        let state = self.state_mut(node)?;
        let stale = [state.loaded_pending.take(), state.unloaded_pending.take()];
        for pending in stale.into_iter().flatten() {
            self.dispatcher.abort(pending.operation);
            tracing::trace!(?node, "aborted stale loaded change");
        }
        if target == cached {
            return Ok(());
        }

        if self.config.compatibility.loaded_dispatch == LoadedDispatch::Synchronous {
            return self.broadcast_loaded_change(node, target);
        }
        let operation = self
            .dispatcher
            .begin_invoke(DispatcherPriority::Loaded, move |fw: &mut Framework| {
                if let Err(error) = fw.run_loaded_change(node, target) {
                    tracing::error!(?node, %error, "loaded change failed");
                }
            });
        let pending = PendingBroadcast {
            operation,
            parent: self.tree.effective_parent(node),
        };
        let state = self.state_mut(node)?;
        if target {
            state.loaded_pending = Some(pending);
        } else {
            state.unloaded_pending = Some(pending);
        }
        Ok(())
    }

    fn run_loaded_change(&mut self, node: NodeId, scheduled: bool) -> Result<()> {
        let Some(state) = self.nodes.get_mut(node) else {
            return Ok(());
        };
        let pending = if scheduled {
            state.loaded_pending.take()
        } else {
            state.unloaded_pending.take()
        };
        let Some(pending) = pending else {
            return Ok(());
        };
        if !self.subtree_has_loaded_change_handler(node) {
            return Ok(());
        }
        let target = self.loaded_target(node);
        if target != scheduled || self.flags(node).contains(NodeFlags::IS_LOADED) == target {
            tracing::trace!(?node, scheduled_parent = ?pending.parent, "loaded change no longer applies");
            return Ok(());
        }
        self.broadcast_loaded_change(node, target)
    }

    pub(crate) fn on_presentation_changed(&mut self, node: NodeId, hosted: bool) -> Result<()> {
        tracing::debug!(?node, hosted, "presentation root changed");
        self.sync_loaded_state(node)
    }

    // =========================================================================
    // Broadcast
    // =========================================================================

    /// Flip the cached state of every flagged node under `root`, then raise
    /// Loaded or Unloaded on those with their own listeners, ancestors first
    pub(crate) fn broadcast_loaded_change(&mut self, root: NodeId, loaded: bool) -> Result<()> {
        let mut route: Vec<NodeId> = Vec::new();
        self.walk_subtree(root, &mut |fw, node| {
            if !fw.subtree_has_loaded_change_handler(node) {
                return Ok(false);
            }
            let state = fw.state_mut(node)?;
            if state.flags.contains(NodeFlags::IS_LOADED) == loaded {
                return Ok(true);
            }
            state.flags.set(NodeFlags::IS_LOADED, loaded);
            let satisfied = if loaded {
                state.loaded_pending.take()
            } else {
                state.unloaded_pending.take()
            };
            if let Some(pending) = satisfied {
                fw.dispatcher.abort(pending.operation);
            }
            if fw.has_own_lifecycle_handlers(node) {
                route.push(node);
            }
            Ok(true)
        })?;

        let event = if loaded {
            RoutedEvent::LOADED
        } else {
            RoutedEvent::UNLOADED
        };
        tracing::debug!(?root, loaded, listeners = route.len(), "broadcasting loaded change");
        for node in route {
            if self.tree.contains(node) {
                self.raise_event(node, event)?;
            }
        }
        Ok(())
    }
}

fn lifecycle_trigger_at(tables: &CompiledTables, slot: usize) -> bool {
    tables
        .triggers
        .iter()
        .any(|t| matches!(t.event, Some((event, s)) if s == slot && event.is_lifecycle()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use weft_core::{FrameworkConfig, LoadedDispatch, NodeId};

    use crate::events::{handler, RoutedEvent};
    use crate::framework::Framework;
    use crate::test_support::Fixture;

    type Log = Arc<Mutex<Vec<(NodeId, &'static str)>>>;

    fn listen(fw: &mut Framework, node: NodeId, log: &Log) {
        let loaded = log.clone();
        fw.add_handler(node, RoutedEvent::LOADED, handler(move |_, args| {
            loaded.lock().push((args.source, "loaded"))
        }))
        .unwrap();
        let unloaded = log.clone();
        fw.add_handler(node, RoutedEvent::UNLOADED, handler(move |_, args| {
            unloaded.lock().push((args.source, "unloaded"))
        }))
        .unwrap();
    }

    fn loaded_root(f: &mut Fixture) -> NodeId {
        let root = f.fw.create(f.wk.panel).unwrap();
        f.fw.set_presentation_root(root, true).unwrap();
        f.fw.run_dispatcher().unwrap();
        root
    }

    #[test]
    fn test_attach_fires_loaded_once_per_listener() {
        let mut f = Fixture::new();
        let log: Log = Arc::default();
        let root = loaded_root(&mut f);

        let panel = f.fw.create(f.wk.panel).unwrap();
        let quiet = f.fw.create(f.wk.framework_element).unwrap();
        let leaf = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, quiet).unwrap();
        f.fw.add_visual_child(panel, leaf).unwrap();
        listen(&mut f.fw, panel, &log);
        listen(&mut f.fw, leaf, &log);
        assert!(f.fw.subtree_has_loaded_change_handler(panel));
        assert!(!f.fw.subtree_has_loaded_change_handler(quiet));

        f.fw.add_visual_child(root, panel).unwrap();
        assert!(f.fw.is_loaded_pending(panel));
        assert!(log.lock().is_empty());

        f.fw.run_dispatcher().unwrap();
        assert_eq!(*log.lock(), vec![(panel, "loaded"), (leaf, "loaded")]);
        assert!(f.fw.is_loaded(leaf));
        assert!(f.fw.is_loaded(quiet));

        log.lock().clear();
        f.fw.remove_visual_child(root, panel).unwrap();
        f.fw.run_dispatcher().unwrap();
        assert_eq!(*log.lock(), vec![(panel, "unloaded"), (leaf, "unloaded")]);
        assert!(!f.fw.is_loaded(leaf));
    }

    #[test]
    fn test_rapid_reattach_fires_nothing() {
        let mut f = Fixture::new();
        let log: Log = Arc::default();
        let root = loaded_root(&mut f);
        let node = f.fw.create(f.wk.framework_element).unwrap();
        listen(&mut f.fw, node, &log);

        f.fw.add_visual_child(root, node).unwrap();
        f.fw.remove_visual_child(root, node).unwrap();
        assert!(!f.fw.is_loaded_pending(node));
        f.fw.run_dispatcher().unwrap();
        assert!(log.lock().is_empty());

        f.fw.add_visual_child(root, node).unwrap();
        f.fw.run_dispatcher().unwrap();
        f.fw.remove_visual_child(root, node).unwrap();
        f.fw.add_visual_child(root, node).unwrap();
        f.fw.run_dispatcher().unwrap();
        assert_eq!(*log.lock(), vec![(node, "loaded")]);
    }

    #[test]
    fn test_detached_parent_loads_nothing() {
        let mut f = Fixture::new();
        let log: Log = Arc::default();
        let parent = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        listen(&mut f.fw, child, &log);
        f.fw.add_visual_child(parent, child).unwrap();
        f.fw.run_dispatcher().unwrap();
        assert!(log.lock().is_empty());
        assert!(!f.fw.is_loaded(child));
    }

    #[test]
    fn test_handler_removal_clears_flag() {
        let mut f = Fixture::new();
        let panel = f.fw.create(f.wk.panel).unwrap();
        let child = f.fw.create(f.wk.framework_element).unwrap();
        f.fw.add_visual_child(panel, child).unwrap();
        let id = f.fw
            .add_handler(child, RoutedEvent::LOADED, handler(|_, _| {}))
            .unwrap();
        assert!(f.fw.subtree_has_loaded_change_handler(panel));

        assert!(f.fw.remove_handler(child, id).unwrap());
        assert!(!f.fw.subtree_has_loaded_change_handler(child));
        assert!(!f.fw.subtree_has_loaded_change_handler(panel));
    }

    #[test]
    fn test_destroy_unloads_subtree() {
        let mut f = Fixture::new();
        let log: Log = Arc::default();
        let root = loaded_root(&mut f);
        let node = f.fw.create(f.wk.framework_element).unwrap();
        listen(&mut f.fw, node, &log);
        f.fw.add_visual_child(root, node).unwrap();
        f.fw.run_dispatcher().unwrap();
        log.lock().clear();

        f.fw.destroy(node).unwrap();
        assert_eq!(*log.lock(), vec![(node, "unloaded")]);
        assert!(!f.fw.subtree_has_loaded_change_handler(root));
    }

    #[test]
    fn test_synchronous_dispatch() {
        let config = FrameworkConfig::from_toml_str("[compatibility]\nloaded_dispatch = \"synchronous\"").unwrap();
        assert_eq!(config.compatibility.loaded_dispatch, LoadedDispatch::Synchronous);
        let mut f = Fixture::with_config(config);
        let log: Log = Arc::default();
        let root = f.fw.create(f.wk.panel).unwrap();
        f.fw.set_presentation_root(root, true).unwrap();
        let node = f.fw.create(f.wk.framework_element).unwrap();
        listen(&mut f.fw, node, &log);

        f.fw.add_visual_child(root, node).unwrap();
        assert_eq!(*log.lock(), vec![(node, "loaded")]);
        assert!(!f.fw.has_pending_operations());
    }
}
