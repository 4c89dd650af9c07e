//! Routed events
//!
//! Events are either raised on a single element (direct) or bubble from the
//! source up the effective-parent chain. Handlers come from three places:
//! handlers added directly to an element, event setters of its applied
//! styles, and event triggers of its styles and templates (which run after
//! the handlers of the same element).

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use weft_core::{CoreError, NodeId};

use crate::compiler::TableRole;
use crate::error::Result;
use crate::framework::Framework;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RoutedEvent(u32);

impl RoutedEvent {
    pub const LOADED: RoutedEvent = RoutedEvent(0);
    pub const UNLOADED: RoutedEvent = RoutedEvent(1);
    pub const MOUSE_ENTER: RoutedEvent = RoutedEvent(2);
    pub const MOUSE_LEAVE: RoutedEvent = RoutedEvent(3);
    pub const CLICK: RoutedEvent = RoutedEvent(4);

    pub fn to_raw(self) -> u32 {
        self.0
    }

    pub fn is_lifecycle(self) -> bool {
        self == Self::LOADED || self == Self::UNLOADED
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingStrategy {
    Direct,
    Bubble,
}

#[derive(Debug)]
struct EventInfo {
    name: Arc<str>,
    strategy: RoutingStrategy,
}

/// Registered routed events
#[derive(Debug)]
pub struct EventRegistry {
    events: Vec<EventInfo>,
    names: FxHashMap<Arc<str>, RoutedEvent>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            events: Vec::new(),
            names: FxHashMap::default(),
        };
        for (name, strategy) in [
            ("Loaded", RoutingStrategy::Direct),
            ("Unloaded", RoutingStrategy::Direct),
            ("MouseEnter", RoutingStrategy::Direct),
            ("MouseLeave", RoutingStrategy::Direct),
            ("Click", RoutingStrategy::Bubble),
        ] {
            registry.define(name, strategy);
        }
        registry
    }

    fn define(&mut self, name: &str, strategy: RoutingStrategy) -> RoutedEvent {
        let event = RoutedEvent(self.events.len() as u32);
        let name: Arc<str> = Arc::from(name);
        self.events.push(EventInfo {
            name: name.clone(),
            strategy,
        });
        self.names.insert(name, event);
        event
    }

    pub fn register(&mut self, name: &str, strategy: RoutingStrategy) -> Result<RoutedEvent> {
        if self.names.contains_key(name) {
            return Err(CoreError::DuplicateRegistration(format!("routed event '{name}'")).into());
        }
        Ok(self.define(name, strategy))
    }

    pub fn find(&self, name: &str) -> Option<RoutedEvent> {
        self.names.get(name).copied()
    }

    pub fn name(&self, event: RoutedEvent) -> &str {
        self.events
            .get(event.0 as usize)
            .map(|e| &*e.name)
            .unwrap_or("<unknown>")
    }

    pub fn strategy(&self, event: RoutedEvent) -> RoutingStrategy {
        self.events
            .get(event.0 as usize)
            .map(|e| e.strategy)
            .unwrap_or(RoutingStrategy::Direct)
    }
}

#[derive(Clone, Debug)]
pub struct RoutedEventArgs {
    pub event: RoutedEvent,
    pub source: NodeId,
    /// Element whose handlers are currently running
    pub current: NodeId,
    pub handled: bool,
}

pub type EventHandler = Arc<dyn Fn(&mut Framework, &mut RoutedEventArgs) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`]
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&mut Framework, &mut RoutedEventArgs) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle returned by [`Framework::add_handler`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HandlerOrigin {
    Direct(HandlerId),
    /// Installed by an event setter of the applied style
    Style(TableRole),
}

#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub(crate) event: RoutedEvent,
    pub(crate) handler: EventHandler,
    pub(crate) handled_too: bool,
    pub(crate) origin: HandlerOrigin,
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("event", &self.event)
            .field("handled_too", &self.handled_too)
            .field("origin", &self.origin)
            .finish()
    }
}

impl Framework {
    pub fn add_handler(&mut self, node: NodeId, event: RoutedEvent, handler: EventHandler) -> Result<HandlerId> {
        self.add_handler_entry(node, event, handler, false)
    }

    /// Add a handler that also runs for events already marked handled
    pub fn add_handler_handled_too(
        &mut self,
        node: NodeId,
        event: RoutedEvent,
        handler: EventHandler,
    ) -> Result<HandlerId> {
        self.add_handler_entry(node, event, handler, true)
    }

    fn add_handler_entry(
        &mut self,
        node: NodeId,
        event: RoutedEvent,
        handler: EventHandler,
        handled_too: bool,
    ) -> Result<HandlerId> {
        self.ensure_node(node)?;
        self.next_handler_id += 1;
        let id = HandlerId(self.next_handler_id);
        self.state_mut(node)?.handlers.push(HandlerEntry {
            event,
            handler,
            handled_too,
            origin: HandlerOrigin::Direct(id),
        });
        if event.is_lifecycle() {
            self.add_loaded_change_handler(node);
        }
        Ok(id)
    }

    pub fn remove_handler(&mut self, node: NodeId, id: HandlerId) -> Result<bool> {
        let state = self.state_mut(node)?;
        let Some(index) = state
            .handlers
            .iter()
            .position(|h| h.origin == HandlerOrigin::Direct(id))
        else {
            return Ok(false);
        };
        let removed = state.handlers.remove(index);
        if removed.event.is_lifecycle() {
            self.remove_loaded_change_handler(node);
        }
        Ok(true)
    }

    pub(crate) fn install_event_setters(&mut self, node: NodeId, role: TableRole) -> Result<()> {
        let Some(tables) = self.applied_tables(node, role) else {
            return Ok(());
        };
        let state = self.state_mut(node)?;
        for setter in &tables.event_setters {
            state.handlers.push(HandlerEntry {
                event: setter.event,
                handler: setter.handler.clone(),
                handled_too: setter.handled_events_too,
                origin: HandlerOrigin::Style(role),
            });
        }
        if tables.has_loaded_handlers() {
            self.add_loaded_change_handler(node);
        }
        Ok(())
    }

    pub(crate) fn remove_event_setters(&mut self, node: NodeId, role: TableRole) {
        let Some(state) = self.nodes.get_mut(node) else {
            return;
        };
        state.handlers.retain(|h| h.origin != HandlerOrigin::Style(role));
        self.remove_loaded_change_handler(node);
    }

    /// Raise `event` on `source`. Returns whether a handler marked it handled.
    pub fn raise_event(&mut self, source: NodeId, event: RoutedEvent) -> Result<bool> {
        self.ensure_node(source)?;
        let route: SmallVec<[NodeId; 8]> = match self.events.strategy(event) {
            RoutingStrategy::Direct => SmallVec::from_elem(source, 1),
            RoutingStrategy::Bubble => {
                let mut route = SmallVec::new();
                let mut current = Some(source);
                while let Some(node) = current {
                    if route.len() > self.config.max_tree_depth {
                        return Err(CoreError::TreeLoop {
                            limit: self.config.max_tree_depth,
                        }
                        .into());
                    }
                    route.push(node);
                    current = self.tree.effective_parent(node);
                }
                route
            }
        };

        tracing::trace!(event = self.events.name(event), ?source, "raise routed event");
        let mut args = RoutedEventArgs {
            event,
            source,
            current: source,
            handled: false,
        };
        for node in route {
            if !self.tree.contains(node) {
                continue;
            }
            args.current = node;
            let handlers: SmallVec<[HandlerEntry; 2]> = self
                .nodes
                .get(node)
                .map(|s| s.handlers.iter().filter(|h| h.event == event).cloned().collect())
                .unwrap_or_default();
            for entry in handlers {
                if args.handled && !entry.handled_too {
                    continue;
                }
                (entry.handler)(self, &mut args);
            }
            self.fire_event_triggers(node, event)?;
        }
        Ok(args.handled)
    }
}
