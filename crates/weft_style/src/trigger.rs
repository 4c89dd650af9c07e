//! Triggers
//!
//! A [`Trigger`] is either a set of [`Condition`]s that must all hold (a
//! property trigger, multi trigger, data trigger or multi data trigger) or a
//! routed event occurrence (an event trigger). While a condition trigger is
//! active its setters override the plain setters of the same style or
//! template; entering and leaving run [`TriggerAction`]s. Event triggers
//! carry actions only.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use weft_animation::Storyboard;
use weft_core::{NodeId, ObjectValue, PropertyId, Value, WellKnown};

use crate::events::RoutedEvent;
use crate::setter::Setter;

/// Where a binding path starts
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingRoot {
    /// A property of the element the trigger applies to
    Own(PropertyId),
    /// A property of the element's templated parent
    TemplatedParent(PropertyId),
}

/// A property path evaluated against the element tree
///
/// The root property's value is followed through [`ObjectValue`] properties
/// named by `path`. A missing step yields [`Value::Unset`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Binding {
    pub root: BindingRoot,
    pub path: SmallVec<[Arc<str>; 2]>,
}

impl Binding {
    pub fn own(property: PropertyId) -> Self {
        Self {
            root: BindingRoot::Own(property),
            path: SmallVec::new(),
        }
    }

    pub fn templated_parent(property: PropertyId) -> Self {
        Self {
            root: BindingRoot::TemplatedParent(property),
            path: SmallVec::new(),
        }
    }

    /// Path into the inherited `DataContext` object, e.g. `"Order.Status"`
    pub fn data_context(wk: &WellKnown, path: &str) -> Self {
        Self {
            root: BindingRoot::Own(wk.data_context),
            path: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(Arc::from)
                .collect(),
        }
    }

    /// Follow `path` starting from `root`
    pub fn follow(&self, root: &Value) -> Value {
        let mut current = root.clone();
        for step in &self.path {
            let next = current
                .downcast_ref::<ObjectValue>()
                .and_then(|obj| obj.property(step))
                .cloned();
            match next {
                Some(value) => current = value,
                None => return Value::Unset,
            }
        }
        current
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConditionSource {
    Property {
        property: PropertyId,
        /// Template child the property is read from; the templated element
        /// when `None`
        source_name: Option<Arc<str>>,
    },
    Binding(Binding),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub source: ConditionSource,
    pub value: Value,
}

impl Condition {
    pub fn property(property: PropertyId, value: impl Into<Value>) -> Self {
        Self {
            source: ConditionSource::Property {
                property,
                source_name: None,
            },
            value: value.into(),
        }
    }

    pub fn binding(binding: Binding, value: impl Into<Value>) -> Self {
        Self {
            source: ConditionSource::Binding(binding),
            value: value.into(),
        }
    }

    pub fn with_source_name(mut self, name: &str) -> Self {
        if let ConditionSource::Property { source_name, .. } = &mut self.source {
            *source_name = Some(Arc::from(name));
        }
        self
    }
}

#[derive(Clone, Debug)]
pub enum TriggerAction {
    /// Start a storyboard; a named one replaces an earlier one of the same name
    BeginStoryboard {
        name: Option<Arc<str>>,
        storyboard: Arc<Storyboard>,
    },
    StopStoryboard {
        name: Arc<str>,
    },
}

impl TriggerAction {
    pub fn begin(storyboard: Storyboard) -> Self {
        TriggerAction::BeginStoryboard {
            name: None,
            storyboard: Arc::new(storyboard),
        }
    }

    pub fn begin_named(name: &str, storyboard: Storyboard) -> Self {
        TriggerAction::BeginStoryboard {
            name: Some(Arc::from(name)),
            storyboard: Arc::new(storyboard),
        }
    }

    pub fn stop(name: &str) -> Self {
        TriggerAction::StopStoryboard {
            name: Arc::from(name),
        }
    }
}

#[derive(Clone, Debug)]
pub enum TriggerKind {
    /// All conditions must hold
    Conditions(SmallVec<[Condition; 1]>),
    Event {
        event: RoutedEvent,
        source_name: Option<Arc<str>>,
    },
}

#[derive(Clone, Debug)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub setters: Vec<Setter>,
    /// Run on activation; for event triggers, run on every occurrence
    pub enter_actions: Vec<TriggerAction>,
    pub exit_actions: Vec<TriggerAction>,
}

impl Trigger {
    fn with_kind(kind: TriggerKind) -> Self {
        Self {
            kind,
            setters: Vec::new(),
            enter_actions: Vec::new(),
            exit_actions: Vec::new(),
        }
    }

    /// Active while `property` equals `value`
    pub fn property(property: PropertyId, value: impl Into<Value>) -> Self {
        Self::with_kind(TriggerKind::Conditions(smallvec![Condition::property(
            property, value
        )]))
    }

    /// Active while every condition holds
    pub fn multi(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self::with_kind(TriggerKind::Conditions(conditions.into_iter().collect()))
    }

    /// Active while the binding evaluates to `value`
    pub fn data(binding: Binding, value: impl Into<Value>) -> Self {
        Self::with_kind(TriggerKind::Conditions(smallvec![Condition::binding(
            binding, value
        )]))
    }

    pub fn event(event: RoutedEvent) -> Self {
        Self::with_kind(TriggerKind::Event {
            event,
            source_name: None,
        })
    }

    /// Read the condition (or listen for the event) on a named template child
    pub fn with_source_name(mut self, name: &str) -> Self {
        match &mut self.kind {
            TriggerKind::Conditions(conditions) => {
                for condition in conditions.iter_mut() {
                    if let ConditionSource::Property { source_name, .. } = &mut condition.source {
                        *source_name = Some(Arc::from(name));
                    }
                }
            }
            TriggerKind::Event { source_name, .. } => *source_name = Some(Arc::from(name)),
        }
        self
    }

    pub fn with_setter(mut self, setter: Setter) -> Self {
        self.setters.push(setter);
        self
    }

    pub fn with_enter_action(mut self, action: TriggerAction) -> Self {
        self.enter_actions.push(action);
        self
    }

    pub fn with_exit_action(mut self, action: TriggerAction) -> Self {
        self.exit_actions.push(action);
        self
    }

    /// Action run when an event trigger fires
    pub fn with_action(self, action: TriggerAction) -> Self {
        self.with_enter_action(action)
    }

    pub fn is_event_trigger(&self) -> bool {
        matches!(self.kind, TriggerKind::Event { .. })
    }

    /// Names of template children this trigger reads from or writes to
    pub(crate) fn referenced_names(&self) -> impl Iterator<Item = &str> {
        let sources: SmallVec<[&str; 2]> = match &self.kind {
            TriggerKind::Conditions(conditions) => conditions
                .iter()
                .filter_map(|c| match &c.source {
                    ConditionSource::Property {
                        source_name: Some(name),
                        ..
                    } => Some(&**name),
                    _ => None,
                })
                .collect(),
            TriggerKind::Event {
                source_name: Some(name),
                ..
            } => smallvec![&**name],
            TriggerKind::Event { .. } => SmallVec::new(),
        };
        sources
            .into_iter()
            .chain(self.setters.iter().filter_map(|s| s.target_name.as_deref()))
    }
}

/// Per-node evaluation hook so condition evaluation can be tested without a
/// full framework
pub(crate) trait ConditionContext {
    fn value_of(&self, node: NodeId, property: PropertyId) -> Value;
    fn templated_parent_of(&self, node: NodeId) -> Option<NodeId>;
}

impl Binding {
    pub(crate) fn evaluate<C: ConditionContext + ?Sized>(&self, ctx: &C, node: NodeId) -> Value {
        let root = match &self.root {
            BindingRoot::Own(property) => ctx.value_of(node, *property),
            BindingRoot::TemplatedParent(property) => match ctx.templated_parent_of(node) {
                Some(parent) => ctx.value_of(parent, *property),
                None => Value::Unset,
            },
        };
        self.follow(&root)
    }
}
