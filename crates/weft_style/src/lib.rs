//! Weft Style
//!
//! The styling engine on top of [`weft_core`] and [`weft_animation`].
//!
//! # Features
//!
//! - **Resources**: dictionaries with merged dictionaries, deferred values
//!   and change notification, looked up along the inheritance tree, then in
//!   application resources and the shared theme cache
//! - **Styles**: setters, property, data and event triggers, `BasedOn`
//!   chains, implicit and theme styles
//! - **Templates**: control and data templates expanded into named,
//!   template-bound subtrees
//! - **Propagation**: inherited values, resource references and
//!   Loaded/Unloaded notifications follow every attach and detach
//! - **Visual States**: state groups with generated transitions
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_core::{Color, PropertyRegistry, Value};
//! use weft_style::{Framework, Setter, Style};
//!
//! let registry = Arc::new(PropertyRegistry::new());
//! let wk = *registry.well_known();
//! let mut fw = Framework::new(registry);
//!
//! let style = Style::builder(wk.control)
//!     .setter(Setter::new(wk.background, Color::RED))
//!     .build();
//! let control = fw.create(wk.control).unwrap();
//! fw.set_value(control, wk.style, style).unwrap();
//! assert_eq!(fw.get_value(control, wk.background), Value::Color(Color::RED));
//! ```

pub mod compiler;
pub mod error;
pub mod events;
pub mod framework;
pub mod resources;
pub mod setter;
pub mod style;
pub mod template;
pub mod trigger;
pub mod visual_state;

mod propagation;

#[cfg(test)]
mod test_support;

pub use compiler::CompiledTables;
pub use error::{Result, StyleError};
pub use events::{handler, EventHandler, HandlerId, RoutedEvent, RoutedEventArgs, RoutingStrategy};
pub use framework::{Framework, ResourcesChangedHandler};
pub use resources::{
    DeferredResourceReference, ResourceChange, ResourceDictionary, ResourceKey, ResourceOwner,
    ThemeResourceCache,
};
pub use setter::{EventSetter, Setter, SetterBase, SetterValue};
pub use style::{Style, StyleBuilder};
pub use template::{FrameworkElementFactory, FrameworkTemplate, TemplateBuilder, TemplateKind};
pub use trigger::{Binding, BindingRoot, Condition, ConditionSource, Trigger, TriggerAction, TriggerKind};
pub use visual_state::{
    VisualState, VisualStateChangedArgs, VisualStateChangedHandler, VisualStateGroup,
    VisualTransition,
};
