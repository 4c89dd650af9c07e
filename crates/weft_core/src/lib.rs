//! Weft Core
//!
//! Foundation shared by the styling engine:
//!
//! - **Values**: dynamically typed property values with identity-compared objects
//! - **Property Registry**: element types, dependency properties and their metadata
//! - **Property Store**: per-node layered values with change reporting
//! - **Element Tree**: arena of nodes with visual, logical and inheritance-context relations
//! - **Dispatcher**: prioritized queue of cancelable operations
//! - **Tree Walker**: de-duplicating walks over the merged logical + visual tree
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_core::{ElementTree, PropertyRegistry, Value};
//!
//! let registry = Arc::new(PropertyRegistry::new());
//! let wk = *registry.well_known();
//! let mut tree = ElementTree::new(registry);
//!
//! let panel = tree.create(wk.panel).unwrap();
//! let child = tree.create(wk.control).unwrap();
//! tree.add_visual_child(panel, child).unwrap();
//!
//! tree.set_value(child, wk.tag, "hello").unwrap();
//! assert_eq!(tree.get_value(child, wk.tag), Value::str("hello"));
//! ```

pub mod config;
pub mod dispatcher;
pub mod element;
pub mod error;
pub mod property;
pub mod store;
pub mod value;
pub mod walker;
pub mod well_known;

pub use config::{CompatibilityOptions, FrameworkConfig, LoadedDispatch, StoryboardHandoff};
pub use dispatcher::{Dispatcher, DispatcherOperation, DispatcherPriority, OperationId};
pub use element::{ElementTree, InheritanceBehavior, NodeId, NodeKind, SkipTarget};
pub use error::{CoreError, Result};
pub use property::{
    PropertyFlags, PropertyId, PropertyMetadata, PropertyRegistry, TypeKey, TypeKind, Validator,
};
pub use store::{BaseValueSource, PropertyChange, PropertyStore};
pub use value::{Color, ObjectRef, ObjectValue, Value};
pub use walker::{
    DescendentsWalker, PrePost, TreeVisitor, TreeWalkPriority, WalkContext,
    DEFAULT_RECURSION_LIMIT,
};
pub use well_known::WellKnown;
