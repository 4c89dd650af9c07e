//! Core error types

use thiserror::Error;

use crate::element::NodeId;

/// Errors raised by the property store, element tree and tree walker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A tree walk exceeded the recursion limit, which means the
    /// visual/logical relations form a loop
    #[error("Logical tree loop detected: walk exceeded depth {limit}")]
    TreeLoop { limit: usize },

    /// A property validator rejected a value
    #[error("Value rejected for property '{property}': {reason}")]
    InvalidValue { property: String, reason: String },

    /// The node handle is stale or was never part of this tree
    #[error("Node {0:?} does not exist")]
    NodeNotFound(NodeId),

    /// A type or property with this name is already registered
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// The type cannot be instantiated as a tree node
    #[error("Type '{0}' is not an element type")]
    NotAnElementType(String),

    /// A parent/child operation that would corrupt the tree
    #[error("Invalid tree operation: {0}")]
    InvalidTreeOperation(String),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
