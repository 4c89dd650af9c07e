//! Styling engine error types

use thiserror::Error;
use weft_animation::AnimationError;
use weft_core::CoreError;

/// Errors raised while building, sealing and applying styles, templates and
/// resources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StyleError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Animation(#[from] AnimationError),

    /// Mutation of a sealed style, template or read-only dictionary
    #[error("Cannot modify a sealed {0}")]
    Sealed(&'static str),

    #[error("Circular BasedOn chain in style #{0}")]
    CircularBasedOn(u64),

    #[error("Style target type '{derived}' does not derive from BasedOn target type '{base}'")]
    BasedOnTypeMismatch { derived: String, base: String },

    #[error("Style targets '{style_target}', which element type '{element}' does not derive from")]
    StyleTargetTypeMismatch { style_target: String, element: String },

    #[error("Resource dictionary cannot be merged into itself")]
    CircularMergedDictionary,

    #[error("Duplicate template child name '{0}'")]
    DuplicateChildName(String),

    /// Names ending in the generated-name suffix are reserved
    #[error("Template child name '{0}' is reserved")]
    ReservedChildName(String),

    #[error("Template has no child named '{0}'")]
    UnknownChildName(String),

    #[error("Event triggers cannot contain setters")]
    EventTriggerWithSetters,

    #[error("Setter cannot target the '{0}' property")]
    ReservedSetterProperty(String),

    #[error("Style setters cannot use TargetName ('{0}')")]
    TargetNameInStyle(String),

    #[error("Content source property '{property}' not found on type '{target}'")]
    MissingContentSource { property: String, target: String },

    #[error("Resource '{0}' not found")]
    ResourceNotFound(String),

    #[error("Template is not valid for this element: {0}")]
    InvalidTemplate(String),

    /// Malformed markup node stream
    #[error("Markup error at node {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Visual state '{0}' not found")]
    StateNotFound(String),
}

pub type Result<T> = std::result::Result<T, StyleError>;
