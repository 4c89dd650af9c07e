//! Shared test setup

use std::sync::Arc;

use weft_core::{FrameworkConfig, PropertyRegistry, TypeKey, TypeKind, WellKnown};

use crate::framework::Framework;

pub(crate) struct Fixture {
    pub(crate) fw: Framework,
    pub(crate) wk: WellKnown,
    /// A content control
    pub(crate) button: TypeKey,
    /// A plain data type for data template lookup
    pub(crate) item: TypeKey,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_config(FrameworkConfig::default())
    }

    pub(crate) fn with_config(config: FrameworkConfig) -> Self {
        let mut registry = PropertyRegistry::new();
        let wk = *registry.well_known();
        let button = registry
            .register_type("Button", Some(wk.content_control), TypeKind::Element)
            .unwrap();
        let item = registry.register_type("Item", None, TypeKind::Plain).unwrap();
        Self {
            fw: Framework::with_config(Arc::new(registry), config),
            wk,
            button,
            item,
        }
    }
}
