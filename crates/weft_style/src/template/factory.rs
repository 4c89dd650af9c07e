//! Eagerly built template trees

use std::sync::Arc;

use weft_core::{PropertyId, PropertyRegistry, TypeKey};

use super::TemplateNode;
use crate::compiler::CompiledValue;
use crate::error::{Result, StyleError};
use crate::resources::ResourceKey;
use crate::setter::SetterValue;

/// Description of one element of a template's visual tree
///
/// ```ignore
/// let tree = FrameworkElementFactory::new(wk.panel)
///     .with_name("Root")
///     .with_template_binding(wk.background, wk.background)
///     .with_child(FrameworkElementFactory::new(wk.content_presenter));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct FrameworkElementFactory {
    type_key: TypeKey,
    name: Option<Arc<str>>,
    values: Vec<(PropertyId, SetterValue)>,
    children: Vec<FrameworkElementFactory>,
}

impl FrameworkElementFactory {
    pub fn new(type_key: TypeKey) -> Self {
        Self {
            type_key,
            name: None,
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(Arc::from(name));
        self
    }

    pub fn with_value(mut self, property: PropertyId, value: impl Into<SetterValue>) -> Self {
        self.values.push((property, value.into()));
        self
    }

    pub fn with_template_binding(self, property: PropertyId, source: PropertyId) -> Self {
        self.with_value(property, SetterValue::TemplateBinding(source))
    }

    pub fn with_resource_reference(self, property: PropertyId, key: impl Into<ResourceKey>) -> Self {
        self.with_value(property, SetterValue::DynamicResource(key.into()))
    }

    pub fn with_child(mut self, child: FrameworkElementFactory) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(&self) -> &[FrameworkElementFactory] {
        &self.children
    }

    pub(crate) fn to_node(&self, registry: &PropertyRegistry) -> Result<TemplateNode> {
        let Some(kind) = registry.type_kind(self.type_key) else {
            return Err(StyleError::InvalidTemplate(format!(
                "unknown type #{}",
                self.type_key.to_raw()
            )));
        };
        if !kind.is_tree_node() {
            return Err(StyleError::InvalidTemplate(format!(
                "'{}' is not an element type",
                registry.type_name(self.type_key)
            )));
        }

        let name_property = registry.well_known().name;
        let mut name = self.name.clone();
        let mut values = Vec::with_capacity(self.values.len());
        for (property, value) in &self.values {
            match value {
                SetterValue::Value(v) if *property == name_property => {
                    name = v.as_str().map(Arc::from);
                }
                other => values.push((*property, CompiledValue::from(other))),
            }
        }

        let children = self
            .children
            .iter()
            .map(|child| child.to_node(registry))
            .collect::<Result<Vec<_>>>()?;

        Ok(TemplateNode {
            type_key: self.type_key,
            kind,
            name,
            slot: None,
            values,
            children,
        })
    }
}
