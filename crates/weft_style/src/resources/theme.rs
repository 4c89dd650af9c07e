//! Theme resources
//!
//! Theme dictionaries are the last stop of every resource lookup and the
//! source of default (theme) styles. The cache is an explicit context object
//! shared by reference, so tests can build isolated instances and `reset`
//! returns it to its initial state.

use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use rustc_hash::FxHashMap;
use weft_core::{PropertyRegistry, TypeKey, Value};

use super::{ResourceDictionary, ResourceKey};
use crate::error::Result;
use crate::style::Style;

pub struct ThemeResourceCache {
    lock: Arc<ReentrantMutex<()>>,
    dictionaries: RwLock<Vec<ResourceDictionary>>,
    styles: RwLock<FxHashMap<TypeKey, Option<Style>>>,
}

impl Default for ThemeResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThemeResourceCache {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(ReentrantMutex::new(())),
            dictionaries: RwLock::new(Vec::new()),
            styles: RwLock::new(FxHashMap::default()),
        }
    }

    /// The lock every theme dictionary access goes through
    pub fn lock(&self) -> Arc<ReentrantMutex<()>> {
        self.lock.clone()
    }

    /// Add a theme dictionary. It becomes read-only and cross-thread
    /// accessible; later dictionaries take precedence.
    pub fn add_dictionary(&self, dictionary: ResourceDictionary) {
        dictionary.enable_cross_thread_access(self.lock.clone());
        dictionary.seal_read_only();
        self.dictionaries.write().push(dictionary);
        self.styles.write().clear();
        tracing::debug!("theme dictionary added");
    }

    pub fn dictionaries(&self) -> Vec<ResourceDictionary> {
        self.dictionaries.read().clone()
    }

    pub fn find_resource(&self, key: &ResourceKey) -> Result<Option<Value>> {
        let _guard = self.lock.lock();
        let dictionaries = self.dictionaries.read().clone();
        for dictionary in dictionaries.iter().rev() {
            if let Some(value) = dictionary.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Default style for `type_key`, falling back to the nearest base type
    /// that has one. Results (including misses) are cached per type.
    pub fn theme_style(&self, registry: &PropertyRegistry, type_key: TypeKey) -> Result<Option<Style>> {
        if let Some(cached) = self.styles.read().get(&type_key) {
            return Ok(cached.clone());
        }

        let mut found = None;
        let mut current = Some(type_key);
        while let Some(key) = current {
            if let Some(style) = self
                .find_resource(&ResourceKey::Type(key))?
                .as_ref()
                .and_then(Style::from_value)
            {
                found = Some(style);
                break;
            }
            current = registry.base_type(key);
        }

        if let Some(style) = &found {
            style.seal(registry)?;
        }
        self.styles.write().insert(type_key, found.clone());
        Ok(found)
    }

    /// Drop every theme dictionary and cached style
    pub fn reset(&self) {
        let _guard = self.lock.lock();
        self.dictionaries.write().clear();
        self.styles.write().clear();
        tracing::debug!("theme resource cache reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setter::Setter;
    use weft_core::Color;

    #[test]
    fn test_theme_style_falls_back_to_base_type() {
        let mut registry = PropertyRegistry::new();
        let wk = *registry.well_known();
        let button = registry
            .register_type("Button", Some(wk.content_control), weft_core::TypeKind::Element)
            .unwrap();

        let control_style = Style::builder(wk.control)
            .setter(Setter::new(wk.background, Color::GRAY))
            .build();
        let theme = ResourceDictionary::new();
        theme
            .insert(ResourceKey::Type(wk.control), control_style.to_value())
            .unwrap();

        let cache = ThemeResourceCache::new();
        cache.add_dictionary(theme.clone());
        assert!(theme.is_read_only());

        let style = cache.theme_style(&registry, button).unwrap().unwrap();
        assert!(style.ptr_eq(&control_style));
        assert!(style.is_sealed());

        cache.reset();
        assert!(cache.theme_style(&registry, button).unwrap().is_none());
    }

    #[test]
    fn test_later_dictionary_wins() {
        let cache = ThemeResourceCache::new();
        let first = ResourceDictionary::new();
        first.insert("accent", Color::RED).unwrap();
        let second = ResourceDictionary::new();
        second.insert("accent", Color::BLUE).unwrap();
        cache.add_dictionary(first);
        cache.add_dictionary(second);
        assert_eq!(
            cache.find_resource(&"accent".into()).unwrap(),
            Some(Value::Color(Color::BLUE))
        );
    }
}
