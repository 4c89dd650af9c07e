//! Resource dictionary
//!
//! A shared handle (`Arc` + interior `RwLock`) to a table of keyed values
//! plus an ordered list of merged dictionaries. Lookup checks the local table
//! first, then merged dictionaries from the last added to the first.
//!
//! Entries may be deferred: a factory realizes the value on first lookup.
//! Realization runs without holding the table lock so it can look up other
//! keys; a lookup of the key being realized reports "not found".
//!
//! Owners (elements or the application) are tracked so that a change can be
//! broadcast to every tree that might observe it. Ownership propagates into
//! merged dictionaries. Changes are queued on a [`ResourceChangeSink`] that
//! the framework drains.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use smallvec::SmallVec;
use weft_core::Value;

use super::reference::{DeferredResourceReference, ReferenceInner};
use super::{ResourceChange, ResourceKey, ResourceOwner, ResourcesChanged};
use crate::error::{Result, StyleError};

/// Creates the value of a deferred entry
pub type ResourceFactory = Arc<dyn Fn(&ResourceDictionary) -> Result<Value> + Send + Sync>;

/// Queue of pending change notifications
pub type ResourceChangeSink = Arc<Mutex<Vec<ResourcesChanged>>>;

enum EntryState {
    Realized(Value),
    Unrealized(ResourceFactory),
    Realizing(ResourceFactory),
}

struct Entry {
    state: EntryState,
    /// Realized values are cached only for shared entries
    shared: bool,
    version: u64,
}

#[derive(Default)]
struct DictionaryState {
    entries: IndexMap<ResourceKey, Entry>,
    merged: Vec<ResourceDictionary>,
    owners: SmallVec<[(ResourceOwner, u32); 2]>,
    read_only: bool,
    has_implicit_styles: bool,
    has_implicit_data_templates: bool,
    sink: Option<ResourceChangeSink>,
    references: Vec<Weak<ReferenceInner>>,
    next_version: u64,
}

struct DictionaryInner {
    state: RwLock<DictionaryState>,
    theme_lock: RwLock<Option<Arc<ReentrantMutex<()>>>>,
}

enum LocalLookup {
    Missing,
    Found(Value),
    Realizing,
}

#[derive(Clone)]
pub struct ResourceDictionary {
    inner: Arc<DictionaryInner>,
}

impl Default for ResourceDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ResourceDictionary {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ResourceDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("ResourceDictionary")
            .field("keys", &state.entries.keys().collect::<Vec<_>>())
            .field("merged", &state.merged.len())
            .field("read_only", &state.read_only)
            .finish()
    }
}

impl ResourceDictionary {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DictionaryInner {
                state: RwLock::new(DictionaryState::default()),
                theme_lock: RwLock::new(None),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &ResourceDictionary) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find `key` locally, then in merged dictionaries (last added first)
    pub fn get(&self, key: &ResourceKey) -> Result<Option<Value>> {
        self.with_theme_lock(|| self.get_internal(key))
    }

    fn get_internal(&self, key: &ResourceKey) -> Result<Option<Value>> {
        match self.get_local(key)? {
            LocalLookup::Found(value) => return Ok(Some(value)),
            LocalLookup::Realizing => {
                tracing::trace!(%key, "resource lookup re-entered while realizing");
                return Ok(None);
            }
            LocalLookup::Missing => {}
        }

        let merged = self.inner.state.read().merged.clone();
        for dictionary in merged.iter().rev() {
            if let Some(value) = dictionary.get_internal(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn get_local(&self, key: &ResourceKey) -> Result<LocalLookup> {
        let (factory, version) = {
            let mut state = self.inner.state.write();
            let Some(entry) = state.entries.get_mut(key) else {
                return Ok(LocalLookup::Missing);
            };
            match &entry.state {
                EntryState::Realized(value) => return Ok(LocalLookup::Found(value.clone())),
                EntryState::Realizing(_) => return Ok(LocalLookup::Realizing),
                EntryState::Unrealized(factory) => {
                    let factory = factory.clone();
                    entry.state = EntryState::Realizing(factory.clone());
                    (factory, entry.version)
                }
            }
        };

        tracing::trace!(%key, "realizing deferred resource");
        let result = factory(self);

        let mut state = self.inner.state.write();
        if let Some(entry) = state.entries.get_mut(key) {
            if entry.version == version && matches!(entry.state, EntryState::Realizing(_)) {
                entry.state = match (&result, entry.shared) {
                    (Ok(value), true) => EntryState::Realized(value.clone()),
                    _ => EntryState::Unrealized(factory),
                };
            }
        }
        result.map(LocalLookup::Found)
    }

    /// Whether `key` is present locally or in a merged dictionary. Never
    /// realizes deferred entries.
    pub fn contains_key(&self, key: &ResourceKey) -> bool {
        self.with_theme_lock(|| self.holder_of(key).is_some())
    }

    fn holder_of(&self, key: &ResourceKey) -> Option<ResourceDictionary> {
        let state = self.inner.state.read();
        if state.entries.contains_key(key) {
            return Some(self.clone());
        }
        state
            .merged
            .iter()
            .rev()
            .find_map(|dictionary| dictionary.holder_of(key))
    }

    /// A reference to `key` that resolves when read. If the entry changes
    /// before then, the reference keeps the previous value.
    pub fn deferred_reference(&self, key: &ResourceKey) -> Option<DeferredResourceReference> {
        let holder = self.with_theme_lock(|| self.holder_of(key))?;
        let reference = DeferredResourceReference::attached(holder.clone(), key.clone());
        holder
            .inner
            .state
            .write()
            .references
            .push(Arc::downgrade(reference.inner()));
        Some(reference)
    }

    /// Local keys in insertion order
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.inner.state.read().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.read().entries.is_empty()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Add or replace a value
    ///
    /// Owners are notified through the framework's change sink; dynamic resource
    /// references see the new value once `Framework::run_dispatcher` ran.
    pub fn insert(&self, key: impl Into<ResourceKey>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        self.with_theme_lock(|| self.insert_entry(key, EntryState::Realized(value), true))
    }

    /// Add or replace an entry realized by `factory` on first lookup
    pub fn insert_deferred<F>(&self, key: impl Into<ResourceKey>, shared: bool, factory: F) -> Result<()>
    where
        F: Fn(&ResourceDictionary) -> Result<Value> + Send + Sync + 'static,
    {
        let key = key.into();
        self.with_theme_lock(|| {
            self.insert_entry(key, EntryState::Unrealized(Arc::new(factory)), shared)
        })
    }

    fn insert_entry(&self, key: ResourceKey, state: EntryState, shared: bool) -> Result<()> {
        self.ensure_writable()?;
        self.pin_references(Some(&key))?;
        {
            let mut st = self.inner.state.write();
            st.next_version += 1;
            let version = st.next_version;
            match &key {
                ResourceKey::Type(_) => st.has_implicit_styles = true,
                ResourceKey::DataTemplate(_) => st.has_implicit_data_templates = true,
                ResourceKey::Name(_) => {}
            }
            st.entries.insert(
                key.clone(),
                Entry {
                    state,
                    shared,
                    version,
                },
            );
        }
        tracing::trace!(%key, "resource dictionary: set");
        self.notify(ResourceChange::single(key));
        Ok(())
    }

    /// Remove a local entry, returning its realized value if it had one
    pub fn remove(&self, key: &ResourceKey) -> Result<Option<Value>> {
        self.with_theme_lock(|| {
            self.ensure_writable()?;
            if !self.inner.state.read().entries.contains_key(key) {
                return Ok(None);
            }
            self.pin_references(Some(key))?;
            let removed = self.inner.state.write().entries.shift_remove(key);
            self.notify(ResourceChange::single(key.clone()));
            Ok(removed.and_then(|entry| match entry.state {
                EntryState::Realized(value) => Some(value),
                _ => None,
            }))
        })
    }

    /// Remove every local entry. Reported as a catastrophic change.
    pub fn clear(&self) -> Result<()> {
        self.with_theme_lock(|| {
            self.ensure_writable()?;
            self.pin_references(None)?;
            {
                let mut st = self.inner.state.write();
                st.entries.clear();
                st.has_implicit_styles = false;
                st.has_implicit_data_templates = false;
            }
            self.notify(ResourceChange::Catastrophic);
            Ok(())
        })
    }

    // =========================================================================
    // Merged dictionaries
    // =========================================================================

    pub fn merged_dictionaries(&self) -> Vec<ResourceDictionary> {
        self.inner.state.read().merged.clone()
    }

    /// Append `child` to the merged list (highest lookup precedence)
    pub fn add_merged(&self, child: &ResourceDictionary) -> Result<()> {
        self.with_theme_lock(|| {
            self.ensure_writable()?;
            if child.reaches(self) {
                return Err(StyleError::CircularMergedDictionary);
            }

            let (owners, sink, theme_lock) = {
                let mut st = self.inner.state.write();
                st.merged.push(child.clone());
                (
                    st.owners.clone(),
                    st.sink.clone(),
                    self.inner.theme_lock.read().clone(),
                )
            };
            for (owner, count) in owners {
                for _ in 0..count {
                    child.add_owner(owner);
                }
            }
            if let Some(sink) = sink {
                child.propagate_sink(&sink);
            }
            if let Some(lock) = theme_lock {
                child.enable_cross_thread_access(lock);
            }
            tracing::trace!("resource dictionary: merged dictionary added");
            self.notify(ResourceChange::Catastrophic);
            Ok(())
        })
    }

    pub fn remove_merged(&self, child: &ResourceDictionary) -> Result<bool> {
        self.with_theme_lock(|| {
            self.ensure_writable()?;
            let owners = {
                let mut st = self.inner.state.write();
                let Some(index) = st.merged.iter().position(|d| d.ptr_eq(child)) else {
                    return Ok(false);
                };
                st.merged.remove(index);
                st.owners.clone()
            };
            for (owner, count) in owners {
                for _ in 0..count {
                    child.remove_owner(owner);
                }
            }
            self.notify(ResourceChange::Catastrophic);
            Ok(true)
        })
    }

    /// Whether `target` is this dictionary or reachable through merged lists
    fn reaches(&self, target: &ResourceDictionary) -> bool {
        if self.ptr_eq(target) {
            return true;
        }
        let merged = self.inner.state.read().merged.clone();
        merged.iter().any(|child| child.reaches(target))
    }

    // =========================================================================
    // Owners and notifications
    // =========================================================================

    pub fn add_owner(&self, owner: ResourceOwner) {
        let merged = {
            let mut st = self.inner.state.write();
            match st.owners.iter_mut().find(|(o, _)| *o == owner) {
                Some((_, count)) => *count += 1,
                None => st.owners.push((owner, 1)),
            }
            st.merged.clone()
        };
        for child in merged {
            child.add_owner(owner);
        }
    }

    pub fn remove_owner(&self, owner: ResourceOwner) {
        let merged = {
            let mut st = self.inner.state.write();
            if let Some(index) = st.owners.iter().position(|(o, _)| *o == owner) {
                st.owners[index].1 -= 1;
                if st.owners[index].1 == 0 {
                    st.owners.remove(index);
                }
            }
            st.merged.clone()
        };
        for child in merged {
            child.remove_owner(owner);
        }
    }

    pub fn owners(&self) -> Vec<ResourceOwner> {
        self.inner
            .state
            .read()
            .owners
            .iter()
            .map(|(owner, _)| *owner)
            .collect()
    }

    pub fn is_owned_by(&self, owner: ResourceOwner) -> bool {
        self.inner.state.read().owners.iter().any(|(o, _)| *o == owner)
    }

    /// Route change notifications of this dictionary and its merged
    /// dictionaries to `sink`
    pub fn set_change_sink(&self, sink: ResourceChangeSink) {
        self.propagate_sink(&sink);
    }

    fn propagate_sink(&self, sink: &ResourceChangeSink) {
        let merged = {
            let mut st = self.inner.state.write();
            st.sink = Some(sink.clone());
            st.merged.clone()
        };
        for child in merged {
            child.propagate_sink(sink);
        }
    }

    fn notify(&self, change: ResourceChange) {
        let (owners, sink) = {
            let st = self.inner.state.read();
            (
                st.owners.iter().map(|(o, _)| *o).collect::<SmallVec<_>>(),
                st.sink.clone(),
            )
        };
        if owners.is_empty() {
            return;
        }
        if let Some(sink) = sink {
            sink.lock().push(ResourcesChanged { owners, change });
        }
    }

    /// Detach deferred references to `key` (all keys when `None`), pinning
    /// the value they would have resolved to
    fn pin_references(&self, key: Option<&ResourceKey>) -> Result<()> {
        let affected: Vec<Arc<ReferenceInner>> = {
            let mut st = self.inner.state.write();
            st.references.retain(|weak| weak.strong_count() > 0);
            st.references
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|r| key.map_or(true, |k| r.key() == k))
                .collect()
        };
        if affected.is_empty() {
            return Ok(());
        }

        for reference in &affected {
            let value = match self.get_local(reference.key())? {
                LocalLookup::Found(value) => Some(value),
                _ => None,
            };
            reference.pin(value);
        }
        self.inner.state.write().references.retain(|weak| {
            weak.upgrade()
                .map_or(false, |r| !affected.iter().any(|a| Arc::ptr_eq(a, &r)))
        });
        Ok(())
    }

    // =========================================================================
    // Flags and access modes
    // =========================================================================

    /// Whether this dictionary or a merged one ever held an implicit style.
    /// Only `clear` resets the local flag.
    pub fn has_implicit_styles(&self) -> bool {
        let st = self.inner.state.read();
        st.has_implicit_styles || st.merged.iter().any(|d| d.has_implicit_styles())
    }

    pub fn has_implicit_data_templates(&self) -> bool {
        let st = self.inner.state.read();
        st.has_implicit_data_templates
            || st.merged.iter().any(|d| d.has_implicit_data_templates())
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.state.read().read_only
    }

    /// Forbid further mutation of this dictionary and its merged dictionaries
    pub fn seal_read_only(&self) {
        let merged = {
            let mut st = self.inner.state.write();
            st.read_only = true;
            st.merged.clone()
        };
        for child in merged {
            child.seal_read_only();
        }
    }

    /// Serialize every access behind `lock`, shared with merged dictionaries
    pub fn enable_cross_thread_access(&self, lock: Arc<ReentrantMutex<()>>) {
        *self.inner.theme_lock.write() = Some(lock.clone());
        let merged = self.inner.state.read().merged.clone();
        for child in merged {
            child.enable_cross_thread_access(lock.clone());
        }
    }

    pub fn can_be_accessed_across_threads(&self) -> bool {
        self.inner.theme_lock.read().is_some()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.inner.state.read().read_only {
            Err(StyleError::Sealed("resource dictionary"))
        } else {
            Ok(())
        }
    }

    fn with_theme_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let lock = self.inner.theme_lock.read().clone();
        match lock {
            Some(lock) => {
                let _guard = lock.lock();
                f()
            }
            None => f(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_core::TypeKey;

    #[test]
    fn test_merged_lookup_and_local_shadowing() {
        let d1 = ResourceDictionary::new();
        let d2 = ResourceDictionary::new();
        d2.insert("k", 5).unwrap();
        d1.add_merged(&d2).unwrap();

        assert_eq!(d1.get(&"k".into()).unwrap(), Some(Value::Int(5)));

        d1.insert("k", 7).unwrap();
        assert_eq!(d1.get(&"k".into()).unwrap(), Some(Value::Int(7)));
        assert_eq!(d2.get(&"k".into()).unwrap(), Some(Value::Int(5)));
    }

    #[test]
    fn test_last_merged_wins() {
        let root = ResourceDictionary::new();
        let first = ResourceDictionary::new();
        let second = ResourceDictionary::new();
        first.insert("k", "first").unwrap();
        second.insert("k", "second").unwrap();
        root.add_merged(&first).unwrap();
        root.add_merged(&second).unwrap();

        assert_eq!(root.get(&"k".into()).unwrap(), Some(Value::str("second")));
        root.remove_merged(&second).unwrap();
        assert_eq!(root.get(&"k".into()).unwrap(), Some(Value::str("first")));
    }

    #[test]
    fn test_merge_cycles_rejected() {
        // depth 1
        let a = ResourceDictionary::new();
        assert_eq!(a.add_merged(&a), Err(StyleError::CircularMergedDictionary));

        // depth 2
        let b = ResourceDictionary::new();
        a.add_merged(&b).unwrap();
        assert_eq!(b.add_merged(&a), Err(StyleError::CircularMergedDictionary));

        // depth 3
        let c = ResourceDictionary::new();
        b.add_merged(&c).unwrap();
        assert_eq!(c.add_merged(&a), Err(StyleError::CircularMergedDictionary));

        // depth 4
        let d = ResourceDictionary::new();
        c.add_merged(&d).unwrap();
        assert_eq!(d.add_merged(&b), Err(StyleError::CircularMergedDictionary));
    }

    #[test]
    fn test_deferred_realization_cached_when_shared() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dict = ResourceDictionary::new();
        let counter = calls.clone();
        dict.insert_deferred("shared", true, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::object(1u8))
        })
        .unwrap();
        let counter = calls.clone();
        dict.insert_deferred("fresh", false, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::object(2u8))
        })
        .unwrap();

        let a = dict.get(&"shared".into()).unwrap();
        let b = dict.get(&"shared".into()).unwrap();
        assert_eq!(a, b);
        let c = dict.get(&"fresh".into()).unwrap();
        let d = dict.get(&"fresh".into()).unwrap();
        assert_ne!(c, d);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reentrant_realization_is_not_found() {
        let dict = ResourceDictionary::new();
        dict.insert_deferred("self", true, |d| {
            let inner = d.get(&"self".into())?;
            Ok(Value::Bool(inner.is_none()))
        })
        .unwrap();
        assert_eq!(dict.get(&"self".into()).unwrap(), Some(Value::Bool(true)));
    }

    #[test]
    fn test_deferred_entry_can_use_other_keys() {
        let dict = ResourceDictionary::new();
        dict.insert("base", 2).unwrap();
        dict.insert_deferred("derived", true, |d| {
            let base = d.get(&"base".into())?.and_then(|v| v.as_int()).unwrap_or(0);
            Ok(Value::Int(base * 10))
        })
        .unwrap();
        assert_eq!(dict.get(&"derived".into()).unwrap(), Some(Value::Int(20)));
    }

    #[test]
    fn test_read_only() {
        let dict = ResourceDictionary::new();
        let merged = ResourceDictionary::new();
        dict.add_merged(&merged).unwrap();
        dict.seal_read_only();
        assert_eq!(dict.insert("k", 1), Err(StyleError::Sealed("resource dictionary")));
        assert!(merged.clear().is_err());
    }

    #[test]
    fn test_owners_propagate_and_changes_are_queued() {
        let sink: ResourceChangeSink = Arc::new(Mutex::new(Vec::new()));
        let root = ResourceDictionary::new();
        let child = ResourceDictionary::new();
        root.add_owner(ResourceOwner::Application);
        root.set_change_sink(sink.clone());
        root.add_merged(&child).unwrap();
        assert!(child.is_owned_by(ResourceOwner::Application));
        sink.lock().clear();

        child.insert("k", 1).unwrap();
        let changes = sink.lock().clone();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].owners.as_slice(), &[ResourceOwner::Application]);
        assert!(changes[0].change.affects(&"k".into()));

        root.clear().unwrap();
        assert_eq!(sink.lock().last().map(|c| c.change.clone()), Some(ResourceChange::Catastrophic));

        root.remove_merged(&child).unwrap();
        assert!(!child.is_owned_by(ResourceOwner::Application));
    }

    #[test]
    fn test_implicit_flags_are_monotonic() {
        let dict = ResourceDictionary::new();
        let merged = ResourceDictionary::new();
        dict.add_merged(&merged).unwrap();
        assert!(!dict.has_implicit_styles());

        merged.insert(ResourceKey::Type(TypeKey::from_raw(1)), 1).unwrap();
        assert!(dict.has_implicit_styles());
        merged.remove(&ResourceKey::Type(TypeKey::from_raw(1))).unwrap();
        assert!(dict.has_implicit_styles());
        merged.clear().unwrap();
        assert!(!dict.has_implicit_styles());
    }

    #[test]
    fn test_deferred_reference_pins_old_value() {
        let dict = ResourceDictionary::new();
        dict.insert("brush", "red").unwrap();
        let reference = dict.deferred_reference(&"brush".into()).unwrap();
        assert!(reference.is_attached());

        dict.insert("brush", "blue").unwrap();
        assert!(!reference.is_attached());
        assert_eq!(reference.value().unwrap(), Some(Value::str("red")));
        assert_eq!(dict.get(&"brush".into()).unwrap(), Some(Value::str("blue")));
    }

    #[test]
    fn test_cross_thread_access() {
        let lock = Arc::new(ReentrantMutex::new(()));
        let dict = ResourceDictionary::new();
        let merged = ResourceDictionary::new();
        merged.insert("k", 1).unwrap();
        dict.add_merged(&merged).unwrap();
        dict.enable_cross_thread_access(lock);
        assert!(merged.can_be_accessed_across_threads());

        let worker = dict.clone();
        let handle = std::thread::spawn(move || worker.get(&"k".into()));
        assert_eq!(handle.join().unwrap().unwrap(), Some(Value::Int(1)));
    }
}
