//! Deferred resource references

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use weft_core::Value;

use super::{ResourceDictionary, ResourceKey};
use crate::error::Result;

enum ReferenceState {
    Attached(ResourceDictionary),
    /// Detached after the entry changed; holds the value from before the change
    Pinned(Option<Value>),
}

pub(crate) struct ReferenceInner {
    key: ResourceKey,
    state: Mutex<ReferenceState>,
}

impl ReferenceInner {
    pub(crate) fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub(crate) fn pin(&self, value: Option<Value>) {
        *self.state.lock() = ReferenceState::Pinned(value);
    }
}

/// Result of a resource lookup whose value is realized on first read
#[derive(Clone)]
pub struct DeferredResourceReference {
    inner: Arc<ReferenceInner>,
}

impl DeferredResourceReference {
    pub(crate) fn attached(dictionary: ResourceDictionary, key: ResourceKey) -> Self {
        Self {
            inner: Arc::new(ReferenceInner {
                key,
                state: Mutex::new(ReferenceState::Attached(dictionary)),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ReferenceInner> {
        &self.inner
    }

    pub fn key(&self) -> &ResourceKey {
        &self.inner.key
    }

    pub fn is_attached(&self) -> bool {
        matches!(*self.inner.state.lock(), ReferenceState::Attached(_))
    }

    /// Resolve the value, realizing the dictionary entry if needed
    pub fn value(&self) -> Result<Option<Value>> {
        let dictionary = match &*self.inner.state.lock() {
            ReferenceState::Attached(dictionary) => dictionary.clone(),
            ReferenceState::Pinned(value) => return Ok(value.clone()),
        };
        dictionary.get(&self.inner.key)
    }
}

impl fmt::Debug for DeferredResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResourceReference")
            .field("key", &self.inner.key)
            .field("attached", &self.is_attached())
            .finish()
    }
}
