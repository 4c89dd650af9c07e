//! Prioritized, cancelable operation queue
//!
//! Operations are boxed `FnOnce(&mut C)` callbacks run against the context
//! that owns the dispatcher. Higher priorities run first; within a priority,
//! operations run in the order they were queued.
//!
//! Because an operation needs `&mut C` while the dispatcher itself lives
//! inside `C`, processing goes through an accessor:
//!
//! ```ignore
//! Dispatcher::process_all(&mut framework, |fw| &mut fw.dispatcher);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle to a queued dispatcher operation
    pub struct OperationId;
}

/// Queue priority, lowest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DispatcherPriority {
    Background,
    Input,
    Loaded,
    Render,
    DataBind,
    Normal,
    Send,
}

/// Cancelable handle returned by [`Dispatcher::begin_invoke`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DispatcherOperation {
    id: OperationId,
    priority: DispatcherPriority,
}

impl DispatcherOperation {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn priority(&self) -> DispatcherPriority {
        self.priority
    }
}

type Callback<C> = Box<dyn FnOnce(&mut C) + Send>;

struct Queued<C> {
    callback: Callback<C>,
    order: (std::cmp::Reverse<DispatcherPriority>, u64),
}

pub struct Dispatcher<C> {
    operations: SlotMap<OperationId, Queued<C>>,
    order: BTreeMap<(std::cmp::Reverse<DispatcherPriority>, u64), OperationId>,
    sequence: u64,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.operations.len())
            .finish()
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            operations: SlotMap::with_key(),
            order: BTreeMap::new(),
            sequence: 0,
        }
    }

    /// Queue `callback` at `priority`
    pub fn begin_invoke<F>(&mut self, priority: DispatcherPriority, callback: F) -> DispatcherOperation
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let order = (std::cmp::Reverse(priority), self.sequence);
        self.sequence += 1;
        let id = self.operations.insert(Queued {
            callback: Box::new(callback),
            order,
        });
        self.order.insert(order, id);
        tracing::trace!(?priority, ?id, "dispatcher: queued operation");
        DispatcherOperation { id, priority }
    }

    /// Cancel a pending operation. Returns `false` if it already ran or was
    /// aborted before.
    pub fn abort(&mut self, operation: DispatcherOperation) -> bool {
        match self.operations.remove(operation.id) {
            Some(queued) => {
                self.order.remove(&queued.order);
                tracing::trace!(id = ?operation.id, "dispatcher: aborted operation");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, operation: DispatcherOperation) -> bool {
        self.operations.contains_key(operation.id)
    }

    pub fn pending_count(&self) -> usize {
        self.operations.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Remove and return the next operation to run
    fn pop_next(&mut self) -> Option<Callback<C>> {
        let (_, id) = self.order.pop_first()?;
        self.operations.remove(id).map(|queued| queued.callback)
    }

    /// Run the highest-priority pending operation. Returns `false` if the
    /// queue was empty.
    pub fn process_next(ctx: &mut C, dispatcher: fn(&mut C) -> &mut Dispatcher<C>) -> bool {
        match dispatcher(ctx).pop_next() {
            Some(callback) => {
                callback(ctx);
                true
            }
            None => false,
        }
    }

    /// Run operations until the queue is empty, including operations queued
    /// while processing. Returns how many ran.
    pub fn process_all(ctx: &mut C, dispatcher: fn(&mut C) -> &mut Dispatcher<C>) -> usize {
        let mut count = 0;
        while Self::process_next(ctx, dispatcher) {
            count += 1;
        }
        count
    }
}
