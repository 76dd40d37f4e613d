use super::{ContextError, ContextReader, ContextWriter};
use crate::core::types::{ContextId, Lock, LockId, LockingContext};
use fxhash::FxHashMap;

/// In-memory descriptor store implementing both sides of the interface
///
/// Ids handed out by the writer are dense and start at 0. A store can also
/// be rebuilt from persisted descriptors with [`insert_lock`] and
/// [`insert_context`], after which new ids continue past the highest one seen.
///
/// [`insert_lock`]: ContextMemoryStorage::insert_lock
/// [`insert_context`]: ContextMemoryStorage::insert_context
#[derive(Debug, Default, Clone)]
pub struct ContextMemoryStorage {
    locks: FxHashMap<LockId, Lock>,
    contexts: FxHashMap<ContextId, LockingContext>,
    next_lock_id: LockId,
    next_context_id: ContextId,
}

impl ContextMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a persisted lock descriptor under its original id
    pub fn insert_lock(&mut self, lock: Lock) -> Result<(), ContextError> {
        if let Some(existing) = self.locks.get(&lock.id()) {
            if existing.class_name() != lock.class_name() {
                return Err(ContextError::ConflictingLock(lock.id()));
            }
            return Ok(());
        }
        self.next_lock_id = self.next_lock_id.max(lock.id().saturating_add(1));
        self.locks.insert(lock.id(), lock);
        Ok(())
    }

    /// Restore a persisted locking context under its original id
    pub fn insert_context(&mut self, context: LockingContext) -> Result<(), ContextError> {
        if let Some(existing) = self.contexts.get(&context.id()) {
            let same = existing.thread_name() == context.thread_name()
                && existing.lock_reference() == context.lock_reference()
                && existing.method() == context.method();
            if !same {
                return Err(ContextError::ConflictingContext(context.id()));
            }
            return Ok(());
        }
        self.next_context_id = self.next_context_id.max(context.id().saturating_add(1));
        self.contexts.insert(context.id(), context);
        Ok(())
    }

    /// Forget a lock descriptor; its id is never handed out again
    pub fn remove_lock(&mut self, id: LockId) -> Option<Lock> {
        self.locks.remove(&id)
    }

    /// Forget a locking context; its id is never handed out again
    pub fn remove_context(&mut self, id: ContextId) -> Option<LockingContext> {
        self.contexts.remove(&id)
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}

impl ContextReader for ContextMemoryStorage {
    fn read_lock(&self, id: LockId) -> Result<Lock, ContextError> {
        self.locks
            .get(&id)
            .cloned()
            .ok_or(ContextError::UnknownLock(id))
    }

    fn read_context(&self, id: ContextId) -> Result<LockingContext, ContextError> {
        self.contexts
            .get(&id)
            .cloned()
            .ok_or(ContextError::UnknownContext(id))
    }
}

impl ContextWriter for ContextMemoryStorage {
    fn write_lock(&mut self, class_name: &str) -> LockId {
        let id = self.next_lock_id;
        self.next_lock_id += 1;
        self.locks.insert(id, Lock::new(id, class_name));
        id
    }

    fn write_context(
        &mut self,
        thread_name: &str,
        lock_reference: &str,
        method: &str,
    ) -> ContextId {
        let id = self.next_context_id;
        self.next_context_id += 1;
        self.contexts.insert(
            id,
            LockingContext::new(id, thread_name, lock_reference, method),
        );
        id
    }
}
