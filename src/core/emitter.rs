//! Event emission path
//!
//! Every observed lock transition goes through [`EventEmitter::record`]: the
//! lock object is interned by identity, the call site is interned by value,
//! and the resulting [`LockEvent`] is handed to the configured sink on the
//! calling thread.
//!
//! All interning state sits behind one coarse lock. The sink is invoked
//! after that lock is released, so a sink that itself takes monitors does not
//! re-enter the interner while it is held.
//!
//! Descriptors are only kept while they can still show up in new events.
//! The descriptor of a lock is dropped together with its identity entry once
//! the lock object is gone, and the contexts of a thread are dropped when
//! that thread exits. A sink that persists events (such as `EventLogger`)
//! keeps its own copy, so ids stay resolvable offline.

use crate::core::contexts::{ContextError, ContextMemoryStorage, ContextReader, ContextWriter};
use crate::core::logger::LockEventSink;
use crate::core::registry::IdentityWeakMap;
use crate::core::types::{
    ContextId, Lock, LockEvent, LockEventType, LockId, LockingContext, get_current_thread_id,
    get_current_thread_name,
};
use anyhow::Result;
use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use std::any::{Any, type_name};
use std::cell::RefCell;
use std::sync::{Arc, Weak};

/// Object type accepted as a lock identity
pub type LockObject = dyn Any + Send + Sync;

/// Capture state owned by each thread
struct ThreadState {
    name: Arc<str>,
    /// Interners holding contexts created by this thread
    interners: RefCell<Vec<Weak<Mutex<Interner>>>>,
}

impl ThreadState {
    fn register(&self, interner: &Arc<Mutex<Interner>>) {
        let weak = Arc::downgrade(interner);
        let mut interners = self.interners.borrow_mut();
        if !interners.iter().any(|known| known.ptr_eq(&weak)) {
            interners.retain(|known| known.strong_count() > 0);
            interners.push(weak);
        }
    }
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        for interner in self.interners.get_mut().drain(..) {
            if let Some(interner) = interner.upgrade() {
                interner.lock().retire_thread(&self.name);
            }
        }
    }
}

thread_local! {
    static THREAD_STATE: ThreadState = ThreadState {
        name: get_current_thread_name().into(),
        interners: RefCell::new(Vec::new()),
    };
}

type ContextKey = (Arc<str>, String, String);

/// Interning state guarded by the emitter's coarse lock
struct Interner {
    locks: IdentityWeakMap<LockObject, Lock>,
    contexts: FxHashMap<ContextKey, LockingContext>,
    storage: ContextMemoryStorage,
}

impl Interner {
    fn intern_lock(&mut self, object: &Arc<LockObject>, class_name: &str) -> Lock {
        if let Some(lock) = self.locks.get(object) {
            return lock;
        }
        let id = self.storage.write_lock(class_name);
        let lock = Lock::new(id, class_name);

        let storage = &mut self.storage;
        self.locks.put_with(object, lock.clone(), |dead| {
            storage.remove_lock(dead.id());
        });
        lock
    }

    /// Returns the context and whether it was created by this call
    fn intern_context(
        &mut self,
        thread_name: &Arc<str>,
        lock_reference: &str,
        method: &str,
    ) -> (LockingContext, bool) {
        let key = (
            Arc::clone(thread_name),
            lock_reference.to_string(),
            method.to_string(),
        );
        if let Some(context) = self.contexts.get(&key) {
            return (context.clone(), false);
        }
        let id = self
            .storage
            .write_context(thread_name, lock_reference, method);
        let context = LockingContext::new(id, Arc::clone(thread_name), lock_reference, method);
        self.contexts.insert(key, context.clone());
        (context, true)
    }

    fn purge(&mut self) -> usize {
        let storage = &mut self.storage;
        self.locks.purge_with(|dead| {
            storage.remove_lock(dead.id());
        })
    }

    /// Drop every context created by the named thread
    fn retire_thread(&mut self, thread_name: &str) {
        let storage = &mut self.storage;
        self.contexts.retain(|(thread, _, _), context| {
            if thread.as_ref() != thread_name {
                return true;
            }
            storage.remove_context(context.id());
            false
        });
    }
}

/// Turns lock operations into interned [`LockEvent`]s
pub struct EventEmitter {
    interner: Arc<Mutex<Interner>>,
    sink: Option<Box<dyn LockEventSink>>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl EventEmitter {
    /// Create an emitter forwarding events to `sink`
    ///
    /// Without a sink events are still interned and returned to the caller.
    pub fn new(sink: Option<Box<dyn LockEventSink>>) -> Self {
        EventEmitter {
            interner: Arc::new(Mutex::new(Interner {
                locks: IdentityWeakMap::new(),
                contexts: FxHashMap::default(),
                storage: ContextMemoryStorage::new(),
            })),
            sink,
        }
    }

    /// Record that the current thread acquired `monitor`
    pub fn on_monitor_enter<T: Any + Send + Sync>(
        &self,
        monitor: &Arc<T>,
        lock_reference: &str,
        method: &str,
    ) -> LockEvent {
        let object: Arc<LockObject> = monitor.clone();
        self.record(
            LockEventType::Acquire,
            &object,
            type_name::<T>(),
            lock_reference,
            method,
        )
    }

    /// Record that the current thread released `monitor`
    pub fn on_monitor_exit<T: Any + Send + Sync>(
        &self,
        monitor: &Arc<T>,
        lock_reference: &str,
        method: &str,
    ) -> LockEvent {
        let object: Arc<LockObject> = monitor.clone();
        self.record(
            LockEventType::Release,
            &object,
            type_name::<T>(),
            lock_reference,
            method,
        )
    }

    /// Intern one lock transition and forward it to the sink
    ///
    /// `class_name` is only used the first time `object` is seen.
    pub fn record(
        &self,
        event_type: LockEventType,
        object: &Arc<LockObject>,
        class_name: &str,
        lock_reference: &str,
        method: &str,
    ) -> LockEvent {
        let intern = |thread_name: &Arc<str>| {
            let mut interner = self.interner.lock();
            let lock = interner.intern_lock(object, class_name);
            let (context, created) = interner.intern_context(thread_name, lock_reference, method);
            (LockEvent::new(event_type, lock, context), created)
        };

        let event = THREAD_STATE
            .try_with(|state| {
                let (event, created) = intern(&state.name);
                if created {
                    state.register(&self.interner);
                }
                event
            })
            .unwrap_or_else(|_| {
                // Thread-local state is already torn down; std::thread::current
                // may panic at this point too
                let name: Arc<str> = format!("thread-{}", get_current_thread_id()).into();
                intern(&name).0
            });

        if let Some(sink) = &self.sink {
            sink.on_lock_event(get_current_thread_id(), &event);
        }
        event
    }

    /// Number of lock objects currently tracked, dead ones included until purged
    pub fn tracked_locks(&self) -> usize {
        self.interner.lock().locks.len()
    }

    /// Number of lock and context descriptors currently held for resolution
    pub fn descriptor_counts(&self) -> (usize, usize) {
        let interner = self.interner.lock();
        (interner.storage.lock_count(), interner.storage.context_count())
    }

    /// Drop identity entries and descriptors of lock objects that no longer exist
    pub fn purge(&self) -> usize {
        self.interner.lock().purge()
    }

    /// Flush the sink, if any
    pub fn flush(&self) -> Result<()> {
        match &self.sink {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl ContextReader for EventEmitter {
    fn read_lock(&self, id: LockId) -> Result<Lock, ContextError> {
        self.interner.lock().storage.read_lock(id)
    }

    fn read_context(&self, id: ContextId) -> Result<LockingContext, ContextError> {
        self.interner.lock().storage.read_context(id)
    }
}

// Global emitter used by monitors that were not given one explicitly
lazy_static::lazy_static! {
    static ref GLOBAL_EMITTER: RwLock<Option<Arc<EventEmitter>>> = RwLock::new(None);
}

/// Install `emitter` as the global emitter, replacing any previous one
pub fn init_emitter(emitter: EventEmitter) -> Arc<EventEmitter> {
    let emitter = Arc::new(emitter);
    *GLOBAL_EMITTER.write() = Some(Arc::clone(&emitter));
    emitter
}

/// The global emitter, if capture has been started
pub fn global_emitter() -> Option<Arc<EventEmitter>> {
    GLOBAL_EMITTER.read().clone()
}

/// Record an acquire on the global emitter; a no-op before capture starts
pub fn on_monitor_enter<T: Any + Send + Sync>(
    monitor: &Arc<T>,
    lock_reference: &str,
    method: &str,
) -> Option<LockEvent> {
    let emitter = global_emitter()?;
    Some(emitter.on_monitor_enter(monitor, lock_reference, method))
}

/// Record a release on the global emitter; a no-op before capture starts
pub fn on_monitor_exit<T: Any + Send + Sync>(
    monitor: &Arc<T>,
    lock_reference: &str,
    method: &str,
) -> Option<LockEvent> {
    let emitter = global_emitter()?;
    Some(emitter.on_monitor_exit(monitor, lock_reference, method))
}
