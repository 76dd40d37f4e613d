use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread identifier type
///
/// Uniquely identifies a thread in the application.
pub type ThreadId = usize;

// Global counter for assigning unique thread IDs
static THREAD_ID_COUNTER: AtomicUsize = AtomicUsize::new(1);

// Thread-local storage for each thread's assigned ID
thread_local! {
    static THREAD_ID: ThreadId = {
        // Each thread gets a unique ID once, when this is first accessed
        THREAD_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    };
}

/// Get a unique identifier of the current thread
/// This will always return the same ID for the lifetime of the thread
pub fn get_current_thread_id() -> ThreadId {
    THREAD_ID.with(|&id| id)
}

/// Name of the current thread as it appears in locking contexts
///
/// Unnamed threads are reported as `thread-<id>`.
pub fn get_current_thread_name() -> String {
    match std::thread::current().name() {
        Some(name) => name.to_string(),
        None => format!("thread-{}", get_current_thread_id()),
    }
}

/// Lock identifier type
///
/// Assigned the first time a lock object is observed and stable for as long
/// as that object is alive.
pub type LockId = u32;

/// Locking context identifier type
pub type ContextId = u32;

/// Kind of lock transition carried by a [`LockEvent`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LockEventType {
    /// The thread acquired the lock
    Acquire,
    /// The thread released the lock
    Release,
}

impl fmt::Display for LockEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockEventType::Acquire => f.write_str("ACQUIRE"),
            LockEventType::Release => f.write_str("RELEASE"),
        }
    }
}

/// Descriptor of one synchronization object observed during this run
///
/// Two descriptors are equal when their ids are equal; the class name is
/// carried for reporting only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    id: LockId,
    class_name: Arc<str>,
}

impl Lock {
    pub fn new(id: LockId, class_name: impl Into<Arc<str>>) -> Self {
        Lock {
            id,
            class_name: class_name.into(),
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    /// Type name of the object that was locked
    pub fn class_name(&self) -> &str {
        &self.class_name
    }
}

impl PartialEq for Lock {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Lock {}

impl Hash for Lock {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock#{}({})", self.id, self.class_name)
    }
}

/// Descriptor of the call site at which a lock event happened
///
/// A context is the triple (thread name, textual lock reference, method).
/// Identical triples are interned to the same id, and equality is by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingContext {
    id: ContextId,
    thread_name: Arc<str>,
    lock_reference: Arc<str>,
    method: Arc<str>,
}

impl LockingContext {
    pub fn new(
        id: ContextId,
        thread_name: impl Into<Arc<str>>,
        lock_reference: impl Into<Arc<str>>,
        method: impl Into<Arc<str>>,
    ) -> Self {
        LockingContext {
            id,
            thread_name: thread_name.into(),
            lock_reference: lock_reference.into(),
            method: method.into(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// How the lock was referred to at the call site, e.g. `this` or a field name
    pub fn lock_reference(&self) -> &str {
        &self.lock_reference
    }

    /// Method (or source location) that performed the operation
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl PartialEq for LockingContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LockingContext {}

impl Hash for LockingContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for LockingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Context#{}({}, {}, {})",
            self.id, self.thread_name, self.lock_reference, self.method
        )
    }
}

/// One observed lock transition
///
/// Events are immutable. Equality and hashing cover the type, the lock and
/// the context, so structurally identical events are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockEvent {
    event_type: LockEventType,
    lock: Lock,
    context: LockingContext,
}

impl LockEvent {
    pub fn new(event_type: LockEventType, lock: Lock, context: LockingContext) -> Self {
        LockEvent {
            event_type,
            lock,
            context,
        }
    }

    pub fn event_type(&self) -> LockEventType {
        self.event_type
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn context(&self) -> &LockingContext {
        &self.context
    }
}

impl fmt::Display for LockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} in ctx:{}", self.event_type, self.lock, self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::sync::mpsc;
    use std::thread;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_thread_id_consistency() {
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let id1 = get_current_thread_id();
            let id2 = get_current_thread_id();
            assert_eq!(id1, id2);
            tx.send(id1).unwrap();
        });

        let thread_id = rx.recv().unwrap();
        handle.join().unwrap();
        assert_ne!(thread_id, 0);
    }

    #[test]
    fn test_unnamed_thread_name_uses_id() {
        let name = thread::spawn(get_current_thread_name).join().unwrap();
        assert!(name.starts_with("thread-"));

        let named = thread::Builder::new()
            .name("worker".to_string())
            .spawn(get_current_thread_name)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(named, "worker");
    }

    #[test]
    fn test_events_with_equal_ids_are_equal() {
        let a = LockEvent::new(
            LockEventType::Acquire,
            Lock::new(3, "Account"),
            LockingContext::new(5, "main", "this", "Bank::transfer"),
        );
        // Descriptor payloads differ, ids do not
        let b = LockEvent::new(
            LockEventType::Acquire,
            Lock::new(3, "Other"),
            LockingContext::new(5, "worker", "self.lock", "Bank::audit"),
        );

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_events_differ_by_any_field() {
        let lock = Lock::new(1, "A");
        let ctx = LockingContext::new(2, "main", "this", "f");
        let base = LockEvent::new(LockEventType::Acquire, lock.clone(), ctx.clone());

        assert_ne!(
            base,
            LockEvent::new(LockEventType::Release, lock.clone(), ctx.clone())
        );
        assert_ne!(
            base,
            LockEvent::new(LockEventType::Acquire, Lock::new(9, "A"), ctx.clone())
        );
        assert_ne!(
            base,
            LockEvent::new(
                LockEventType::Acquire,
                lock,
                LockingContext::new(7, "main", "this", "f")
            )
        );
    }

    #[test]
    fn test_display_is_deterministic() {
        let event = LockEvent::new(
            LockEventType::Release,
            Lock::new(3, "Account"),
            LockingContext::new(5, "main", "this", "Bank::transfer"),
        );
        let expected = "RELEASE:Lock#3(Account) in ctx:Context#5(main, this, Bank::transfer)";
        assert_eq!(event.to_string(), expected);
        assert_eq!(event.clone().to_string(), expected);
    }
}
