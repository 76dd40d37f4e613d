use crate::core::emitter::{self, EventEmitter};
use parking_lot::{Mutex as ParkingLotMutex, MutexGuard as ParkingLotMutexGuard};
use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::Arc;

/// A lock that reports its acquire/release transitions to an event emitter
///
/// The Monitor is the hand-written counterpart of instrumented code: every
/// `lock()` emits an `Acquire` event and dropping the guard emits a
/// `Release` event. Its identity is the shared allocation, so clones of a
/// monitor are the same lock while two monitors holding equal values are
/// different locks.
///
/// Events go to the emitter given at construction, or to the global one
/// installed by [`Lockcard::start`](crate::Lockcard::start).
///
/// # Example
///
/// ```rust
/// use lockcard::Monitor;
/// use std::thread;
///
/// let monitor = Monitor::named("counter", 0);
/// let other = monitor.clone();
///
/// thread::spawn(move || {
///     *other.lock() += 1;
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(*monitor.lock(), 1);
/// ```
pub struct Monitor<T> {
    inner: Arc<ParkingLotMutex<T>>,
    /// How call sites refer to this lock in locking contexts
    name: Arc<str>,
    emitter: Option<Arc<EventEmitter>>,
}

/// Guard for a Monitor, reports the release when dropped
pub struct MonitorGuard<'a, T: Send + 'static> {
    monitor: &'a Monitor<T>,
    method: String,
    guard: ParkingLotMutexGuard<'a, T>,
}

impl<T> Clone for Monitor<T> {
    fn clone(&self) -> Self {
        Monitor {
            inner: Arc::clone(&self.inner),
            name: Arc::clone(&self.name),
            emitter: self.emitter.clone(),
        }
    }
}

impl<T: Send + 'static> Monitor<T> {
    /// Create a new Monitor reporting to the global emitter
    pub fn new(value: T) -> Self {
        Self::named("this", value)
    }

    /// Create a Monitor whose call sites refer to it as `name`
    pub fn named(name: &str, value: T) -> Self {
        Monitor {
            inner: Arc::new(ParkingLotMutex::new(value)),
            name: name.into(),
            emitter: None,
        }
    }

    /// Create a Monitor reporting to a specific emitter instead of the global one
    pub fn with_emitter(emitter: Arc<EventEmitter>, name: &str, value: T) -> Self {
        Monitor {
            emitter: Some(emitter),
            ..Self::named(name, value)
        }
    }

    /// The reference name used in locking contexts
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether two monitors are the same lock
    pub fn same_lock(&self, other: &Monitor<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Acquire the lock, blocking until it is available
    ///
    /// The caller's source location becomes the method of the locking context.
    #[track_caller]
    pub fn lock(&self) -> MonitorGuard<'_, T> {
        let method = Location::caller().to_string();
        let guard = self.inner.lock();
        self.enter(&method);
        MonitorGuard {
            monitor: self,
            method,
            guard,
        }
    }

    /// Try to acquire the lock without blocking
    ///
    /// Nothing is reported when the lock is already held.
    #[track_caller]
    pub fn try_lock(&self) -> Option<MonitorGuard<'_, T>> {
        let method = Location::caller().to_string();
        let guard = self.inner.try_lock()?;
        self.enter(&method);
        Some(MonitorGuard {
            monitor: self,
            method,
            guard,
        })
    }

    fn enter(&self, method: &str) {
        match &self.emitter {
            Some(emitter) => {
                emitter.on_monitor_enter(&self.inner, &self.name, method);
            }
            None => {
                emitter::on_monitor_enter(&self.inner, &self.name, method);
            }
        }
    }

    fn exit(&self, method: &str) {
        match &self.emitter {
            Some(emitter) => {
                emitter.on_monitor_exit(&self.inner, &self.name, method);
            }
            None => {
                emitter::on_monitor_exit(&self.inner, &self.name, method);
            }
        }
    }
}

impl<T: Default + Send + 'static> Default for Monitor<T> {
    fn default() -> Monitor<T> {
        Monitor::new(Default::default())
    }
}

impl<T: Send + 'static> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.guard.deref()
    }
}

impl<T: Send + 'static> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.deref_mut()
    }
}

impl<T: Send + 'static> Drop for MonitorGuard<'_, T> {
    fn drop(&mut self) {
        // Reported while still held; the inner guard unlocks right after
        self.monitor.exit(&self.method);
    }
}
