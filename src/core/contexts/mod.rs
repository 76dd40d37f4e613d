//! Lock and context descriptors by id
//!
//! The capture side only stores integer ids in events. The descriptors
//! behind those ids are written through a [`ContextWriter`] and resolved
//! later, usually offline, through a [`ContextReader`].

mod memory;

pub use memory::ContextMemoryStorage;

use crate::core::types::{ContextId, Lock, LockId, LockingContext};
use thiserror::Error;

/// Errors returned when resolving or restoring descriptors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("no lock has been assigned id {0}")]
    UnknownLock(LockId),

    #[error("no locking context has been assigned id {0}")]
    UnknownContext(ContextId),

    #[error("lock id {0} is already bound to a different descriptor")]
    ConflictingLock(LockId),

    #[error("context id {0} is already bound to a different descriptor")]
    ConflictingContext(ContextId),
}

/// Read side of the descriptor store
///
/// Both lookups are pure: asking twice for the same id yields equal results.
pub trait ContextReader {
    fn read_lock(&self, id: LockId) -> Result<Lock, ContextError>;
    fn read_context(&self, id: ContextId) -> Result<LockingContext, ContextError>;
}

/// Write side of the descriptor store, used while capturing
pub trait ContextWriter {
    /// Store a new lock descriptor and return the id assigned to it
    fn write_lock(&mut self, class_name: &str) -> LockId;

    /// Store a new locking context and return the id assigned to it
    fn write_context(&mut self, thread_name: &str, lock_reference: &str, method: &str)
    -> ContextId;
}
