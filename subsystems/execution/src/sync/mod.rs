//! # Synchronization Primitives
//!
//! Blocking primitives built on the scheduler's block/unblock contract.
//!
//! Lock ordering: a [`CriticalSection`](crate::CriticalSection) is always
//! entered before a primitive's own spin mutex, and that mutex is never held
//! across a block.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::{Lock, LockGuard, LockId};
pub use semaphore::Semaphore;
