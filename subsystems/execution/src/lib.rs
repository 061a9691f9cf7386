//! # Corvid Execution Subsystem
//!
//! The execution subsystem manages:
//! - Execution units ("threads") and their lifecycle
//! - The scheduler: strict priority with donation, or multi-level feedback
//! - Context switching and deferred reclaim of dead threads
//! - Blocking synchronization: semaphores, locks, condition variables
//!
//! ## Key Principle
//!
//! Masking interrupts is the only mutual exclusion the scheduler needs on a
//! single CPU. Here that is the [`context::CriticalSection`] guard: it masks
//! interrupts and owns the scheduler state for as long as it lives, and it is
//! the only way to reach that state.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod context;
pub mod fixed_point;
pub mod scheduler;
pub mod sync;
pub mod thread;

use core::sync::atomic::{AtomicU64, Ordering};

pub use context::{CriticalSection, SwitchHook};
pub use fixed_point::Fixed;
pub use scheduler::{Nice, Priority, Scheduler, SchedulerConfig, SchedulingPolicy, ThreadOptions};
pub use sync::{Condvar, Lock, LockGuard, Semaphore};
pub use thread::{ThreadInfo, ThreadState};

/// Unique identifier for threads
///
/// Assigned by the scheduler in strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u32);

impl ThreadId {
    /// Wrap a raw id
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Name of this thread's context in the HAL switch primitive
    pub(crate) fn context_id(self) -> corvid_hal::ContextId {
        u64::from(self.0)
    }

    pub(crate) fn from_context_id(id: corvid_hal::ContextId) -> Self {
        match u32::try_from(id) {
            Ok(raw) => Self(raw),
            Err(_) => panic!("context {} does not name a thread", id),
        }
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Create a new process ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The synthetic root process
    pub const fn initial() -> Self {
        Self(0)
    }

    /// Get the raw ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Thread not found
    ThreadNotFound,
    /// Invalid state
    InvalidState,
    /// Out of resources (stack page or context)
    OutOfResources,
    /// Invalid argument
    InvalidArgument,
}

impl core::fmt::Display for ExecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Self::ThreadNotFound => "thread not found",
            Self::InvalidState => "invalid thread state",
            Self::OutOfResources => "out of resources",
            Self::InvalidArgument => "invalid argument",
        };
        f.write_str(msg)
    }
}

impl From<corvid_hal::HalError> for ExecError {
    fn from(err: corvid_hal::HalError) -> Self {
        match err {
            corvid_hal::HalError::OutOfMemory => Self::OutOfResources,
            corvid_hal::HalError::InvalidParameter | corvid_hal::HalError::InvalidAddress => Self::InvalidArgument,
            corvid_hal::HalError::NotSupported | corvid_hal::HalError::AlreadyExists => Self::InvalidState,
        }
    }
}
