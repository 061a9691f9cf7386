//! # Thread Management
//!
//! Thread records, their lifecycle states, and the arena and intrusive lists
//! the scheduler keeps them in.

pub mod list;
pub mod registry;
pub mod states;
pub mod thread;

pub use list::{LinkKind, ThreadList};
pub use registry::ThreadArena;
pub use states::{BlockReason, ThreadState};
pub use thread::{KernelStack, Thread, ThreadFlags, THREAD_NAME_MAX};

use crate::fixed_point::Fixed;
use crate::scheduler::{Nice, Priority};
use crate::{ProcessId, ThreadId};
use alloc::string::String;

/// Snapshot of one thread, for introspection and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// Thread ID
    pub id: ThreadId,
    /// Thread name
    pub name: String,
    /// Lifecycle state
    pub state: ThreadState,
    /// Base priority
    pub priority: Priority,
    /// Priority after donation
    pub effective_priority: Priority,
    /// Niceness
    pub nice: Nice,
    /// Recent CPU estimate
    pub recent_cpu: Fixed,
    /// Owning process
    pub process: Option<ProcessId>,
    /// Why the thread is blocked, if it is
    pub block_reason: Option<BlockReason>,
}
