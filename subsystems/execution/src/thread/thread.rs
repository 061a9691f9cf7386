//! # Thread Structure
//!
//! Core thread data structure. Records live in the scheduler's
//! [`ThreadArena`](super::ThreadArena) and are only touched inside a
//! critical section.

use super::list::{LinkKind, Links, ThreadList};
use super::{BlockReason, ThreadState};
use crate::fixed_point::Fixed;
use crate::scheduler::{Nice, Priority, QueueSlot};
use crate::sync::LockId;
use crate::{ProcessId, ThreadId};
use alloc::string::String;
use corvid_hal::{AddressSpaceId, Mmu, PhysAddr, VirtAddr, PGSIZE, PHYS_BASE};

/// Longest thread name kept, in bytes
pub const THREAD_NAME_MAX: usize = 15;

/// Thread flags
pub mod flags {
    use bitflags::bitflags;

    bitflags! {
        /// Thread flags
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct ThreadFlags: u32 {
            /// Thread is the idle thread
            const IDLE = 1 << 0;
            /// Thread is the boot thread, running on the boot stack
            const INIT = 1 << 1;
        }
    }
}

pub use flags::ThreadFlags;

/// Thread structure
#[derive(Debug)]
pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) name: String,
    pub(crate) state: ThreadState,
    pub(crate) block_reason: Option<BlockReason>,
    /// Base priority; donation never writes here
    pub(crate) priority: Priority,
    pub(crate) nice: Nice,
    pub(crate) recent_cpu: Fixed,
    /// Tick at which a sleeping thread becomes ready
    pub(crate) wake_at: u64,
    pub(crate) process: Option<ProcessId>,
    pub(crate) address_space: Option<AddressSpaceId>,
    pub(crate) flags: ThreadFlags,
    pub(crate) stack: KernelStack,
    pub(crate) links: Links,
    /// Which queue `links[Queue]` threads through
    pub(crate) queue: Option<QueueSlot>,
    /// Threads blocked on locks this thread holds
    pub(crate) donors: ThreadList,
    /// Holder whose donor list this thread is on
    pub(crate) donating_to: Option<ThreadId>,
    /// Lock this thread is waiting to acquire
    pub(crate) waiting_for: Option<LockId>,
}

impl Thread {
    /// Create a blocked thread record with default accounting
    pub fn new(id: ThreadId, name: &str, priority: Priority, stack: KernelStack) -> Self {
        Self {
            id,
            name: truncate_name(name),
            state: ThreadState::Blocked,
            block_reason: Some(BlockReason::Creating),
            priority,
            nice: Nice::DEFAULT,
            recent_cpu: Fixed::ZERO,
            wake_at: 0,
            process: None,
            address_space: None,
            flags: ThreadFlags::empty(),
            stack,
            links: Links::default(),
            queue: None,
            donors: ThreadList::new(LinkKind::Donor),
            donating_to: None,
            waiting_for: None,
        }
    }

    /// A record that owns no stack page
    pub fn detached(id: ThreadId, name: &str) -> Self {
        Self::new(id, name, Priority::DEFAULT, KernelStack::adopted())
    }

    /// Get thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current state
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Base priority
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Niceness
    pub fn nice(&self) -> Nice {
        self.nice
    }

    /// Recent CPU estimate
    pub fn recent_cpu(&self) -> Fixed {
        self.recent_cpu
    }

    /// Process this thread runs on behalf of
    pub fn process(&self) -> Option<ProcessId> {
        self.process
    }

    /// Get flags
    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    /// Check if this is the idle thread
    pub fn is_idle(&self) -> bool {
        self.flags.contains(ThreadFlags::IDLE)
    }

    /// Whether the thread runs user code
    pub fn is_user(&self) -> bool {
        self.address_space.is_some()
    }
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(THREAD_NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

/// Kernel stack: one page, exclusively owned by its thread
#[derive(Debug)]
pub struct KernelStack {
    /// Backing page; `None` for the boot stack
    page: Option<PhysAddr>,
}

impl KernelStack {
    /// Allocate a kernel stack page
    pub fn allocate(mmu: &dyn Mmu) -> Option<Self> {
        mmu.alloc_page().map(|page| Self { page: Some(page) })
    }

    /// The stack we booted on, which the scheduler does not own
    pub const fn adopted() -> Self {
        Self { page: None }
    }

    /// Get stack top (highest address), as mapped in kernel space
    pub fn top(&self) -> VirtAddr {
        match self.page {
            Some(page) => VirtAddr::new(PHYS_BASE + page.as_u64() + PGSIZE),
            None => VirtAddr::new(0),
        }
    }

    /// Give the page back
    pub fn release(self, mmu: &dyn Mmu) {
        if let Some(page) = self.page {
            mmu.free_page(page);
        }
    }
}
