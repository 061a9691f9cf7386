//! # Scheduler Traits
//!
//! The seam between the scheduler core and its ready structures.

use super::Priority;
use crate::thread::ThreadArena;
use crate::ThreadId;
use alloc::vec::Vec;

/// Ranks a thread for ready ordering
pub type Rank<'a> = &'a dyn Fn(&ThreadArena, ThreadId) -> Priority;

/// Ready structure
///
/// Implementations keep their membership in the thread records (intrusive
/// links plus [`QueueSlot`](crate::scheduler::QueueSlot)), so every
/// operation takes the arena.
pub trait RunQueue: Send {
    /// Add a thread
    fn enqueue(&mut self, arena: &mut ThreadArena, id: ThreadId, rank: Rank<'_>);

    /// Take the thread that should run next
    fn dequeue(&mut self, arena: &mut ThreadArena) -> Option<ThreadId>;

    /// The thread [`RunQueue::dequeue`] would return
    fn peek(&self) -> Option<ThreadId>;

    /// Number of queued threads
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restore ordering after ranks changed
    fn reorder(&mut self, arena: &mut ThreadArena, rank: Rank<'_>);

    /// Queued threads in dispatch order
    fn to_vec(&self, arena: &ThreadArena) -> Vec<ThreadId>;
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Ticks spent in the idle thread
    pub idle_ticks: u64,
    /// Ticks spent in kernel threads
    pub kernel_ticks: u64,
    /// Ticks spent in user threads
    pub user_ticks: u64,
    /// Total number of context switches
    pub context_switches: u64,
    /// Voluntary yields
    pub voluntary_yields: u64,
    /// Preemptions requested at tick time
    pub preemptions: u64,
    /// Threads currently ready
    pub ready_threads: usize,
    /// Threads currently sleeping
    pub sleeping_threads: usize,
    /// Threads in the arena, including ones waiting to be reclaimed
    pub total_threads: usize,
}
