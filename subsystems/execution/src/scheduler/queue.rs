//! # Scheduler Run Queues
//!
//! The two ready structures and the sleep list.

use super::priority::PRI_LEVELS;
use super::traits::{Rank, RunQueue};
use crate::thread::{LinkKind, ThreadArena, ThreadList};
use crate::ThreadId;
use alloc::vec::Vec;

/// Where a thread is queued, stored in its record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSlot {
    /// On the ready structure, at this bucket (0 for the sorted list)
    Ready(usize),
    /// On the sleep list
    Sleep,
}

/// Single ready list sorted by descending rank, FIFO among equals
#[derive(Debug)]
pub struct PriorityQueue {
    list: ThreadList,
}

impl PriorityQueue {
    /// Create a new priority queue
    pub const fn new() -> Self {
        Self {
            list: ThreadList::new(LinkKind::Queue),
        }
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQueue for PriorityQueue {
    fn enqueue(&mut self, arena: &mut ThreadArena, id: ThreadId, rank: Rank<'_>) {
        let mine = rank(arena, id);
        self.list.insert_ordered(arena, id, |a, e| rank(a, e) < mine);
        arena.get_mut(id).queue = Some(QueueSlot::Ready(0));
    }

    fn dequeue(&mut self, arena: &mut ThreadArena) -> Option<ThreadId> {
        let id = self.list.pop_front(arena)?;
        arena.get_mut(id).queue = None;
        Some(id)
    }

    fn peek(&self) -> Option<ThreadId> {
        self.list.front()
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn reorder(&mut self, arena: &mut ThreadArena, rank: Rank<'_>) {
        // Reinserting in current order keeps equal ranks in FIFO order.
        let members = self.list.to_vec(arena);
        for &id in &members {
            self.list.remove(arena, id);
        }
        for id in members {
            self.enqueue(arena, id, rank);
        }
    }

    fn to_vec(&self, arena: &ThreadArena) -> Vec<ThreadId> {
        self.list.to_vec(arena)
    }
}

/// Multi-level feedback queue: one FIFO per priority level
#[derive(Debug)]
pub struct MultilevelQueue {
    /// Queues by priority level, lowest first
    levels: Vec<ThreadList>,
    len: usize,
}

impl MultilevelQueue {
    /// Create a queue with one level per priority
    pub fn new() -> Self {
        Self {
            levels: (0..PRI_LEVELS).map(|_| ThreadList::new(LinkKind::Queue)).collect(),
            len: 0,
        }
    }

    fn level_of(arena: &ThreadArena, id: ThreadId) -> usize {
        match arena.get(id).queue {
            Some(QueueSlot::Ready(level)) => level,
            other => panic!("thread {} is not ready-queued ({:?})", id, other),
        }
    }

    fn unlink(&mut self, arena: &mut ThreadArena, id: ThreadId) {
        let level = Self::level_of(arena, id);
        self.levels[level].remove(arena, id);
        arena.get_mut(id).queue = None;
        self.len -= 1;
    }
}

impl Default for MultilevelQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQueue for MultilevelQueue {
    fn enqueue(&mut self, arena: &mut ThreadArena, id: ThreadId, rank: Rank<'_>) {
        let level = rank(arena, id).level();
        self.levels[level].push_back(arena, id);
        arena.get_mut(id).queue = Some(QueueSlot::Ready(level));
        self.len += 1;
    }

    fn dequeue(&mut self, arena: &mut ThreadArena) -> Option<ThreadId> {
        let id = self.levels.iter_mut().rev().find_map(|level| level.pop_front(arena))?;
        arena.get_mut(id).queue = None;
        self.len -= 1;
        Some(id)
    }

    fn peek(&self) -> Option<ThreadId> {
        self.levels.iter().rev().find_map(|level| level.front())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn reorder(&mut self, arena: &mut ThreadArena, rank: Rank<'_>) {
        let mut moved = Vec::new();
        for (level, list) in self.levels.iter().enumerate() {
            moved.extend(
                list.iter(arena)
                    .filter(|&id| rank(arena, id).level() != level),
            );
        }
        for id in moved {
            self.unlink(arena, id);
            self.enqueue(arena, id, rank);
        }
    }

    fn to_vec(&self, arena: &ThreadArena) -> Vec<ThreadId> {
        self.levels.iter().rev().flat_map(|level| level.to_vec(arena)).collect()
    }
}

/// Sleeping threads sorted by wake tick, FIFO among equal ticks
#[derive(Debug)]
pub struct SleepQueue {
    list: ThreadList,
}

impl SleepQueue {
    /// Create an empty sleep list
    pub const fn new() -> Self {
        Self {
            list: ThreadList::new(LinkKind::Queue),
        }
    }

    /// Add a thread whose `wake_at` is set
    pub fn insert(&mut self, arena: &mut ThreadArena, id: ThreadId) {
        let wake_at = arena.get(id).wake_at;
        self.list.insert_ordered(arena, id, |a, e| a.get(e).wake_at > wake_at);
        arena.get_mut(id).queue = Some(QueueSlot::Sleep);
    }

    /// Take the earliest sleeper if it is due at `now`
    pub fn pop_due(&mut self, arena: &mut ThreadArena, now: u64) -> Option<ThreadId> {
        let head = self.list.front()?;
        if arena.get(head).wake_at > now {
            return None;
        }
        self.list.pop_front(arena);
        arena.get_mut(head).queue = None;
        Some(head)
    }

    /// Number of sleepers
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Sleepers in wake order
    pub fn to_vec(&self, arena: &ThreadArena) -> Vec<ThreadId> {
        self.list.to_vec(arena)
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Priority;
    use crate::thread::Thread;

    fn arena(priorities: &[(u32, u8)]) -> ThreadArena {
        let mut arena = ThreadArena::new();
        for &(id, p) in priorities {
            let mut t = Thread::detached(ThreadId::new(id), "t");
            t.priority = Priority::new(p);
            arena.insert(t);
        }
        arena
    }

    fn base(arena: &ThreadArena, id: ThreadId) -> Priority {
        arena.get(id).priority
    }

    fn tid(raw: u32) -> ThreadId {
        ThreadId::new(raw)
    }

    #[test]
    fn test_priority_queue_order() {
        let mut arena = arena(&[(1, 5), (2, 7), (3, 3), (4, 7)]);
        let mut queue = PriorityQueue::new();
        for id in 1..=4 {
            queue.enqueue(&mut arena, tid(id), &base);
        }
        assert_eq!(queue.peek(), Some(tid(2)));
        let order: Vec<_> = core::iter::from_fn(|| queue.dequeue(&mut arena)).collect();
        assert_eq!(order, vec![tid(2), tid(4), tid(1), tid(3)]);
        assert!(arena.get(tid(1)).queue.is_none());
    }

    #[test]
    fn test_priority_queue_reorder() {
        let mut arena = arena(&[(1, 5), (2, 7), (3, 3)]);
        let mut queue = PriorityQueue::new();
        for id in 1..=3 {
            queue.enqueue(&mut arena, tid(id), &base);
        }
        arena.get_mut(tid(3)).priority = Priority::new(10);
        queue.reorder(&mut arena, &base);
        assert_eq!(queue.to_vec(&arena), vec![tid(3), tid(2), tid(1)]);
    }

    #[test]
    fn test_multilevel_fifo_within_level() {
        let mut arena = arena(&[(1, 31), (2, 40), (3, 31), (4, 0)]);
        let mut queue = MultilevelQueue::new();
        for id in 1..=4 {
            queue.enqueue(&mut arena, tid(id), &base);
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.levels[31].to_vec(&arena), vec![tid(1), tid(3)]);
        assert_eq!(queue.to_vec(&arena), vec![tid(2), tid(1), tid(3), tid(4)]);

        queue.unlink(&mut arena, tid(1));
        assert_eq!(queue.dequeue(&mut arena), Some(tid(2)));
        assert_eq!(queue.dequeue(&mut arena), Some(tid(3)));
        assert_eq!(queue.dequeue(&mut arena), Some(tid(4)));
        assert_eq!(queue.dequeue(&mut arena), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_multilevel_rebucket() {
        let mut arena = arena(&[(1, 31), (2, 31)]);
        let mut queue = MultilevelQueue::new();
        queue.enqueue(&mut arena, tid(1), &base);
        queue.enqueue(&mut arena, tid(2), &base);
        arena.get_mut(tid(1)).priority = Priority::new(20);
        queue.reorder(&mut arena, &base);
        assert_eq!(queue.levels[31].to_vec(&arena), vec![tid(2)]);
        assert_eq!(queue.levels[20].to_vec(&arena), vec![tid(1)]);
        assert_eq!(arena.get(tid(1)).queue, Some(QueueSlot::Ready(20)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_sleep_queue_wakes_in_order() {
        let mut arena = arena(&[(1, 31), (2, 31), (3, 31)]);
        arena.get_mut(tid(1)).wake_at = 30;
        arena.get_mut(tid(2)).wake_at = 10;
        arena.get_mut(tid(3)).wake_at = 30;
        let mut sleep = SleepQueue::new();
        for id in 1..=3 {
            sleep.insert(&mut arena, tid(id));
        }
        assert_eq!(sleep.to_vec(&arena), vec![tid(2), tid(1), tid(3)]);
        assert_eq!(sleep.pop_due(&mut arena, 9), None);
        assert_eq!(sleep.pop_due(&mut arena, 10), Some(tid(2)));
        assert_eq!(sleep.pop_due(&mut arena, 29), None);
        assert_eq!(sleep.pop_due(&mut arena, 30), Some(tid(1)));
        assert_eq!(sleep.pop_due(&mut arena, 30), Some(tid(3)));
        assert!(sleep.is_empty());
    }
}
