//! # Thread Arena
//!
//! Every thread record, keyed by id. Queues refer to records by id only.

use super::Thread;
use crate::ThreadId;
use alloc::collections::BTreeMap;

/// Owner of all thread records
#[derive(Debug, Default)]
pub struct ThreadArena {
    threads: BTreeMap<ThreadId, Thread>,
}

impl ThreadArena {
    /// Create an empty arena
    pub const fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
        }
    }

    /// Take ownership of a record
    pub fn insert(&mut self, thread: Thread) {
        let id = thread.id;
        let previous = self.threads.insert(id, thread);
        assert!(previous.is_none(), "thread {} registered twice", id);
    }

    /// Give up a record
    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        self.threads.remove(&id)
    }

    /// Whether `id` is still in the arena
    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains_key(&id)
    }

    /// Look up a record if it exists
    pub fn find(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    /// Get a record that must exist
    pub fn get(&self, id: ThreadId) -> &Thread {
        match self.threads.get(&id) {
            Some(thread) => thread,
            None => panic!("thread {} is not in the arena", id),
        }
    }

    /// Get a record that must exist, mutably
    pub fn get_mut(&mut self, id: ThreadId) -> &mut Thread {
        match self.threads.get_mut(&id) {
            Some(thread) => thread,
            None => panic!("thread {} is not in the arena", id),
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// All records
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }
}
