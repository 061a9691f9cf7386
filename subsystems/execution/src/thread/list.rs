//! # Intrusive Thread Lists
//!
//! Lists whose links live inside the thread records, expressed as ids into
//! the [`ThreadArena`]. A thread carries one link pair per [`LinkKind`], so it
//! can sit in the all-threads list, one queue and one donor list at once.

use super::registry::ThreadArena;
use crate::ThreadId;
use alloc::vec::Vec;

/// Which link pair of a thread a list threads through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Global enumeration
    All = 0,
    /// Ready list, a ready bucket, or the sleep list
    Queue = 1,
    /// A lock holder's list of donors
    Donor = 2,
}

/// One prev/next pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub(crate) prev: Option<ThreadId>,
    pub(crate) next: Option<ThreadId>,
}

/// Link pairs of one thread, indexed by [`LinkKind`]
pub type Links = [Link; 3];

/// Doubly linked list of threads
#[derive(Debug, Clone)]
pub struct ThreadList {
    kind: LinkKind,
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
    len: usize,
}

impl ThreadList {
    /// Create an empty list threading through `kind` links
    pub const fn new(kind: LinkKind) -> Self {
        Self {
            kind,
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First member
    pub fn front(&self) -> Option<ThreadId> {
        self.head
    }

    fn link(&self, arena: &ThreadArena, id: ThreadId) -> Link {
        arena.get(id).links[self.kind as usize]
    }

    fn link_mut<'a>(&self, arena: &'a mut ThreadArena, id: ThreadId) -> &'a mut Link {
        &mut arena.get_mut(id).links[self.kind as usize]
    }

    /// Whether `id` is a member. O(1).
    pub fn contains(&self, arena: &ThreadArena, id: ThreadId) -> bool {
        self.head == Some(id) || (arena.contains(id) && self.link(arena, id).prev.is_some())
    }

    /// Append `id`
    pub fn push_back(&mut self, arena: &mut ThreadArena, id: ThreadId) {
        self.insert_before(arena, None, id);
    }

    /// Insert `id` before `at`, or at the back if `at` is `None`
    fn insert_before(&mut self, arena: &mut ThreadArena, at: Option<ThreadId>, id: ThreadId) {
        debug_assert_eq!(self.link(arena, id), Link::default(), "thread {} is already linked", id);
        let prev = match at {
            Some(at) => self.link(arena, at).prev,
            None => self.tail,
        };
        *self.link_mut(arena, id) = Link { prev, next: at };
        match prev {
            Some(p) => self.link_mut(arena, p).next = Some(id),
            None => self.head = Some(id),
        }
        match at {
            Some(a) => self.link_mut(arena, a).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
    }

    /// Insert `id` before the first member for which `goes_after` holds.
    ///
    /// With `goes_after(e)` meaning "`e` ranks strictly below `id`", members
    /// that rank equal to `id` stay in front of it, so insertion is stable.
    pub fn insert_ordered<F>(&mut self, arena: &mut ThreadArena, id: ThreadId, goes_after: F)
    where
        F: Fn(&ThreadArena, ThreadId) -> bool,
    {
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            if goes_after(arena, cur) {
                break;
            }
            cursor = self.link(arena, cur).next;
        }
        self.insert_before(arena, cursor, id);
    }

    /// Unlink `id`, which must be a member
    pub fn remove(&mut self, arena: &mut ThreadArena, id: ThreadId) {
        let Link { prev, next } = self.link(arena, id);
        match prev {
            Some(p) => self.link_mut(arena, p).next = next,
            None => {
                assert_eq!(self.head, Some(id), "thread {} is not on this list", id);
                self.head = next;
            }
        }
        match next {
            Some(n) => self.link_mut(arena, n).prev = prev,
            None => self.tail = prev,
        }
        *self.link_mut(arena, id) = Link::default();
        self.len -= 1;
    }

    /// Unlink and return the first member
    pub fn pop_front(&mut self, arena: &mut ThreadArena) -> Option<ThreadId> {
        let id = self.head?;
        self.remove(arena, id);
        Some(id)
    }

    /// Iterate over members front to back
    pub fn iter<'a>(&self, arena: &'a ThreadArena) -> Iter<'a> {
        Iter {
            arena,
            kind: self.kind,
            cursor: self.head,
        }
    }

    /// Members front to back, detached from the arena borrow
    pub fn to_vec(&self, arena: &ThreadArena) -> Vec<ThreadId> {
        self.iter(arena).collect()
    }
}

/// Front-to-back iterator over a [`ThreadList`]
pub struct Iter<'a> {
    arena: &'a ThreadArena,
    kind: LinkKind,
    cursor: Option<ThreadId>,
}

impl Iterator for Iter<'_> {
    type Item = ThreadId;

    fn next(&mut self) -> Option<ThreadId> {
        let id = self.cursor?;
        self.cursor = self.arena.get(id).links[self.kind as usize].next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Thread;

    fn arena_with(ids: &[u32]) -> ThreadArena {
        let mut arena = ThreadArena::new();
        for &id in ids {
            arena.insert(Thread::detached(ThreadId::new(id), "t"));
        }
        arena
    }

    fn ids(raw: &[u32]) -> Vec<ThreadId> {
        raw.iter().map(|&r| ThreadId::new(r)).collect()
    }

    #[test]
    fn test_push_remove() {
        let mut arena = arena_with(&[1, 2, 3]);
        let mut list = ThreadList::new(LinkKind::Queue);
        for id in ids(&[1, 2, 3]) {
            list.push_back(&mut arena, id);
        }
        assert_eq!(list.to_vec(&arena), ids(&[1, 2, 3]));

        list.remove(&mut arena, ThreadId::new(2));
        assert_eq!(list.to_vec(&arena), ids(&[1, 3]));
        assert!(!list.contains(&arena, ThreadId::new(2)));
        assert!(list.contains(&arena, ThreadId::new(3)));

        assert_eq!(list.pop_front(&mut arena), Some(ThreadId::new(1)));
        assert_eq!(list.pop_front(&mut arena), Some(ThreadId::new(3)));
        assert_eq!(list.pop_front(&mut arena), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_insert_ordered_is_stable() {
        let mut arena = arena_with(&[1, 2, 3, 4]);
        let key = |id: ThreadId| match id.as_u32() {
            1 => 5,
            2 => 7,
            3 => 5,
            _ => 9,
        };
        let mut list = ThreadList::new(LinkKind::Queue);
        for id in ids(&[1, 2, 3, 4]) {
            list.insert_ordered(&mut arena, id, |_, e| key(e) < key(id));
        }
        assert_eq!(list.to_vec(&arena), ids(&[4, 2, 1, 3]));
    }

    #[test]
    fn test_independent_link_kinds() {
        let mut arena = arena_with(&[1, 2]);
        let mut all = ThreadList::new(LinkKind::All);
        let mut queue = ThreadList::new(LinkKind::Queue);
        all.push_back(&mut arena, ThreadId::new(1));
        all.push_back(&mut arena, ThreadId::new(2));
        queue.push_back(&mut arena, ThreadId::new(2));
        queue.push_back(&mut arena, ThreadId::new(1));
        assert_eq!(all.to_vec(&arena), ids(&[1, 2]));
        assert_eq!(queue.to_vec(&arena), ids(&[2, 1]));
    }
}
