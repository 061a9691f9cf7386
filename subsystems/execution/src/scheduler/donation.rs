//! # Priority Donation
//!
//! A thread blocked on a held lock sits on the holder's donor list. The
//! holder's effective priority is the maximum of its own and every donor's
//! effective priority, followed transitively down the lock chain.
//!
//! Donors are kept in arrival order. Nothing reads that order: every query
//! takes the maximum over the whole list, so a donor whose own priority
//! changes later is accounted for without re-sorting.

use super::Priority;
use crate::sync::LockId;
use crate::thread::{LinkKind, ThreadArena, ThreadList};
use crate::ThreadId;
use core::mem;

/// Effective priority of `id`.
///
/// Panics if the donor chain is deeper than `limit`; a well-formed lock
/// graph has no cycles, so hitting the limit means the graph is broken.
pub fn effective_priority(arena: &ThreadArena, id: ThreadId, limit: usize) -> Priority {
    walk(arena, id, 0, limit)
}

fn walk(arena: &ThreadArena, id: ThreadId, depth: usize, limit: usize) -> Priority {
    let thread = arena.get(id);
    if thread.donors.is_empty() {
        return thread.priority;
    }
    if depth >= limit {
        panic!("priority donation nested deeper than {} locks at thread {}", limit, id);
    }
    thread
        .donors
        .iter(arena)
        .map(|donor| walk(arena, donor, depth + 1, limit))
        .fold(thread.priority, Priority::max)
}

fn with_donors<R>(arena: &mut ThreadArena, holder: ThreadId, f: impl FnOnce(&mut ThreadList, &mut ThreadArena) -> R) -> R {
    let mut donors = mem::replace(&mut arena.get_mut(holder).donors, ThreadList::new(LinkKind::Donor));
    let result = f(&mut donors, arena);
    arena.get_mut(holder).donors = donors;
    result
}

/// Record that `waiter` is blocked on `lock`, held by `holder`
pub fn donate(arena: &mut ThreadArena, waiter: ThreadId, holder: ThreadId, lock: LockId, limit: usize) {
    assert_ne!(waiter, holder, "thread {} waits on a lock it holds", waiter);
    {
        let w = arena.get_mut(waiter);
        assert!(w.donating_to.is_none(), "thread {} already donates to {:?}", waiter, w.donating_to);
        w.waiting_for = Some(lock);
        w.donating_to = Some(holder);
    }
    with_donors(arena, holder, |donors, arena| donors.push_back(arena, waiter));
    // Validates the chain above the holder as well.
    effective_priority(arena, root_of(arena, holder, limit), limit);
}

/// Follow `donating_to` up to the thread that is not blocked on a lock
fn root_of(arena: &ThreadArena, mut id: ThreadId, limit: usize) -> ThreadId {
    for _ in 0..=limit {
        match arena.get(id).donating_to {
            Some(next) => id = next,
            None => return id,
        }
    }
    panic!("priority donation nested deeper than {} locks above thread {}", limit, id);
}

/// `holder` released `lock`: its waiters stop donating to it
pub fn withdraw(arena: &mut ThreadArena, holder: ThreadId, lock: LockId) {
    with_donors(arena, holder, |donors, arena| {
        for donor in donors.to_vec(arena) {
            if arena.get(donor).waiting_for == Some(lock) {
                donors.remove(arena, donor);
                arena.get_mut(donor).donating_to = None;
            }
        }
    });
}

/// `id` has been granted the lock it was waiting for
pub fn granted(arena: &mut ThreadArena, id: ThreadId) {
    let thread = arena.get_mut(id);
    debug_assert!(thread.donating_to.is_none(), "granted thread {} still donates", id);
    thread.waiting_for = None;
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn tid(raw: u32) -> ThreadId {
        ThreadId::new(raw)
    }

    fn lock(raw: u64) -> LockId {
        LockId::from_raw(raw)
    }

    #[test]
    fn test_single_donation() {
        let mut a = arena(&[(1, 10), (2, 40), (3, 20)]);
        donate(&mut a, tid(2), tid(1), lock(1), 8);
        donate(&mut a, tid(3), tid(1), lock(1), 8);
        assert_eq!(effective_priority(&a, tid(1), 8), Priority::new(40));
        assert_eq!(a.get(tid(1)).donors.to_vec(&a), vec![tid(2), tid(3)]);

        withdraw(&mut a, tid(1), lock(1));
        assert_eq!(effective_priority(&a, tid(1), 8), Priority::new(10));
        assert!(a.get(tid(2)).donating_to.is_none());
        assert_eq!(a.get(tid(2)).waiting_for, Some(lock(1)));
    }

    #[test]
    fn test_nested_donation() {
        // 3 waits on a lock held by 2, which waits on a lock held by 1.
        let mut a = arena(&[(1, 10), (2, 20), (3, 50)]);
        donate(&mut a, tid(2), tid(1), lock(1), 8);
        donate(&mut a, tid(3), tid(2), lock(2), 8);
        assert_eq!(effective_priority(&a, tid(2), 8), Priority::new(50));
        assert_eq!(effective_priority(&a, tid(1), 8), Priority::new(50));
    }

    #[test]
    fn test_withdraw_keeps_other_locks() {
        let mut a = arena(&[(1, 10), (2, 30), (3, 40)]);
        donate(&mut a, tid(2), tid(1), lock(1), 8);
        donate(&mut a, tid(3), tid(1), lock(2), 8);
        withdraw(&mut a, tid(1), lock(2));
        assert_eq!(effective_priority(&a, tid(1), 8), Priority::new(30));
    }

    #[test]
    fn test_donor_raised_after_donating() {
        let mut a = arena(&[(1, 10), (2, 30), (3, 20)]);
        donate(&mut a, tid(2), tid(1), lock(1), 8);
        donate(&mut a, tid(3), tid(1), lock(1), 8);
        assert_eq!(effective_priority(&a, tid(1), 8), Priority::new(30));

        a.get_mut(tid(3)).priority = Priority::new(45);
        assert_eq!(effective_priority(&a, tid(1), 8), Priority::new(45));
        a.get_mut(tid(2)).priority = Priority::new(1);
        assert_eq!(effective_priority(&a, tid(1), 8), Priority::new(45));
    }

    #[test]
    fn test_lower_donor_does_not_lower() {
        let mut a = arena(&[(1, 40), (2, 5)]);
        donate(&mut a, tid(2), tid(1), lock(1), 8);
        assert_eq!(effective_priority(&a, tid(1), 8), Priority::new(40));
    }

    #[test]
    #[should_panic(expected = "priority donation nested deeper")]
    fn test_depth_limit_is_fatal() {
        let mut a = arena(&[(1, 1), (2, 2), (3, 3), (4, 4)]);
        donate(&mut a, tid(2), tid(1), lock(1), 2);
        donate(&mut a, tid(3), tid(2), lock(2), 2);
        donate(&mut a, tid(4), tid(3), lock(3), 2);
    }

    #[test]
    #[should_panic(expected = "waits on a lock it holds")]
    fn test_self_wait_is_fatal() {
        let mut a = arena(&[(1, 1)]);
        donate(&mut a, tid(1), tid(1), lock(1), 8);
    }
}
