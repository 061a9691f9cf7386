//! # Lock
//!
//! A binary semaphore with an owner. Under strict priority scheduling a
//! thread that blocks on a held lock donates its priority to the holder.

use super::semaphore::Semaphore;
use crate::scheduler::Scheduler;
use crate::thread::BlockReason;
use crate::ThreadId;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Identity of a lock, as recorded in donation links
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(u64);

impl LockId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Non-recursive mutual-exclusion lock
#[derive(Debug)]
pub struct Lock {
    id: LockId,
    holder: Mutex<Option<ThreadId>>,
    sema: Semaphore,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    /// Create an unheld lock
    pub fn new() -> Self {
        Self {
            id: LockId::next(),
            holder: Mutex::new(None),
            sema: Semaphore::new(1),
        }
    }

    /// This lock's identity
    pub fn id(&self) -> LockId {
        self.id
    }

    /// Thread holding the lock
    pub fn holder(&self) -> Option<ThreadId> {
        *self.holder.lock()
    }

    /// Whether the running thread holds the lock
    pub fn held_by_current(&self, sched: &Scheduler) -> bool {
        self.holder() == Some(sched.current())
    }

    /// Acquire, blocking until the lock is free.
    ///
    /// # Panics
    ///
    /// If the running thread already holds the lock.
    pub fn acquire(&self, sched: &Scheduler) {
        let mut cs = sched.enter();
        let me = cs.current();
        let holder = *self.holder.lock();
        if holder == Some(me) {
            panic!("lock re-acquired by its holder (thread {})", me);
        }
        if let Some(holder) = holder {
            cs.donate(me, holder, self.id);
        }
        let mut cs = self.sema.down_as(cs, BlockReason::Lock(self.id));
        *self.holder.lock() = Some(me);
        cs.lock_granted(me);
    }

    /// Acquire without blocking
    pub fn try_acquire(&self, sched: &Scheduler) -> bool {
        let cs = sched.enter();
        let me = cs.current();
        let mut holder = self.holder.lock();
        if holder.is_some() || !self.sema.try_down_in(&cs) {
            return false;
        }
        *holder = Some(me);
        true
    }

    /// Release the lock. The highest-priority waiter gets it next, and the
    /// caller yields if that waiter outranks it.
    ///
    /// # Panics
    ///
    /// If the running thread does not hold the lock.
    pub fn release(&self, sched: &Scheduler) {
        {
            let mut cs = sched.enter();
            let me = cs.current();
            let mut holder = self.holder.lock();
            if *holder != Some(me) {
                panic!("lock released by thread {} which does not hold it", me);
            }
            cs.withdraw_donations(me, self.id);
            let next = self.sema.up_in(&mut cs);
            *holder = next;
            drop(holder);

            if let Some(next) = next {
                cs.lock_granted(next);
                for waiter in self.sema.waiters() {
                    cs.donate(waiter, next, self.id);
                }
            }
        }
        sched.yield_if_outranked();
    }

    /// Acquire and release on drop
    pub fn lock<'a>(&'a self, sched: &'a Scheduler) -> LockGuard<'a> {
        self.acquire(sched);
        LockGuard { lock: self, sched }
    }
}

/// Holds a [`Lock`] until dropped
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a Lock,
    sched: &'a Scheduler,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.sched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Priority, SchedulerConfig, ThreadOptions};
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use corvid_hal::host::HostPlatform;

    fn boot(config: SchedulerConfig) -> Arc<Scheduler> {
        let sched = Scheduler::boot(HostPlatform::new(), config);
        sched.start().unwrap();
        sched
    }

    #[test]
    fn test_acquire_release() {
        let sched = boot(SchedulerConfig::strict());
        let lock = Lock::new();
        lock.acquire(&sched);
        assert!(lock.held_by_current(&sched));
        assert!(!lock.try_acquire(&sched));
        lock.release(&sched);
        assert_eq!(lock.holder(), None);
        assert!(lock.try_acquire(&sched));
        lock.release(&sched);
        {
            let _guard = lock.lock(&sched);
            assert!(lock.held_by_current(&sched));
        }
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn test_donation_raises_holder() {
        let sched = boot(SchedulerConfig::strict());
        let lock = Arc::new(Lock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        lock.acquire(&sched);

        for (name, priority) in [("first", 32), ("second", 33)] {
            let (l, o, s) = (lock.clone(), order.clone(), sched.clone());
            sched
                .spawn(ThreadOptions::new(name).priority(priority), move || {
                    l.acquire(&s);
                    o.lock().push(name);
                    l.release(&s);
                })
                .unwrap();
            assert_eq!(sched.get_priority(), Priority::new(priority as u8));
        }

        lock.release(&sched);
        assert_eq!(*order.lock(), vec!["second", "first"]);
        assert_eq!(sched.get_priority(), Priority::DEFAULT);
    }

    #[test]
    fn test_nested_donation() {
        // main holds a; medium holds b and waits on a; high waits on b.
        let sched = boot(SchedulerConfig::strict());
        let a = Arc::new(Lock::new());
        let b = Arc::new(Lock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        a.acquire(&sched);

        let (la, lb, o, s) = (a.clone(), b.clone(), order.clone(), sched.clone());
        sched
            .spawn(ThreadOptions::new("medium").priority(32), move || {
                lb.acquire(&s);
                la.acquire(&s);
                o.lock().push("medium");
                la.release(&s);
                lb.release(&s);
            })
            .unwrap();
        assert_eq!(sched.get_priority(), Priority::new(32));

        let (lb, o, s) = (b.clone(), order.clone(), sched.clone());
        sched
            .spawn(ThreadOptions::new("high").priority(40), move || {
                lb.acquire(&s);
                o.lock().push("high");
                lb.release(&s);
            })
            .unwrap();
        assert_eq!(sched.get_priority(), Priority::new(40));

        a.release(&sched);
        assert_eq!(*order.lock(), vec!["medium", "high"]);
        assert_eq!(sched.get_priority(), Priority::DEFAULT);
    }

    #[test]
    fn test_feedback_mode_does_not_donate() {
        let sched = boot(SchedulerConfig::feedback());
        let lock = Arc::new(Lock::new());
        lock.acquire(&sched);
        let (l, s) = (lock.clone(), sched.clone());
        sched
            .spawn(ThreadOptions::new("waiter"), move || {
                l.acquire(&s);
                l.release(&s);
            })
            .unwrap();
        // Feedback priorities start at PRI_MAX; let the waiter block.
        sched.yield_now();
        assert_eq!(lock.sema.waiters().len(), 1);
        assert_eq!(sched.get_priority(), Priority::DEFAULT);
        lock.release(&sched);
    }

    #[test]
    #[should_panic(expected = "lock re-acquired by its holder")]
    fn test_recursive_acquire_is_fatal() {
        let sched = boot(SchedulerConfig::strict());
        let lock = Lock::new();
        lock.acquire(&sched);
        lock.acquire(&sched);
    }

    #[test]
    #[should_panic(expected = "does not hold it")]
    fn test_release_by_non_holder_is_fatal() {
        let sched = boot(SchedulerConfig::strict());
        Lock::new().release(&sched);
    }
}
