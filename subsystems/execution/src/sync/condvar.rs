//! # Condition Variable
//!
//! Each waiter parks on a semaphore of its own, so `signal` can pick which
//! waiter to wake.

use super::lock::Lock;
use super::semaphore::Semaphore;
use crate::scheduler::Scheduler;
use crate::ThreadId;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// Condition variable used together with a [`Lock`]
#[derive(Debug, Default)]
pub struct Condvar {
    waiters: Mutex<Vec<(ThreadId, Arc<Semaphore>)>>,
}

impl Condvar {
    /// Create a condition variable with no waiters
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Release `lock`, wait for a signal, then re-acquire `lock`
    pub fn wait(&self, lock: &Lock, sched: &Scheduler) {
        assert!(lock.held_by_current(sched), "condition wait without holding the lock");
        let sema = Arc::new(Semaphore::new(0));
        {
            let _cs = sched.enter();
            self.waiters.lock().push((sched.current(), sema.clone()));
        }
        lock.release(sched);
        sema.down(sched);
        lock.acquire(sched);
    }

    /// Wake the highest-priority waiter, if any
    pub fn signal(&self, lock: &Lock, sched: &Scheduler) {
        assert!(lock.held_by_current(sched), "condition signal without holding the lock");
        let picked = {
            let cs = sched.enter();
            let mut waiters = self.waiters.lock();
            let mut best: Option<(usize, crate::Priority)> = None;
            for (index, (id, _)) in waiters.iter().enumerate() {
                let priority = cs.effective_priority(*id);
                if best.map_or(true, |(_, top)| priority > top) {
                    best = Some((index, priority));
                }
            }
            best.map(|(index, _)| waiters.remove(index).1)
        };
        if let Some(sema) = picked {
            sema.up(sched);
        }
    }

    /// Wake every waiter
    pub fn broadcast(&self, lock: &Lock, sched: &Scheduler) {
        while !self.is_empty(sched) {
            self.signal(lock, sched);
        }
    }

    fn is_empty(&self, sched: &Scheduler) -> bool {
        let _cs = sched.enter();
        self.waiters.lock().is_empty()
    }

    /// Number of waiting threads
    pub fn len(&self, sched: &Scheduler) -> usize {
        let _cs = sched.enter();
        self.waiters.lock().len()
    }
}
