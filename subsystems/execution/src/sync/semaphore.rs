//! # Counting Semaphore
//!
//! `up` with waiters hands the unit straight to the woken thread instead of
//! incrementing the counter, so a woken `down` never re-checks.

use crate::context::CriticalSection;
use crate::scheduler::Scheduler;
use crate::thread::BlockReason;
use crate::ThreadId;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use spin::Mutex;

#[derive(Debug)]
struct Inner {
    value: u32,
    waiters: VecDeque<ThreadId>,
}

/// Counting semaphore
#[derive(Debug)]
pub struct Semaphore {
    inner: Mutex<Inner>,
}

impl Semaphore {
    /// Create a semaphore holding `value` units
    pub const fn new(value: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Take one unit, blocking until one is available
    pub fn down(&self, sched: &Scheduler) {
        drop(self.down_with(sched.enter()));
    }

    /// [`Semaphore::down`] inside an open critical section
    pub fn down_with<'a>(&self, cs: CriticalSection<'a>) -> CriticalSection<'a> {
        self.down_as(cs, BlockReason::Semaphore)
    }

    pub(crate) fn down_as<'a>(&self, cs: CriticalSection<'a>, reason: BlockReason) -> CriticalSection<'a> {
        {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                return cs;
            }
            inner.waiters.push_back(cs.current());
        }
        cs.block(reason)
    }

    /// Take one unit if one is available
    pub fn try_down(&self, sched: &Scheduler) -> bool {
        self.try_down_in(&sched.enter())
    }

    pub(crate) fn try_down_in(&self, _cs: &CriticalSection<'_>) -> bool {
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            true
        } else {
            false
        }
    }

    /// Release one unit. Wakes the highest-priority waiter, then yields if
    /// that waiter outranks the caller.
    pub fn up(&self, sched: &Scheduler) {
        {
            let mut cs = sched.enter();
            self.up_in(&mut cs);
        }
        sched.yield_if_outranked();
    }

    /// Release one unit without yielding. Returns the thread that was woken.
    pub fn up_in(&self, cs: &mut CriticalSection<'_>) -> Option<ThreadId> {
        let mut inner = self.inner.lock();
        let mut best: Option<(usize, crate::Priority)> = None;
        for (index, &id) in inner.waiters.iter().enumerate() {
            let priority = cs.effective_priority(id);
            if best.map_or(true, |(_, top)| priority > top) {
                best = Some((index, priority));
            }
        }
        match best.and_then(|(index, _)| inner.waiters.remove(index)) {
            Some(id) => {
                drop(inner);
                cs.unblock(id);
                Some(id)
            }
            None => {
                inner.value = match inner.value.checked_add(1) {
                    Some(value) => value,
                    None => panic!("semaphore counter overflow"),
                };
                None
            }
        }
    }

    /// Units currently available
    pub fn value(&self) -> u32 {
        self.inner.lock().value
    }

    /// Threads blocked in `down`, oldest first
    pub fn waiters(&self) -> Vec<ThreadId> {
        self.inner.lock().waiters.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{SchedulerConfig, ThreadOptions};
    use alloc::sync::Arc;
    use corvid_hal::host::HostPlatform;

    fn boot() -> Arc<Scheduler> {
        let sched = Scheduler::boot(HostPlatform::new(), SchedulerConfig::strict());
        sched.start().unwrap();
        sched
    }

    #[test]
    fn test_counter_without_waiters() {
        let sched = boot();
        let sema = Semaphore::new(1);
        assert!(sema.try_down(&sched));
        assert!(!sema.try_down(&sched));
        sema.up(&sched);
        sema.up(&sched);
        assert_eq!(sema.value(), 2);
        sema.down(&sched);
        assert_eq!(sema.value(), 1);
    }

    #[test]
    fn test_up_hands_unit_to_waiter() {
        let sched = boot();
        let sema = Arc::new(Semaphore::new(0));
        let done = Arc::new(Mutex::new(None));
        let (g, d, s) = (sema.clone(), done.clone(), sched.clone());
        let waiter = sched
            .spawn(ThreadOptions::new("waiter").priority(40), move || {
                g.down(&s);
                *d.lock() = Some(g.value());
            })
            .unwrap();
        assert_eq!(sema.waiters(), vec![waiter]);

        {
            let mut cs = sched.enter();
            assert_eq!(sema.up_in(&mut cs), Some(waiter));
            assert_eq!(sema.value(), 0);
        }
        assert!(done.lock().is_none());
        sched.yield_now();
        assert_eq!(*done.lock(), Some(0));
        assert_eq!(sema.value(), 0);
    }

    #[test]
    fn test_ping_pong() {
        let sched = boot();
        let ping = Arc::new(Semaphore::new(0));
        let pong = Arc::new(Semaphore::new(0));
        let trace = Arc::new(Mutex::new(Vec::new()));

        let (p, q, t, s) = (ping.clone(), pong.clone(), trace.clone(), sched.clone());
        sched
            .spawn(ThreadOptions::new("ponger"), move || {
                for round in 0..5 {
                    p.down(&s);
                    t.lock().push(("pong", round));
                    q.up(&s);
                }
            })
            .unwrap();

        for round in 0..5 {
            trace.lock().push(("ping", round));
            ping.up(&sched);
            pong.down(&sched);
        }
        let trace = trace.lock();
        assert_eq!(trace.len(), 10);
        for (i, pair) in trace.chunks(2).enumerate() {
            assert_eq!(pair, [("ping", i), ("pong", i)]);
        }
    }

    #[test]
    fn test_wakes_highest_priority_first() {
        let sched = boot();
        let gate = Arc::new(Semaphore::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [("low", 32), ("high", 40), ("mid", 35), ("mid2", 35)] {
            let (g, o, s) = (gate.clone(), order.clone(), sched.clone());
            sched
                .spawn(ThreadOptions::new(name).priority(priority), move || {
                    g.down(&s);
                    o.lock().push(name);
                })
                .unwrap();
        }
        assert_eq!(gate.waiters().len(), 4);
        for _ in 0..4 {
            gate.up(&sched);
        }
        assert_eq!(*order.lock(), vec!["high", "mid", "mid2", "low"]);
    }
}
