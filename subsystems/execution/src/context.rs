//! # Context Switching
//!
//! The critical section every scheduler mutation happens in, and the
//! dispatch-and-switch path built on it.

use crate::scheduler::state::SchedulerState;
use crate::scheduler::Scheduler;
use crate::thread::BlockReason;
use crate::ThreadId;
use core::ops::{Deref, DerefMut};
use corvid_hal::InterruptLevel;
use spin::MutexGuard;

/// Observer notified after every context switch
///
/// Hooks run inside the critical section; they must not call back into the
/// scheduler or block.
pub trait SwitchHook: Send + Sync {
    /// `prev` stopped running and `next` now runs
    fn on_switch(&self, prev: ThreadId, next: ThreadId);
}

/// Interrupts masked and scheduler state held.
///
/// Entering masks interrupts first and then takes the state; dropping gives
/// the state back and then restores the interrupt level that was in effect
/// on entry. The state is never held across a switch: whoever resumes
/// re-takes it.
pub struct CriticalSection<'a> {
    sched: &'a Scheduler,
    state: Option<MutexGuard<'a, SchedulerState>>,
    restore: Option<InterruptLevel>,
}

impl<'a> CriticalSection<'a> {
    pub(crate) fn enter(sched: &'a Scheduler) -> Self {
        let restore = sched.platform.cpu().disable_interrupts();
        let state = sched.state.lock();
        Self {
            sched,
            state: Some(state),
            restore: Some(restore),
        }
    }

    /// Critical section for a thread's first run: interrupts are already
    /// masked by the switch that started it, and come on when it ends.
    pub(crate) fn first_run(sched: &'a Scheduler) -> Self {
        Self {
            sched,
            state: Some(sched.state.lock()),
            restore: Some(InterruptLevel::On),
        }
    }

    /// The scheduler this section belongs to
    pub fn scheduler(&self) -> &'a Scheduler {
        self.sched
    }

    /// Block the running thread and switch away. Returns once it has been
    /// unblocked and scheduled again.
    pub fn block(mut self, reason: BlockReason) -> Self {
        self.block_current(reason);
        self.schedule()
    }

    /// Dispatch the next thread and switch to it. The running thread must
    /// already have left the running state.
    pub(crate) fn schedule(mut self) -> Self {
        let sched = self.sched;
        assert!(!sched.platform.cpu().interrupts_enabled(), "scheduling with interrupts enabled");

        let dispatch = self.dispatch();
        let mut prev = dispatch.prev;
        if dispatch.next != dispatch.prev {
            self.state = None;
            let from = sched.platform.context().switch(dispatch.prev.context_id(), dispatch.next.context_id());
            prev = ThreadId::from_context_id(from);
            self.state = Some(sched.state.lock());
        }
        sched.schedule_tail(&mut self, prev);
        self
    }

    /// Switch away from a dying thread for good
    pub(crate) fn schedule_dying(mut self) -> ! {
        let sched = self.sched;
        let dispatch = self.dispatch();
        let id = dispatch.prev;
        // Nothing may run on this stack once the switch is made.
        self.restore = None;
        self.state = None;
        sched.platform.context().switch(dispatch.prev.context_id(), dispatch.next.context_id());
        panic!("dead thread {} was resumed", id);
    }
}

impl Deref for CriticalSection<'_> {
    type Target = SchedulerState;

    fn deref(&self) -> &SchedulerState {
        match &self.state {
            Some(state) => state,
            None => unreachable!("scheduler state released mid-switch"),
        }
    }
}

impl DerefMut for CriticalSection<'_> {
    fn deref_mut(&mut self) -> &mut SchedulerState {
        match &mut self.state {
            Some(state) => state,
            None => unreachable!("scheduler state released mid-switch"),
        }
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        let sched = self.sched;
        self.state = None;
        if let Some(level) = self.restore.take() {
            sched.platform.cpu().set_interrupt_level(level);
        }
    }
}
