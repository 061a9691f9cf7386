//! # Scheduler State
//!
//! Everything the scheduler owns, as plain data. No method here switches
//! stacks or touches the platform; [`Scheduler`](super::Scheduler) wraps this
//! in a critical section and performs the switches it decides on.

use super::config::SchedulerConfig;
use super::donation;
use super::feedback;
use super::metrics::SchedulerMetrics;
use super::queue::{MultilevelQueue, PriorityQueue, SleepQueue};
use super::traits::{RunQueue, SchedulerStats};
use super::{Nice, Priority};
use crate::fixed_point::Fixed;
use crate::sync::LockId;
use crate::thread::{BlockReason, LinkKind, Thread, ThreadArena, ThreadFlags, ThreadInfo, ThreadList, ThreadState};
use crate::ThreadId;
use alloc::boxed::Box;
use alloc::vec::Vec;

/// What the dispatcher decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Thread giving up the CPU
    pub prev: ThreadId,
    /// Thread taking the CPU
    pub next: ThreadId,
}

/// Scheduler-owned structures
pub struct SchedulerState {
    pub(crate) config: SchedulerConfig,
    pub(crate) arena: ThreadArena,
    /// Every thread that has not exited
    all: ThreadList,
    ready: Box<dyn RunQueue>,
    sleepers: SleepQueue,
    pub(crate) running: ThreadId,
    pub(crate) idle: Option<ThreadId>,
    next_tid: u32,
    pub(crate) ticks: u64,
    slice_ticks: u32,
    load_avg: Fixed,
    pub(crate) in_interrupt: bool,
    pub(crate) yield_on_return: bool,
    /// Dying thread whose record is freed after the next switch
    pending_reclaim: Option<ThreadId>,
}

impl core::fmt::Debug for SchedulerState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedulerState")
            .field("policy", &self.config.policy)
            .field("running", &self.running)
            .field("ready", &self.ready.len())
            .field("sleeping", &self.sleepers.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl SchedulerState {
    /// State with `initial` (named `name`) as the running thread
    pub fn new(config: SchedulerConfig, name: &str) -> Self {
        let ready: Box<dyn RunQueue> = if config.is_feedback() {
            Box::new(MultilevelQueue::new())
        } else {
            Box::new(PriorityQueue::new())
        };
        let mut state = Self {
            config,
            arena: ThreadArena::new(),
            all: ThreadList::new(LinkKind::All),
            ready,
            sleepers: SleepQueue::new(),
            running: ThreadId::new(0),
            idle: None,
            next_tid: 1,
            ticks: 0,
            slice_ticks: 0,
            load_avg: Fixed::ZERO,
            in_interrupt: false,
            yield_on_return: false,
            pending_reclaim: None,
        };
        let id = state.allocate_tid();
        let mut initial = Thread::detached(id, name);
        initial.flags |= ThreadFlags::INIT;
        initial.state = ThreadState::Running;
        initial.block_reason = None;
        state.add(initial);
        state.running = id;
        state
    }

    /// Hand out the next thread id
    pub fn allocate_tid(&mut self) -> ThreadId {
        let id = ThreadId::new(self.next_tid);
        self.next_tid += 1;
        id
    }

    /// Take ownership of a blocked thread record
    pub fn add(&mut self, thread: Thread) {
        let id = thread.id;
        self.arena.insert(thread);
        self.all.push_back(&mut self.arena, id);
    }

    /// The running thread
    pub fn current(&self) -> ThreadId {
        self.running
    }

    /// Record of a live thread
    pub fn thread(&self, id: ThreadId) -> &Thread {
        self.arena.get(id)
    }

    /// Record of a live thread, mutably
    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        self.arena.get_mut(id)
    }

    fn is_feedback(&self) -> bool {
        self.config.is_feedback()
    }

    /// Priority used for ordering: effective priority under strict
    /// scheduling, the computed priority under feedback scheduling
    pub fn effective_priority(&self, id: ThreadId) -> Priority {
        if self.is_feedback() {
            self.arena.get(id).priority
        } else {
            donation::effective_priority(&self.arena, id, self.config.donation_depth_limit)
        }
    }

    fn ranker(&self) -> impl Fn(&ThreadArena, ThreadId) -> Priority {
        let feedback = self.is_feedback();
        let limit = self.config.donation_depth_limit;
        move |arena: &ThreadArena, id: ThreadId| {
            if feedback {
                arena.get(id).priority
            } else {
                donation::effective_priority(arena, id, limit)
            }
        }
    }

    /// Change a thread's state. The idle thread goes straight from parked
    /// to running.
    fn set_state(&mut self, id: ThreadId, next: ThreadState) {
        let current = self.arena.get(id).state;
        debug_assert!(
            current.can_transition_to(next) || (Some(id) == self.idle && next == ThreadState::Running),
            "thread {}: illegal transition {:?} -> {:?}",
            id,
            current,
            next
        );
        self.arena.get_mut(id).state = next;
    }

    /// Move a blocked thread to ready. Does not preempt.
    pub fn unblock(&mut self, id: ThreadId) {
        assert_eq!(self.arena.get(id).state, ThreadState::Blocked, "unblocking thread {} that is not blocked", id);
        self.set_state(id, ThreadState::Ready);
        self.arena.get_mut(id).block_reason = None;
        let rank = self.ranker();
        self.ready.enqueue(&mut self.arena, id, &rank);
    }

    /// Mark the running thread blocked; the caller must dispatch next
    pub fn block_current(&mut self, reason: BlockReason) {
        assert!(!self.in_interrupt, "thread blocked inside an interrupt handler");
        let id = self.running;
        self.set_state(id, ThreadState::Blocked);
        self.arena.get_mut(id).block_reason = Some(reason);
    }

    /// Put the running thread back on the ready structure; the idle thread
    /// is parked instead
    pub fn requeue_current(&mut self) {
        let id = self.running;
        if Some(id) == self.idle {
            self.block_current(BlockReason::Idle);
            return;
        }
        self.set_state(id, ThreadState::Ready);
        let rank = self.ranker();
        self.ready.enqueue(&mut self.arena, id, &rank);
    }

    /// Block the running thread until tick `wake_at`
    pub fn sleep_current(&mut self, wake_at: u64) {
        let id = self.running;
        self.arena.get_mut(id).wake_at = wake_at;
        self.block_current(BlockReason::Sleep);
        self.sleepers.insert(&mut self.arena, id);
    }

    /// The running thread exits: it leaves the all-threads list and waits
    /// for reclaim
    pub fn exit_current(&mut self) {
        let id = self.running;
        assert!(Some(id) != self.idle, "idle thread exited");
        self.all.remove(&mut self.arena, id);
        self.set_state(id, ThreadState::Dying);
    }

    /// Pop the thread that should run next, falling back to idle
    pub fn next_thread_to_run(&mut self) -> ThreadId {
        match self.ready.dequeue(&mut self.arena) {
            Some(id) => id,
            None => match self.idle {
                Some(idle) => idle,
                None => panic!("no runnable thread and no idle thread"),
            },
        }
    }

    /// Pick the next thread. The running thread must already have left the
    /// running state.
    pub fn dispatch(&mut self) -> Dispatch {
        let prev = self.running;
        let prev_state = self.arena.get(prev).state;
        assert_ne!(prev_state, ThreadState::Running, "dispatching while thread {} still running", prev);
        let next = self.next_thread_to_run();
        if prev_state == ThreadState::Dying {
            assert!(self.pending_reclaim.is_none(), "two threads awaiting reclaim");
            self.pending_reclaim = Some(prev);
        }
        self.running = next;
        Dispatch { prev, next }
    }

    /// Bookkeeping once `running` is on the CPU. Returns the record of a
    /// thread that died before the switch, for the caller to free.
    pub fn complete_switch(&mut self) -> Option<Thread> {
        let id = self.running;
        self.set_state(id, ThreadState::Running);
        self.arena.get_mut(id).block_reason = None;
        self.slice_ticks = 0;

        let dead = self.pending_reclaim.take()?;
        assert_ne!(dead, id, "dying thread {} was rescheduled", dead);
        self.arena.remove(dead)
    }

    /// Whether some ready thread ranks above the running one
    pub fn is_outranked(&self) -> bool {
        match self.ready.peek() {
            Some(head) => self.effective_priority(head) > self.effective_priority(self.running),
            None => false,
        }
    }

    /// Timer tick. Returns whether the running thread should yield when the
    /// interrupt returns.
    pub fn tick(&mut self, metrics: &SchedulerMetrics) -> bool {
        self.ticks += 1;
        let now = self.ticks;
        let current = self.running;
        let on_idle = Some(current) == self.idle;

        if on_idle {
            metrics.record_idle_tick();
        } else if self.arena.get(current).is_user() {
            metrics.record_user_tick();
        } else {
            metrics.record_kernel_tick();
        }

        while let Some(id) = self.sleepers.pop_due(&mut self.arena, now) {
            log::trace!("tick {}: waking thread {}", now, id);
            self.unblock(id);
        }

        if self.is_feedback() {
            if !on_idle {
                let thread = self.arena.get_mut(current);
                thread.recent_cpu = thread.recent_cpu.add_int(1);
            }
            if now % u64::from(self.config.timer_freq) == 0 {
                self.refresh_load_avg();
                self.refresh_recent_cpu();
            }
            if now % u64::from(self.config.recompute_interval) == 0 {
                self.refresh_priorities();
            }
        }

        self.slice_ticks += 1;
        let expired = self.slice_ticks >= self.config.time_slice;
        let outranked = !self.is_feedback() && self.is_outranked();
        if expired || outranked {
            metrics.record_preemption();
            true
        } else {
            false
        }
    }

    fn refresh_load_avg(&mut self) {
        let running = usize::from(Some(self.running) != self.idle);
        self.load_avg = feedback::next_load_avg(self.load_avg, self.ready.len() + running);
    }

    fn live_threads(&self) -> Vec<ThreadId> {
        self.all
            .iter(&self.arena)
            .filter(|&id| Some(id) != self.idle)
            .collect()
    }

    fn refresh_recent_cpu(&mut self) {
        let load_avg = self.load_avg;
        for id in self.live_threads() {
            let thread = self.arena.get_mut(id);
            thread.recent_cpu = feedback::decay_recent_cpu(thread.recent_cpu, load_avg, thread.nice);
        }
    }

    fn refresh_priorities(&mut self) {
        for id in self.live_threads() {
            let thread = self.arena.get_mut(id);
            thread.priority = feedback::priority_for(thread.recent_cpu, thread.nice);
        }
        let rank = self.ranker();
        self.ready.reorder(&mut self.arena, &rank);
    }

    /// Change the running thread's base priority
    pub fn set_priority(&mut self, priority: Priority) {
        let id = self.running;
        self.arena.get_mut(id).priority = priority;
    }

    /// Change the running thread's niceness, recomputing its priority under
    /// feedback scheduling
    pub fn set_nice(&mut self, nice: Nice) {
        let feedback = self.is_feedback();
        let thread = self.arena.get_mut(self.running);
        thread.nice = nice;
        if feedback {
            thread.priority = feedback::priority_for(thread.recent_cpu, nice);
        }
    }

    /// System load average
    pub fn load_avg(&self) -> Fixed {
        self.load_avg
    }

    /// `waiter` blocks on `lock`, held by `holder`
    pub fn donate(&mut self, waiter: ThreadId, holder: ThreadId, lock: LockId) {
        if self.is_feedback() {
            return;
        }
        donation::donate(&mut self.arena, waiter, holder, lock, self.config.donation_depth_limit);
        let rank = self.ranker();
        self.ready.reorder(&mut self.arena, &rank);
    }

    /// `holder` releases `lock`
    pub fn withdraw_donations(&mut self, holder: ThreadId, lock: LockId) {
        if self.is_feedback() {
            return;
        }
        donation::withdraw(&mut self.arena, holder, lock);
        let rank = self.ranker();
        self.ready.reorder(&mut self.arena, &rank);
    }

    /// `id` now holds the lock it was waiting for
    pub fn lock_granted(&mut self, id: ThreadId) {
        if !self.is_feedback() {
            donation::granted(&mut self.arena, id);
        }
    }

    /// Threads on the ready structure, in dispatch order
    pub fn ready_threads(&self) -> Vec<ThreadId> {
        self.ready.to_vec(&self.arena)
    }

    /// Sleeping threads, in wake order
    pub fn sleeping_threads(&self) -> Vec<ThreadId> {
        self.sleepers.to_vec(&self.arena)
    }

    /// Snapshot of every thread on the all-threads list
    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.all
            .iter(&self.arena)
            .map(|id| {
                let t = self.arena.get(id);
                ThreadInfo {
                    id,
                    name: t.name.clone(),
                    state: t.state,
                    priority: t.priority,
                    effective_priority: self.effective_priority(id),
                    nice: t.nice,
                    recent_cpu: t.recent_cpu,
                    process: t.process,
                    block_reason: t.block_reason,
                }
            })
            .collect()
    }

    /// Queue and thread counts
    pub fn fill_stats(&self, stats: &mut SchedulerStats) {
        stats.ready_threads = self.ready.len();
        stats.sleeping_threads = self.sleepers.len();
        stats.total_threads = self.arena.len();
    }
}
