//! # Scheduler
//!
//! One [`Scheduler`] per boot. It owns every thread record, the ready and
//! sleep structures, and decides and performs every context switch. The
//! policy (strict priority with donation, or multi-level feedback) is fixed
//! when the scheduler is booted.
//!
//! All state lives in [`SchedulerState`](state::SchedulerState) and is only
//! reachable through a [`CriticalSection`].

pub mod config;
pub mod donation;
pub mod feedback;
pub mod metrics;
pub mod priority;
pub mod queue;
pub mod state;
pub mod traits;

pub use config::{SchedulerConfig, SchedulingPolicy};
pub use metrics::SchedulerMetrics;
pub use priority::{Nice, Priority, PRI_DEFAULT, PRI_LEVELS, PRI_MAX, PRI_MIN};
pub use queue::{MultilevelQueue, PriorityQueue, QueueSlot, SleepQueue};
pub use traits::{RunQueue, SchedulerStats};

use crate::context::{CriticalSection, SwitchHook};
use crate::sync::Semaphore;
use crate::thread::{BlockReason, KernelStack, Thread, ThreadFlags, ThreadInfo};
use crate::{ExecError, ExecResult, ProcessId, ThreadId};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use corvid_hal::interrupts::TIMER_VECTOR;
use corvid_hal::{AddressSpaceId, ContextEntry, Platform, TrapFrame};
use spin::{Mutex, RwLock};
use state::SchedulerState;

/// Parameters for a new thread
#[derive(Debug, Clone)]
pub struct ThreadOptions {
    /// Thread name, truncated to [`THREAD_NAME_MAX`](crate::thread::THREAD_NAME_MAX)
    pub name: String,
    /// Base priority
    pub priority: Priority,
    /// Process to run on behalf of; inherited from the creator when `None`
    pub process: Option<ProcessId>,
}

impl ThreadOptions {
    /// Options for a kernel thread at the default priority
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            priority: Priority::DEFAULT,
            process: None,
        }
    }

    /// Set the base priority.
    ///
    /// # Panics
    ///
    /// If `priority` lies outside `[PRI_MIN, PRI_MAX]`.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = match Priority::try_new(priority) {
            Some(priority) => priority,
            None => panic!("thread priority {} outside [{}, {}]", priority, PRI_MIN, PRI_MAX),
        };
        self
    }

    /// Bind the thread to a process
    pub fn process(mut self, process: ProcessId) -> Self {
        self.process = Some(process);
        self
    }
}

/// The scheduler context of one boot
pub struct Scheduler {
    pub(crate) state: Mutex<SchedulerState>,
    pub(crate) platform: Arc<dyn Platform>,
    metrics: SchedulerMetrics,
    hooks: RwLock<Vec<Arc<dyn SwitchHook>>>,
    /// Running thread, readable without entering a critical section
    current: AtomicU32,
    policy: SchedulingPolicy,
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("policy", &self.policy)
            .field("current", &self.current())
            .finish()
    }
}

impl Scheduler {
    /// Turn the running flow of control into thread 1, "main".
    ///
    /// Interrupts must still be masked. Call [`Scheduler::start`] next.
    pub fn boot(platform: Arc<dyn Platform>, config: SchedulerConfig) -> Arc<Self> {
        log::info!(
            "scheduler: booting on {} with {:?} scheduling",
            platform.arch_name(),
            config.policy
        );
        let policy = config.policy;
        let state = SchedulerState::new(config, "main");
        let main = state.current();
        platform.context().adopt_current(main.context_id());
        Arc::new(Self {
            state: Mutex::new(state),
            platform,
            metrics: SchedulerMetrics::new(),
            hooks: RwLock::new(Vec::new()),
            current: AtomicU32::new(main.as_u32()),
            policy,
        })
    }

    /// Create the idle thread, install the timer handler and turn
    /// preemption on. Returns once idle has run.
    pub fn start(self: &Arc<Self>) -> ExecResult<()> {
        let started = Arc::new(Semaphore::new(0));
        let signal = started.clone();
        let sched = self.clone();
        self.spawn(ThreadOptions::new("idle").priority(i32::from(PRI_MIN)), move || {
            {
                let mut cs = sched.enter();
                let me = cs.current();
                cs.idle = Some(me);
                let idle = cs.thread_mut(me);
                idle.flags |= ThreadFlags::IDLE;
                idle.priority = Priority::MIN;
            }
            signal.up(&sched);
            sched.idle_loop()
        })?;

        let weak = Arc::downgrade(self);
        self.platform.interrupts().register(
            TIMER_VECTOR,
            Arc::new(move |_frame: &mut TrapFrame| {
                if let Some(sched) = weak.upgrade() {
                    sched.timer_interrupt();
                }
            }),
        )?;

        self.platform.cpu().enable_interrupts();
        started.down(self);
        log::info!("scheduler: started");
        Ok(())
    }

    fn idle_loop(&self) -> ! {
        loop {
            drop(self.enter().block(BlockReason::Idle));
            // Re-enables interrupts and sleeps until the next one.
            self.platform.cpu().wait_for_interrupt();
        }
    }

    /// Mask interrupts and take the scheduler state
    pub fn enter(&self) -> CriticalSection<'_> {
        CriticalSection::enter(self)
    }

    /// The platform this scheduler runs on
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Scheduling policy chosen at boot
    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Register a switch observer
    pub fn add_hook(&self, hook: Arc<dyn SwitchHook>) {
        self.hooks.write().push(hook);
    }

    /// Create a thread running `f` and make it ready.
    ///
    /// Under strict priority the caller yields at once if the new thread
    /// outranks it.
    pub fn spawn<F>(self: &Arc<Self>, options: ThreadOptions, f: F) -> ExecResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mmu = self.platform.mmu();
        let stack = KernelStack::allocate(mmu).ok_or(ExecError::OutOfResources)?;
        let stack_top = stack.top();

        let (id, nice, recent_cpu, process) = {
            let mut cs = self.enter();
            let id = cs.allocate_tid();
            let creator = cs.thread(cs.current());
            (id, creator.nice, creator.recent_cpu, options.process.or(creator.process))
        };

        let sched = self.clone();
        let entry: ContextEntry = Box::new(move |prev| {
            let mut cs = CriticalSection::first_run(&sched);
            sched.schedule_tail(&mut cs, ThreadId::from_context_id(prev));
            drop(cs);
            f();
            sched.exit()
        });
        if let Err(err) = self.platform.context().prepare(id.context_id(), stack_top, entry) {
            log::debug!("thread {}: context setup failed: {:?}", id, err);
            stack.release(mmu);
            return Err(err.into());
        }

        let mut thread = Thread::new(id, &options.name, options.priority, stack);
        thread.nice = nice;
        thread.recent_cpu = recent_cpu;
        thread.process = process;
        if self.policy == SchedulingPolicy::Feedback {
            thread.priority = feedback::priority_for(recent_cpu, nice);
        }

        let mut cs = self.enter();
        log::debug!("thread {} ({}) created at priority {}", id, thread.name(), thread.priority().value());
        cs.add(thread);
        cs.unblock(id);
        let preempt = self.policy == SchedulingPolicy::Priority && cs.is_outranked();
        drop(cs);
        if preempt {
            self.yield_now();
        }
        Ok(id)
    }

    /// Bookkeeping on the far side of every switch, run by the thread that
    /// was switched to
    pub(crate) fn schedule_tail(&self, cs: &mut CriticalSection<'_>, prev: ThreadId) {
        let dead = cs.complete_switch();
        let current = cs.current();
        self.current.store(current.as_u32(), Ordering::SeqCst);
        self.platform.mmu().activate(cs.thread(current).address_space);

        if let Some(dead) = dead {
            self.reclaim(dead);
        }
        if prev != current {
            self.metrics.record_context_switch();
            log::trace!("switch {} -> {}", prev, current);
            for hook in self.hooks.read().iter() {
                hook.on_switch(prev, current);
            }
        }
    }

    fn reclaim(&self, thread: Thread) {
        log::debug!("thread {} ({}) reclaimed", thread.id(), thread.name());
        if !thread.flags().contains(ThreadFlags::INIT) {
            self.platform.context().release(thread.id().context_id());
        }
        thread.stack.release(self.platform.mmu());
    }

    /// Timer interrupt handler
    fn timer_interrupt(&self) {
        let mut cs = self.enter();
        cs.in_interrupt = true;
        let preempt = cs.tick(&self.metrics);
        cs.in_interrupt = false;
        let deferred = core::mem::take(&mut cs.yield_on_return);
        drop(cs);
        if preempt || deferred {
            self.reschedule(false);
        }
    }

    fn reschedule(&self, voluntary: bool) {
        let mut cs = self.enter();
        assert!(!cs.in_interrupt, "yield inside an interrupt handler");
        cs.requeue_current();
        if voluntary {
            self.metrics.record_yield();
        }
        drop(cs.schedule());
    }

    /// Give up the CPU; the running thread stays ready
    pub fn yield_now(&self) {
        self.reschedule(true);
    }

    /// Yield if a ready thread ranks above the running one. Inside the timer
    /// handler the yield happens when the handler returns.
    pub fn yield_if_outranked(&self) {
        let mut cs = self.enter();
        if !cs.is_outranked() {
            return;
        }
        if cs.in_interrupt {
            cs.yield_on_return = true;
            return;
        }
        drop(cs);
        self.yield_now();
    }

    /// Block for at least `ticks` timer ticks. Non-positive values return
    /// at once.
    pub fn sleep(&self, ticks: i64) {
        let Ok(ticks) = u64::try_from(ticks) else {
            return;
        };
        if ticks == 0 {
            return;
        }
        let mut cs = self.enter();
        let wake_at = cs.ticks + ticks;
        cs.sleep_current(wake_at);
        drop(cs.schedule());
    }

    /// Terminate the running thread. Its record and stack are freed after
    /// the next switch.
    pub fn exit(&self) -> ! {
        let mut cs = self.enter();
        let id = cs.current();
        log::debug!("thread {} ({}) exiting", id, cs.thread(id).name());
        cs.exit_current();
        cs.schedule_dying()
    }

    /// Timer ticks since boot
    pub fn ticks(&self) -> u64 {
        self.enter().ticks
    }

    /// The running thread
    pub fn current(&self) -> ThreadId {
        ThreadId::new(self.current.load(Ordering::SeqCst))
    }

    /// Name of the running thread
    pub fn current_name(&self) -> String {
        let cs = self.enter();
        String::from(cs.thread(cs.current()).name())
    }

    /// Set the running thread's base priority, then yield if it no longer
    /// ranks highest. Ignored under feedback scheduling.
    pub fn set_priority(&self, priority: Priority) {
        if self.policy == SchedulingPolicy::Feedback {
            return;
        }
        self.enter().set_priority(priority);
        self.yield_if_outranked();
    }

    /// Effective priority of the running thread
    pub fn get_priority(&self) -> Priority {
        let cs = self.enter();
        cs.effective_priority(cs.current())
    }

    /// Set the running thread's niceness (clamped to [-20, 20]), then yield
    /// if it no longer ranks highest
    pub fn set_nice(&self, nice: i32) {
        self.enter().set_nice(Nice::new(nice));
        self.yield_if_outranked();
    }

    /// Niceness of the running thread
    pub fn get_nice(&self) -> i32 {
        let cs = self.enter();
        cs.thread(cs.current()).nice().value()
    }

    /// 100 times the system load average, rounded
    pub fn load_avg(&self) -> i32 {
        self.enter().load_avg().mul_int(100).round()
    }

    /// 100 times the running thread's recent CPU, truncated
    pub fn recent_cpu(&self) -> i32 {
        let cs = self.enter();
        cs.thread(cs.current()).recent_cpu().mul_int(100).trunc()
    }

    /// Bind a thread to an address space; activates it when `id` is running
    pub fn set_address_space(&self, id: ThreadId, space: Option<AddressSpaceId>) -> ExecResult<()> {
        let mut cs = self.enter();
        if cs.arena.find(id).is_none() {
            return Err(ExecError::ThreadNotFound);
        }
        cs.thread_mut(id).address_space = space;
        if cs.current() == id {
            self.platform.mmu().activate(space);
        }
        Ok(())
    }

    /// Process a thread runs on behalf of
    pub fn thread_process(&self, id: ThreadId) -> Option<ProcessId> {
        self.enter().arena.find(id).and_then(Thread::process)
    }

    /// Process of the running thread
    pub fn current_process(&self) -> Option<ProcessId> {
        let cs = self.enter();
        cs.thread(cs.current()).process()
    }

    /// Snapshot of every live thread
    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.enter().threads()
    }

    /// Switch and tick counters
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Counters plus queue sizes
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.metrics.snapshot();
        self.enter().fill_stats(&mut stats);
        stats
    }

    /// Log the tick accounting
    pub fn print_stats(&self) {
        let stats = self.stats();
        log::info!(
            "Thread: {} idle ticks, {} kernel ticks, {} user ticks",
            stats.idle_ticks,
            stats.kernel_ticks,
            stats.user_ticks
        );
        log::info!(
            "Scheduler: {} switches, {} yields, {} preemptions",
            stats.context_switches,
            stats.voluntary_yields,
            stats.preemptions
        );
    }
}
