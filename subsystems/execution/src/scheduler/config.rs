//! # Scheduler Configuration

/// Which ready structure and priority rules a boot uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// One sorted ready list, priority donation through locks
    Priority,
    /// 64 FIFO buckets, priorities derived from recent CPU and niceness
    Feedback,
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Ready structure and priority rules
    pub policy: SchedulingPolicy,
    /// Ticks a thread may run before it is preempted
    pub time_slice: u32,
    /// Timer interrupts per second
    pub timer_freq: u32,
    /// Deepest lock chain donation may follow
    pub donation_depth_limit: usize,
    /// Ticks between feedback priority recomputations
    pub recompute_interval: u32,
}

impl SchedulerConfig {
    /// Default time slice: 4 ticks
    pub const DEFAULT_TIME_SLICE: u32 = 4;
    /// Default timer frequency: 100 Hz
    pub const DEFAULT_TIMER_FREQ: u32 = 100;
    /// Default donation depth limit
    pub const DEFAULT_DONATION_DEPTH: usize = 8;
    /// Default feedback recomputation interval
    pub const DEFAULT_RECOMPUTE_INTERVAL: u32 = 4;

    /// Create default configuration (strict priority)
    pub fn new() -> Self {
        Self {
            policy: SchedulingPolicy::Priority,
            time_slice: Self::DEFAULT_TIME_SLICE,
            timer_freq: Self::DEFAULT_TIMER_FREQ,
            donation_depth_limit: Self::DEFAULT_DONATION_DEPTH,
            recompute_interval: Self::DEFAULT_RECOMPUTE_INTERVAL,
        }
    }

    /// Strict priority with donation
    pub fn strict() -> Self {
        Self::new()
    }

    /// Multi-level feedback queue
    pub fn feedback() -> Self {
        Self {
            policy: SchedulingPolicy::Feedback,
            ..Self::new()
        }
    }

    /// Configuration selected by the kernel command line.
    ///
    /// `-o mlfqs` (or `-mlfqs`) selects the feedback scheduler.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut words = cmdline.split_whitespace();
        let mut config = Self::new();
        while let Some(word) = words.next() {
            let mlfqs = match word {
                "-mlfqs" => true,
                "-o" => words.next() == Some("mlfqs"),
                _ => false,
            };
            if mlfqs {
                config.policy = SchedulingPolicy::Feedback;
            }
        }
        config
    }

    /// Whether the feedback scheduler is selected
    pub fn is_feedback(&self) -> bool {
        self.policy == SchedulingPolicy::Feedback
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}
