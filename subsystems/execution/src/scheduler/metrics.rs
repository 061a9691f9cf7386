//! # Scheduler Metrics
//!
//! Tick accounting and switch counters.

use core::sync::atomic::{AtomicU64, Ordering};

use super::SchedulerStats;

/// Scheduler metrics
#[derive(Debug)]
pub struct SchedulerMetrics {
    /// Ticks spent in the idle thread
    idle_ticks: AtomicU64,
    /// Ticks spent in kernel threads
    kernel_ticks: AtomicU64,
    /// Ticks spent in threads with a user address space
    user_ticks: AtomicU64,
    /// Total context switches
    context_switches: AtomicU64,
    /// Total voluntary yields
    voluntary_yields: AtomicU64,
    /// Total preemptions requested by the tick handler
    preemptions: AtomicU64,
}

impl SchedulerMetrics {
    /// Create new metrics
    pub const fn new() -> Self {
        Self {
            idle_ticks: AtomicU64::new(0),
            kernel_ticks: AtomicU64::new(0),
            user_ticks: AtomicU64::new(0),
            context_switches: AtomicU64::new(0),
            voluntary_yields: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
        }
    }

    /// Record a tick spent idle
    pub fn record_idle_tick(&self) {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick spent in a kernel thread
    pub fn record_kernel_tick(&self) {
        self.kernel_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick spent in a user thread
    pub fn record_user_tick(&self) {
        self.user_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a context switch
    pub fn record_context_switch(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a voluntary yield
    pub fn record_yield(&self) {
        self.voluntary_yields.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a preemption
    pub fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get idle ticks
    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::Relaxed)
    }

    /// Get kernel ticks
    pub fn kernel_ticks(&self) -> u64 {
        self.kernel_ticks.load(Ordering::Relaxed)
    }

    /// Get user ticks
    pub fn user_ticks(&self) -> u64 {
        self.user_ticks.load(Ordering::Relaxed)
    }

    /// Get context switch count
    pub fn context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Get yield count
    pub fn voluntary_yields(&self) -> u64 {
        self.voluntary_yields.load(Ordering::Relaxed)
    }

    /// Get preemption count
    pub fn preemptions(&self) -> u64 {
        self.preemptions.load(Ordering::Relaxed)
    }

    /// Snapshot the counters
    pub fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            idle_ticks: self.idle_ticks(),
            kernel_ticks: self.kernel_ticks(),
            user_ticks: self.user_ticks(),
            context_switches: self.context_switches(),
            voluntary_yields: self.voluntary_yields(),
            preemptions: self.preemptions(),
            ..SchedulerStats::default()
        }
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_buckets() {
        let metrics = SchedulerMetrics::new();
        metrics.record_idle_tick();
        metrics.record_kernel_tick();
        metrics.record_kernel_tick();
        metrics.record_user_tick();
        let stats = metrics.snapshot();
        assert_eq!((stats.idle_ticks, stats.kernel_ticks, stats.user_ticks), (1, 2, 1));
        assert_eq!(stats.context_switches, 0);
    }
}
