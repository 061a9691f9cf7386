//! # Multi-Level Feedback Arithmetic
//!
//! ```text
//! load_avg   = (59/60) * load_avg + (1/60) * ready_threads
//! recent_cpu = (2*load_avg) / (2*load_avg + 1) * recent_cpu + nice
//! priority   = PRI_MAX - recent_cpu/4 - nice*2
//! ```

use super::priority::PRI_MAX;
use super::{Nice, Priority};
use crate::fixed_point::Fixed;

/// One second of the load-average filter
pub fn next_load_avg(load_avg: Fixed, ready_threads: usize) -> Fixed {
    Fixed::frac(59, 60) * load_avg + Fixed::frac(1, 60).mul_int(ready_threads as i32)
}

/// One second of recent-CPU decay
pub fn decay_recent_cpu(recent_cpu: Fixed, load_avg: Fixed, nice: Nice) -> Fixed {
    let twice = load_avg.mul_int(2);
    (twice / twice.add_int(1)) * recent_cpu + Fixed::from_int(nice.value())
}

/// Priority derived from recent CPU and niceness
pub fn priority_for(recent_cpu: Fixed, nice: Nice) -> Priority {
    let priority = Fixed::from_int(i32::from(PRI_MAX)) - recent_cpu.div_int(4) - Fixed::from_int(nice.value() * 2);
    Priority::clamped(priority.trunc())
}
