//! # Thread States
//!
//! Thread state machine definition.

use crate::sync::LockId;

/// Lifecycle state of an execution unit
///
/// `Blocked -> Ready -> Running -> {Ready | Blocked | Dying}`. `Dying` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ThreadState {
    /// Thread is currently running
    Running = 0,
    /// Thread is ready to run
    Ready = 1,
    /// Thread is blocked waiting for something
    Blocked = 2,
    /// Thread has exited and waits to be reclaimed
    Dying = 3,
}

/// Reason for blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Down on a semaphore
    Semaphore,
    /// Acquiring a held lock
    Lock(LockId),
    /// Sleeping until a tick
    Sleep,
    /// Idle thread parked until nothing else is runnable
    Idle,
    /// Freshly created, not yet unblocked
    Creating,
}

impl ThreadState {
    /// Whether moving to `next` is a legal lifecycle step
    pub fn can_transition_to(self, next: ThreadState) -> bool {
        matches!(
            (self, next),
            (ThreadState::Blocked, ThreadState::Ready)
                | (ThreadState::Ready, ThreadState::Running)
                | (ThreadState::Running, ThreadState::Ready | ThreadState::Blocked | ThreadState::Dying)
        )
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        ThreadState::Blocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(ThreadState::Blocked.can_transition_to(ThreadState::Ready));
        assert!(!ThreadState::Blocked.can_transition_to(ThreadState::Running));
        assert!(ThreadState::Running.can_transition_to(ThreadState::Dying));
        assert!(!ThreadState::Ready.can_transition_to(ThreadState::Blocked));
        for next in [ThreadState::Running, ThreadState::Ready, ThreadState::Blocked, ThreadState::Dying] {
            assert!(!ThreadState::Dying.can_transition_to(next));
        }
    }
}
