//! # Context Switch Primitive
//!
//! Stack frames and the register save/restore sequence live behind this
//! trait. The kernel only names contexts and asks to move between them.

use crate::{HalResult, VirtAddr};
use alloc::boxed::Box;

/// Identifier the kernel uses to name a context
pub type ContextId = u64;

/// First code a fresh context runs. It receives the id of the context that
/// was switched away from.
pub type ContextEntry = Box<dyn FnOnce(ContextId) + Send + 'static>;

/// Context switch abstraction
pub trait ContextSwitch: Send + Sync {
    /// Treat the flow of control that is running right now as context `id`.
    /// Used once, for the boot thread.
    fn adopt_current(&self, id: ContextId);

    /// Build the initial frames for context `id` on the stack whose top is
    /// `stack_top`, so that the first switch into it calls `entry`.
    fn prepare(&self, id: ContextId, stack_top: VirtAddr, entry: ContextEntry) -> HalResult<()>;

    /// Save the running context `from` and resume `to`.
    ///
    /// Returns once `from` is resumed again, yielding the id of the context
    /// that was running just before. Never returns if `from` is released
    /// while suspended.
    fn switch(&self, from: ContextId, to: ContextId) -> ContextId;

    /// Forget a suspended context that will never be resumed
    fn release(&self, id: ContextId);
}
