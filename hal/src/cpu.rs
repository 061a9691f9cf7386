//! # CPU Abstraction
//!
//! Interrupt level control and the transition into user mode.

use crate::VirtAddr;

/// Interrupt enable state of the (single) CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptLevel {
    /// Interrupts are delivered
    On,
    /// Interrupts are masked
    Off,
}

/// CPU abstraction trait
///
/// Masking interrupts is the kernel's only mutual-exclusion mechanism for
/// scheduler state, so every implementation must make `disable`/`set_level`
/// take effect before returning.
pub trait Cpu: Send + Sync {
    /// Current interrupt level
    fn interrupt_level(&self) -> InterruptLevel;

    /// Set the interrupt level, returning the previous one
    fn set_interrupt_level(&self, level: InterruptLevel) -> InterruptLevel;

    /// Mask interrupts, returning the previous level
    fn disable_interrupts(&self) -> InterruptLevel {
        self.set_interrupt_level(InterruptLevel::Off)
    }

    /// Unmask interrupts, returning the previous level
    fn enable_interrupts(&self) -> InterruptLevel {
        self.set_interrupt_level(InterruptLevel::On)
    }

    /// Check if interrupts are enabled
    fn interrupts_enabled(&self) -> bool {
        self.interrupt_level() == InterruptLevel::On
    }

    /// Enable interrupts and halt until the next one has been handled
    fn wait_for_interrupt(&self);

    /// Drop to user mode at `entry` with the user stack pointer at `stack`.
    ///
    /// The active address space must already map both.
    fn enter_user_mode(&self, entry: VirtAddr, stack: VirtAddr) -> !;

    /// Power the machine off
    fn power_off(&self);
}
