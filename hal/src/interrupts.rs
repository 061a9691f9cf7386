//! # Interrupt Dispatch
//!
//! Vector registration and the trap frame handed to handlers. The stubs that
//! save registers and build the frame live below this contract.

use crate::{HalResult, VirtAddr};
use alloc::sync::Arc;

/// Interrupt vector number
pub type InterruptVector = u8;

/// Programmable interval timer, after remapping
pub const TIMER_VECTOR: InterruptVector = 0x20;

/// The `int $0x30` system-call gate
pub const SYSCALL_VECTOR: InterruptVector = 0x30;

/// Register state visible to an interrupt handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    /// Vector that fired
    pub vector: InterruptVector,
    /// User stack pointer at the time of the trap
    pub esp: VirtAddr,
    /// Return-value register, written back on return
    pub eax: u32,
}

impl TrapFrame {
    /// Frame for a trap with the given user stack pointer
    pub const fn new(vector: InterruptVector, esp: VirtAddr) -> Self {
        Self { vector, esp, eax: 0 }
    }
}

/// Interrupt handler type
pub type InterruptHandler = Arc<dyn Fn(&mut TrapFrame) + Send + Sync>;

/// Interrupt controller abstraction
pub trait InterruptController: Send + Sync {
    /// Install the handler for `vector`, replacing any earlier one
    fn register(&self, vector: InterruptVector, handler: InterruptHandler) -> HalResult<()>;
}
