//! # Corvid HAL - Hardware Abstraction Layer
//!
//! This crate defines the contracts the kernel core relies on but does not
//! implement itself: interrupt level control, interrupt vector dispatch, the
//! "switch from context A to context B" primitive, page-table management and
//! the console sink.
//!
//! ## Design Philosophy
//!
//! The core never touches hardware directly. Every operation that would need
//! assembly or device access goes through one of the traits below, bundled
//! behind a [`Platform`]. The `host` feature provides a std-backed platform
//! that runs every execution context on a host thread.

#![cfg_attr(not(feature = "host"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod console;
pub mod context;
pub mod cpu;
pub mod interrupts;
pub mod mmu;

#[cfg(feature = "host")]
pub mod host;

use static_assertions::const_assert;

pub use console::Console;
pub use context::{ContextEntry, ContextId, ContextSwitch};
pub use cpu::{Cpu, InterruptLevel};
pub use interrupts::{InterruptController, InterruptHandler, InterruptVector, TrapFrame};
pub use mmu::{AddressSpaceId, Mmu};

/// Size of one page in bytes
pub const PGSIZE: u64 = 4096;

/// First address above user space; everything below belongs to user programs
pub const PHYS_BASE: u64 = 0xC000_0000;

const_assert!(PHYS_BASE % PGSIZE == 0);

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// The operation is not supported on this platform
    NotSupported,
    /// Invalid parameter provided
    InvalidParameter,
    /// Address is invalid or not aligned
    InvalidAddress,
    /// Memory allocation failed
    OutOfMemory,
    /// Context with this id already exists
    AlreadyExists,
}

/// The aggregate every platform provides to the kernel core
pub trait Platform: Send + Sync + 'static {
    /// Interrupt level control and user-mode entry
    fn cpu(&self) -> &dyn Cpu;

    /// Page tables and physical page access
    fn mmu(&self) -> &dyn Mmu;

    /// The stack-switch primitive
    fn context(&self) -> &dyn ContextSwitch;

    /// Interrupt vector registration
    fn interrupts(&self) -> &dyn InterruptController;

    /// Console output and keyboard input
    fn console(&self) -> &dyn Console;

    /// Get the architecture name
    fn arch_name(&self) -> &'static str;
}

/// Physical address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Offset within the containing page
    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 % PGSIZE
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

/// Virtual address type (architecture-independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Create a new virtual address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Align the address down to the given alignment
    #[inline]
    pub const fn align_down(self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    /// Start of the page containing this address
    #[inline]
    pub const fn page_base(self) -> Self {
        self.align_down(PGSIZE)
    }

    /// Offset within the containing page
    #[inline]
    pub const fn page_offset(self) -> u64 {
        self.0 % PGSIZE
    }

    /// Whether the address lies below [`PHYS_BASE`]
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < PHYS_BASE
    }

    /// Add an offset, returning `None` on overflow
    #[inline]
    pub const fn checked_add(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Subtract an offset from the address
    #[inline]
    pub const fn sub(self, offset: u64) -> Self {
        Self(self.0 - offset)
    }
}

impl core::fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
