//! # Corvid Userspace Subsystem
//!
//! Everything between a user program and the scheduler:
//! - Process records: launch, wait and exit rendezvous
//! - Per-process file-descriptor tables over a pluggable file system
//! - ELF32 loading and the initial argument stack
//! - The system-call dispatcher and its user-pointer validation
//!
//! ## Key Principle
//!
//! A user program can never take the kernel down. Every pointer it hands
//! over is checked against its own page tables before use, and anything it
//! gets wrong ends only that process, with exit code -1.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod elf;
pub mod environment;
pub mod fd;
pub mod fs;
pub mod loader;
pub mod process;
pub mod syscalls;
pub mod usermem;

use core::sync::atomic::{AtomicU64, Ordering};
use corvid_execution::ExecError;
use corvid_hal::HalError;

// Re-exports
pub use elf::{ElfError, ElfHeader, ElfLoader, ProgramHeader};
pub use environment::CommandLine;
pub use fd::FdTable;
pub use fs::{File, FileSystem, MemFs};
pub use loader::{LoadTarget, LoadedImage, ProgramLoader};
pub use process::{Process, ProcessManager};
pub use syscalls::{Syscall, SyscallDispatcher, SyscallRequest};
pub use usermem::UserMemory;

/// Return value user programs see for any failed call
pub const FAIL: i32 = -1;

/// Userspace subsystem result type
pub type UserResult<T> = Result<T, UserError>;

/// Userspace subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserError {
    /// Malformed executable
    Elf(ElfError),
    /// The program could not be started
    LaunchFailed,
    /// The executable does not exist
    OpenFailed,
    /// A user pointer is outside user space or unmapped
    BadAddress,
    /// The system-call number is not known
    UnknownSyscall(u32),
    /// The argument block does not fit the stack page
    ArgumentsTooLong,
    /// Out of memory
    OutOfMemory,
    /// Thread creation failed
    Exec(ExecError),
}

impl From<ElfError> for UserError {
    fn from(e: ElfError) -> Self {
        UserError::Elf(e)
    }
}

impl From<ExecError> for UserError {
    fn from(e: ExecError) -> Self {
        UserError::Exec(e)
    }
}

impl From<HalError> for UserError {
    fn from(e: HalError) -> Self {
        match e {
            HalError::OutOfMemory => UserError::OutOfMemory,
            HalError::InvalidAddress => UserError::BadAddress,
            _ => UserError::LaunchFailed,
        }
    }
}

impl core::fmt::Display for UserError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Elf(e) => write!(f, "bad executable: {:?}", e),
            Self::LaunchFailed => f.write_str("launch failed"),
            Self::OpenFailed => f.write_str("open failed"),
            Self::BadAddress => f.write_str("bad user address"),
            Self::UnknownSyscall(n) => write!(f, "unknown system call {}", n),
            Self::ArgumentsTooLong => f.write_str("arguments do not fit the stack"),
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::Exec(e) => write!(f, "thread creation failed: {}", e),
        }
    }
}

/// Statistics for userspace subsystem
#[derive(Debug, Default)]
pub struct UserspaceStats {
    /// Processes whose load succeeded
    pub processes_started: AtomicU64,
    /// Launches that failed to load
    pub load_failures: AtomicU64,
    /// Processes that have run their exit path
    pub processes_exited: AtomicU64,
    /// Processes killed for a bad pointer
    pub user_faults: AtomicU64,
}

impl UserspaceStats {
    /// Create new stats
    pub const fn new() -> Self {
        Self {
            processes_started: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            processes_exited: AtomicU64::new(0),
            user_faults: AtomicU64::new(0),
        }
    }

    /// Increment processes started
    pub fn process_started(&self) {
        self.processes_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment load failures
    pub fn load_failed(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment processes exited
    pub fn process_exited(&self) {
        self.processes_exited.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment user faults
    pub fn user_fault(&self) {
        self.user_faults.fetch_add(1, Ordering::Relaxed);
    }
}
