//! # File System Contract
//!
//! What the process layer needs from a file system: path operations and
//! open-file handles. Closing a file is dropping its handle.
//!
//! None of this is thread safe on its own terms; callers serialize every
//! call behind the process manager's file lock.

mod memfs;

pub use memfs::{MemFs, NAME_MAX};

use alloc::boxed::Box;

/// An open file
pub trait File: Send {
    /// Read from the current position, returning the bytes read
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write at the current position, returning the bytes written.
    /// Writes never grow a file, and write nothing while writes are denied.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Move the position; past the end is allowed
    fn seek(&mut self, position: u64);

    /// Current position
    fn tell(&self) -> u64;

    /// Size in bytes
    fn length(&self) -> u64;

    /// Refuse writes to the underlying file until allowed again or this
    /// handle is closed
    fn deny_write(&mut self);

    /// Undo [`File::deny_write`]
    fn allow_write(&mut self);
}

/// Path-level file system operations
pub trait FileSystem: Send + Sync {
    /// Create a file of `initial_size` zero bytes. Fails if it exists.
    fn create(&self, path: &str, initial_size: u64) -> bool;

    /// Unlink a file. Open handles keep working.
    fn remove(&self, path: &str) -> bool;

    /// Open a file
    fn open(&self, path: &str) -> Option<Box<dyn File>>;
}
