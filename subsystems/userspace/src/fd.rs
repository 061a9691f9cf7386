//! # File Descriptor Table
//!
//! Per-process map from small integers to open files. Numbers 0 and 1 are
//! the console and never appear in the table; the first file opened gets 2
//! and numbers are never reused.

use crate::fs::File;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// File descriptor type
pub type Fd = u32;

/// Keyboard
pub const STDIN_FD: Fd = 0;

/// Console
pub const STDOUT_FD: Fd = 1;

/// First descriptor handed out for a file
pub const FIRST_FILE_FD: Fd = 2;

/// File descriptor table
pub struct FdTable {
    entries: BTreeMap<Fd, Box<dyn File>>,
    next_fd: Fd,
}

impl core::fmt::Debug for FdTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FdTable")
            .field("open", &self.entries.keys().collect::<Vec<_>>())
            .field("next_fd", &self.next_fd)
            .finish()
    }
}

impl FdTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_fd: FIRST_FILE_FD,
        }
    }

    /// Install an open file under the next descriptor
    pub fn insert(&mut self, file: Box<dyn File>) -> Fd {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.entries.insert(fd, file);
        fd
    }

    /// The file behind `fd`
    pub fn get(&mut self, fd: Fd) -> Option<&mut (dyn File + 'static)> {
        self.entries.get_mut(&fd).map(|file| file.as_mut())
    }

    /// Take `fd` out of the table. Dropping the result closes the file.
    pub fn remove(&mut self, fd: Fd) -> Option<Box<dyn File>> {
        self.entries.remove(&fd)
    }

    /// Take every open file out of the table
    pub fn drain(&mut self) -> Vec<Box<dyn File>> {
        core::mem::take(&mut self.entries).into_values().collect()
    }

    /// Number of open descriptors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no descriptor is open
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemFs};

    #[test]
    fn test_numbering_starts_at_two() {
        let fs = MemFs::new();
        fs.insert("f", b"x");
        let mut table = FdTable::new();
        assert_eq!(table.insert(fs.open("f").unwrap()), 2);
        assert_eq!(table.insert(fs.open("f").unwrap()), 3);
        assert!(table.remove(2).is_some());
        assert_eq!(table.insert(fs.open("f").unwrap()), 4);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unknown_descriptors() {
        let mut table = FdTable::new();
        assert!(table.get(STDIN_FD).is_none());
        assert!(table.get(STDOUT_FD).is_none());
        assert!(table.remove(7).is_none());
    }

    #[test]
    fn test_drain_closes_everything() {
        let fs = MemFs::new();
        fs.insert("f", b"x");
        let mut table = FdTable::new();
        let mut held = fs.open("f").unwrap();
        held.deny_write();
        table.insert(held);
        table.insert(fs.open("f").unwrap());

        let files = table.drain();
        assert_eq!(files.len(), 2);
        assert!(table.is_empty());
        drop(files);

        let mut writer = fs.open("f").unwrap();
        assert_eq!(writer.write(b"y"), 1);
    }
}
