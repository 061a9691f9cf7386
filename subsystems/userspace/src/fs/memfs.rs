//! In-memory flat file system.

use super::{File, FileSystem};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

/// Longest file name accepted
pub const NAME_MAX: usize = 14;

#[derive(Debug, Default)]
struct Inode {
    data: Vec<u8>,
    deny_write_count: usize,
}

/// Flat, fixed-size-file file system held in kernel memory
#[derive(Debug, Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<String, Arc<Mutex<Inode>>>>,
}

impl MemFs {
    /// Create an empty file system
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `data` at `path`, replacing any earlier file of that name
    pub fn insert(&self, path: &str, data: &[u8]) {
        let inode = Inode {
            data: data.to_vec(),
            deny_write_count: 0,
        };
        self.files.lock().insert(String::from(path), Arc::new(Mutex::new(inode)));
    }

    /// Current contents of `path`
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let inode = self.files.lock().get(path).cloned()?;
        let data = inode.lock().data.clone();
        Some(data)
    }

    /// Whether `path` exists
    pub fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    fn valid_name(path: &str) -> bool {
        !path.is_empty() && path.len() <= NAME_MAX
    }
}

impl FileSystem for MemFs {
    fn create(&self, path: &str, initial_size: u64) -> bool {
        if !Self::valid_name(path) {
            return false;
        }
        let Ok(size) = usize::try_from(initial_size) else {
            return false;
        };
        let mut files = self.files.lock();
        if files.contains_key(path) {
            return false;
        }
        let inode = Inode {
            data: vec![0u8; size],
            deny_write_count: 0,
        };
        files.insert(String::from(path), Arc::new(Mutex::new(inode)));
        true
    }

    fn remove(&self, path: &str) -> bool {
        self.files.lock().remove(path).is_some()
    }

    fn open(&self, path: &str) -> Option<Box<dyn File>> {
        let inode = self.files.lock().get(path).cloned()?;
        Some(Box::new(MemFile {
            inode,
            position: 0,
            denied: false,
        }))
    }
}

struct MemFile {
    inode: Arc<Mutex<Inode>>,
    position: u64,
    denied: bool,
}

impl MemFile {
    fn offset(&self, len: usize) -> Option<usize> {
        usize::try_from(self.position).ok().filter(|&offset| offset < len)
    }
}

impl File for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let inode = self.inode.lock();
        let Some(offset) = self.offset(inode.data.len()) else {
            return 0;
        };
        let n = buf.len().min(inode.data.len() - offset);
        buf[..n].copy_from_slice(&inode.data[offset..offset + n]);
        drop(inode);
        self.position += n as u64;
        n
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let mut inode = self.inode.lock();
        if inode.deny_write_count > 0 {
            return 0;
        }
        let Some(offset) = self.offset(inode.data.len()) else {
            return 0;
        };
        let n = data.len().min(inode.data.len() - offset);
        inode.data[offset..offset + n].copy_from_slice(&data[..n]);
        drop(inode);
        self.position += n as u64;
        n
    }

    fn seek(&mut self, position: u64) {
        self.position = position;
    }

    fn tell(&self) -> u64 {
        self.position
    }

    fn length(&self) -> u64 {
        self.inode.lock().data.len() as u64
    }

    fn deny_write(&mut self) {
        if !self.denied {
            self.denied = true;
            self.inode.lock().deny_write_count += 1;
        }
    }

    fn allow_write(&mut self) {
        if self.denied {
            self.denied = false;
            self.inode.lock().deny_write_count -= 1;
        }
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.allow_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_fixed_size() {
        let fs = MemFs::new();
        assert!(fs.create("data", 4));
        assert!(!fs.create("data", 8));
        assert!(!fs.create("", 1));
        assert!(!fs.create("a-name-far-too-long", 1));

        let mut file = fs.open("data").unwrap();
        assert_eq!(file.length(), 4);
        assert_eq!(file.write(b"abcdef"), 4);
        assert_eq!(file.write(b"g"), 0);
        assert_eq!(fs.contents("data").unwrap(), b"abcd");
    }

    #[test]
    fn test_read_seek_tell() {
        let fs = MemFs::new();
        fs.insert("hello", b"hello world");
        let mut file = fs.open("hello").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(file.read(&mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(file.tell(), 5);

        file.seek(6);
        let mut rest = [0u8; 16];
        assert_eq!(file.read(&mut rest), 5);
        assert_eq!(&rest[..5], b"world");

        file.seek(100);
        assert_eq!(file.read(&mut rest), 0);
        assert_eq!(file.tell(), 100);
    }

    #[test]
    fn test_deny_write_until_closed() {
        let fs = MemFs::new();
        fs.insert("prog", b"\x7fELF");
        let mut exe = fs.open("prog").unwrap();
        exe.deny_write();
        exe.deny_write();

        let mut other = fs.open("prog").unwrap();
        assert_eq!(other.write(b"X"), 0);

        exe.allow_write();
        assert_eq!(other.write(b"X"), 1);

        other.seek(0);
        exe.deny_write();
        drop(exe);
        assert_eq!(other.write(b"Y"), 1);
        assert_eq!(fs.contents("prog").unwrap(), b"YELF");
    }

    #[test]
    fn test_removed_file_stays_open() {
        let fs = MemFs::new();
        fs.insert("gone", b"data");
        let mut file = fs.open("gone").unwrap();
        assert!(fs.remove("gone"));
        assert!(!fs.remove("gone"));
        assert!(fs.open("gone").is_none());

        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf), 4);
        assert_eq!(&buf, b"data");
    }
}
