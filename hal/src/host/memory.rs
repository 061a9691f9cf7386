//! Simulated physical pages and page directories.

use super::lock;
use crate::mmu::{AddressSpaceId, Mmu};
use crate::{HalError, HalResult, PhysAddr, VirtAddr, PGSIZE};
use std::collections::BTreeMap;
use std::sync::Mutex;

const FIRST_FRAME: u64 = 0x0010_0000;

#[derive(Clone, Copy)]
struct Mapping {
    frame: PhysAddr,
    writable: bool,
}

struct Directory {
    /// Page holding the directory itself
    root: PhysAddr,
    pages: BTreeMap<u64, Mapping>,
}

#[derive(Default)]
struct MemoryState {
    frames: BTreeMap<u64, Box<[u8]>>,
    next_frame: u64,
    directories: BTreeMap<u64, Directory>,
    next_directory: u64,
    active: Option<AddressSpaceId>,
}

impl MemoryState {
    fn alloc(&mut self, limit: Option<usize>) -> Option<PhysAddr> {
        if limit.is_some_and(|limit| self.frames.len() >= limit) {
            return None;
        }
        let addr = FIRST_FRAME + self.next_frame * PGSIZE;
        self.next_frame += 1;
        self.frames.insert(addr, vec![0u8; PGSIZE as usize].into_boxed_slice());
        Some(PhysAddr::new(addr))
    }

    fn frame(&mut self, addr: PhysAddr, len: usize) -> &mut [u8] {
        let offset = addr.page_offset() as usize;
        assert!(offset + len <= PGSIZE as usize, "host: access crosses page boundary at {:#x}", addr.as_u64());
        match self.frames.get_mut(&(addr.as_u64() - addr.page_offset())) {
            Some(frame) => &mut frame[offset..offset + len],
            None => panic!("host: access to unallocated frame {:#x}", addr.as_u64()),
        }
    }
}

/// Page-table simulator with a bounded frame pool
pub struct HostMemory {
    state: Mutex<MemoryState>,
    limit: Option<usize>,
}

impl HostMemory {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            limit,
        }
    }

    /// Frames currently allocated
    pub fn live_pages(&self) -> usize {
        lock(&self.state).frames.len()
    }

    /// Page directories currently alive
    pub fn live_spaces(&self) -> usize {
        lock(&self.state).directories.len()
    }

    /// Whether `vaddr` is mapped writable in `space`
    pub fn is_writable(&self, space: AddressSpaceId, vaddr: VirtAddr) -> bool {
        lock(&self.state)
            .directories
            .get(&space.as_u64())
            .and_then(|dir| dir.pages.get(&vaddr.page_base().as_u64()))
            .is_some_and(|m| m.writable)
    }
}

impl Mmu for HostMemory {
    fn create(&self) -> HalResult<AddressSpaceId> {
        let mut state = lock(&self.state);
        let root = state.alloc(self.limit).ok_or(HalError::OutOfMemory)?;
        state.next_directory += 1;
        let id = state.next_directory;
        state.directories.insert(id, Directory { root, pages: BTreeMap::new() });
        Ok(AddressSpaceId::new(id))
    }

    fn activate(&self, space: Option<AddressSpaceId>) {
        let mut state = lock(&self.state);
        if let Some(space) = space {
            assert!(state.directories.contains_key(&space.as_u64()), "host: activating destroyed {:?}", space);
        }
        state.active = space;
    }

    fn active(&self) -> Option<AddressSpaceId> {
        lock(&self.state).active
    }

    fn destroy(&self, space: AddressSpaceId) {
        let mut state = lock(&self.state);
        assert_ne!(state.active, Some(space), "host: destroying the active page directory");
        if let Some(dir) = state.directories.remove(&space.as_u64()) {
            for mapping in dir.pages.values() {
                state.frames.remove(&mapping.frame.as_u64());
            }
            state.frames.remove(&dir.root.as_u64());
        }
    }

    fn map(&self, space: AddressSpaceId, upage: VirtAddr, kpage: PhysAddr, writable: bool) -> bool {
        if !upage.is_aligned(PGSIZE) || !upage.is_user() {
            return false;
        }
        let mut state = lock(&self.state);
        let Some(dir) = state.directories.get_mut(&space.as_u64()) else {
            return false;
        };
        if dir.pages.contains_key(&upage.as_u64()) {
            return false;
        }
        dir.pages.insert(upage.as_u64(), Mapping { frame: kpage, writable });
        true
    }

    fn translate(&self, space: AddressSpaceId, vaddr: VirtAddr) -> Option<PhysAddr> {
        if !vaddr.is_user() {
            return None;
        }
        let state = lock(&self.state);
        let dir = state.directories.get(&space.as_u64())?;
        dir.pages
            .get(&vaddr.page_base().as_u64())
            .map(|m| m.frame.add(vaddr.page_offset()))
    }

    fn alloc_page(&self) -> Option<PhysAddr> {
        lock(&self.state).alloc(self.limit)
    }

    fn free_page(&self, page: PhysAddr) {
        lock(&self.state).frames.remove(&page.as_u64());
    }

    fn read_phys(&self, addr: PhysAddr, buf: &mut [u8]) {
        let mut state = lock(&self.state);
        buf.copy_from_slice(state.frame(addr, buf.len()));
    }

    fn write_phys(&self, addr: PhysAddr, data: &[u8]) {
        let mut state = lock(&self.state);
        state.frame(addr, data.len()).copy_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_translate_destroy() {
        let mem = HostMemory::new(None);
        let space = mem.create().unwrap();
        let page = mem.alloc_page().unwrap();
        let upage = VirtAddr::new(0xBFFF_F000);
        assert!(mem.map(space, upage, page, true));
        assert!(!mem.map(space, upage, page, true));

        let pa = mem.translate(space, VirtAddr::new(0xBFFF_F010)).unwrap();
        mem.write_phys(pa, b"abc");
        let mut buf = [0u8; 3];
        mem.read_phys(page.add(0x10), &mut buf);
        assert_eq!(&buf, b"abc");
        assert_eq!(mem.translate(space, VirtAddr::new(0x1000)), None);
        assert_eq!(mem.translate(space, VirtAddr::new(0xC000_0000)), None);

        assert_eq!(mem.live_pages(), 2);
        mem.destroy(space);
        assert_eq!(mem.live_pages(), 0);
    }

    #[test]
    fn test_page_limit() {
        let mem = HostMemory::new(Some(1));
        let first = mem.alloc_page();
        assert!(first.is_some());
        assert!(mem.alloc_page().is_none());
        mem.free_page(first.unwrap());
        assert!(mem.alloc_page().is_some());
    }
}
