//! # Program Loader Contract
//!
//! A loader turns an open executable into mapped pages in a fresh address
//! space and reports where to start: the entry point and the top of an
//! empty user stack. The argument block is laid out by the caller.

use crate::fs::File;
use crate::usermem::UserMemory;
use crate::{UserError, UserResult};
use corvid_hal::{AddressSpaceId, Mmu, PhysAddr, VirtAddr, PGSIZE, PHYS_BASE};

/// Where a loaded program starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    /// First instruction
    pub entry: VirtAddr,
    /// Initial stack pointer, before arguments are pushed
    pub stack_top: VirtAddr,
}

/// Loads executables into an address space
pub trait ProgramLoader: Send + Sync {
    /// Map `file` into `target`. On error the caller tears the address
    /// space down; pages mapped so far go with it.
    fn load(&self, file: &mut dyn File, target: &LoadTarget<'_>) -> UserResult<LoadedImage>;
}

/// The address space a program is being loaded into
pub struct LoadTarget<'a> {
    mmu: &'a dyn Mmu,
    space: AddressSpaceId,
}

impl<'a> LoadTarget<'a> {
    /// Target `space`
    pub fn new(mmu: &'a dyn Mmu, space: AddressSpaceId) -> Self {
        Self { mmu, space }
    }

    /// The address space being filled
    pub fn space(&self) -> AddressSpaceId {
        self.space
    }

    /// Kernel access to the space
    pub fn memory(&self) -> UserMemory<'a> {
        UserMemory::new(self.mmu, self.space)
    }

    /// Map a fresh zeroed page at `upage`. Fails if `upage` is already
    /// mapped or memory is exhausted.
    pub fn map_zeroed(&self, upage: VirtAddr, writable: bool) -> UserResult<PhysAddr> {
        let kpage = self.mmu.alloc_page().ok_or(UserError::OutOfMemory)?;
        if !self.mmu.map(self.space, upage, kpage, writable) {
            self.mmu.free_page(kpage);
            return Err(UserError::BadAddress);
        }
        Ok(kpage)
    }

    /// Copy `data` into a page returned by [`LoadTarget::map_zeroed`]
    pub fn fill(&self, kpage: PhysAddr, data: &[u8]) {
        debug_assert!(data.len() as u64 <= PGSIZE);
        self.mmu.write_phys(kpage, data);
    }

    /// Map the stack page just below `PHYS_BASE` and return the initial
    /// stack pointer
    pub fn map_stack(&self) -> UserResult<VirtAddr> {
        self.map_zeroed(VirtAddr::new(PHYS_BASE - PGSIZE), true)?;
        Ok(VirtAddr::new(PHYS_BASE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_hal::host::HostPlatform;
    use corvid_hal::Platform;

    #[test]
    fn test_map_stack_once() {
        let platform = HostPlatform::new();
        let mmu = platform.mmu();
        let space = mmu.create().unwrap();
        let target = LoadTarget::new(mmu, space);

        assert_eq!(target.map_stack().unwrap(), VirtAddr::new(PHYS_BASE));
        assert!(platform.memory().is_writable(space, VirtAddr::new(PHYS_BASE - 4)));
        let before = platform.memory().live_pages();
        assert_eq!(target.map_stack(), Err(UserError::BadAddress));
        assert_eq!(platform.memory().live_pages(), before);
    }

    #[test]
    fn test_out_of_pages() {
        let platform = HostPlatform::with_page_limit(1);
        let mmu = platform.mmu();
        let space = mmu.create().unwrap();
        let target = LoadTarget::new(mmu, space);
        assert_eq!(target.map_zeroed(VirtAddr::new(0x0804_8000), false), Err(UserError::OutOfMemory));
    }
}
