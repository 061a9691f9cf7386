//! # MMU Abstraction
//!
//! Per-process page directories and kernel access to physical pages.

use crate::{HalResult, PhysAddr, VirtAddr};

/// Opaque handle to one page directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(u64);

impl AddressSpaceId {
    /// Wrap a raw handle
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// MMU abstraction trait
pub trait Mmu: Send + Sync {
    /// Create a page directory with only the kernel mappings
    fn create(&self) -> HalResult<AddressSpaceId>;

    /// Load `space` into the MMU; `None` leaves only kernel mappings active
    fn activate(&self, space: Option<AddressSpaceId>);

    /// Currently active page directory
    fn active(&self) -> Option<AddressSpaceId>;

    /// Destroy a page directory and free every user page it maps.
    /// Must not be the active one.
    fn destroy(&self, space: AddressSpaceId);

    /// Map user page `upage` to the kernel page `kpage`.
    /// Fails if `upage` is already mapped or a table cannot be allocated.
    fn map(&self, space: AddressSpaceId, upage: VirtAddr, kpage: PhysAddr, writable: bool) -> bool;

    /// Resolve a user address, or `None` if its page is not mapped
    fn translate(&self, space: AddressSpaceId, vaddr: VirtAddr) -> Option<PhysAddr>;

    /// Allocate one zeroed page
    fn alloc_page(&self) -> Option<PhysAddr>;

    /// Return a page from [`Mmu::alloc_page`]
    fn free_page(&self, page: PhysAddr);

    /// Copy out of physical memory. The range must stay inside one page.
    fn read_phys(&self, addr: PhysAddr, buf: &mut [u8]);

    /// Copy into physical memory. The range must stay inside one page.
    fn write_phys(&self, addr: PhysAddr, data: &[u8]);
}
