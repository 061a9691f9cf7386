//! # User Memory Access
//!
//! The kernel reads and writes user memory through the page tables of the
//! process, one page at a time. An address is usable only if it lies below
//! `PHYS_BASE` and its page is mapped; anything else is
//! [`UserError::BadAddress`].

use crate::{UserError, UserResult};
use alloc::string::String;
use alloc::vec::Vec;
use corvid_hal::{AddressSpaceId, Mmu, PhysAddr, VirtAddr, PGSIZE};

/// A view of one address space from the kernel side
#[derive(Clone, Copy)]
pub struct UserMemory<'a> {
    mmu: &'a dyn Mmu,
    space: Option<AddressSpaceId>,
}

impl<'a> UserMemory<'a> {
    /// View of `space`
    pub fn new(mmu: &'a dyn Mmu, space: AddressSpaceId) -> Self {
        Self { mmu, space: Some(space) }
    }

    /// View of whatever space is active. With none active every access
    /// fails.
    pub fn active(mmu: &'a dyn Mmu) -> Self {
        Self {
            mmu,
            space: mmu.active(),
        }
    }

    /// Kernel-side address of a user byte
    pub fn translate(&self, va: VirtAddr) -> UserResult<PhysAddr> {
        if !va.is_user() {
            return Err(UserError::BadAddress);
        }
        let space = self.space.ok_or(UserError::BadAddress)?;
        self.mmu.translate(space, va).ok_or(UserError::BadAddress)
    }

    /// Check that every page of `[va, va + len)` is a mapped user page
    pub fn check(&self, va: VirtAddr, len: u64) -> UserResult<()> {
        if len == 0 {
            return Ok(());
        }
        let last = va.checked_add(len - 1).ok_or(UserError::BadAddress)?;
        let mut page = va.page_base();
        while page <= last {
            self.translate(page)?;
            page = page.checked_add(PGSIZE).ok_or(UserError::BadAddress)?;
        }
        Ok(())
    }

    /// Copy `buf.len()` bytes out of user memory
    pub fn read(&self, va: VirtAddr, buf: &mut [u8]) -> UserResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let at = va.checked_add(done as u64).ok_or(UserError::BadAddress)?;
            let chunk = chunk_len(at, buf.len() - done);
            let pa = self.translate(at)?;
            self.mmu.read_phys(pa, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Copy `data` into user memory
    pub fn write(&self, va: VirtAddr, data: &[u8]) -> UserResult<()> {
        let mut done = 0;
        while done < data.len() {
            let at = va.checked_add(done as u64).ok_or(UserError::BadAddress)?;
            let chunk = chunk_len(at, data.len() - done);
            let pa = self.translate(at)?;
            self.mmu.write_phys(pa, &data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Read one little-endian word
    pub fn read_u32(&self, va: VirtAddr) -> UserResult<u32> {
        let mut word = [0u8; 4];
        self.read(va, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Write one little-endian word
    pub fn write_u32(&self, va: VirtAddr, value: u32) -> UserResult<()> {
        self.write(va, &value.to_le_bytes())
    }

    /// Read a NUL-terminated string, checking every byte up to the
    /// terminator. Invalid UTF-8 is replaced, not rejected.
    pub fn read_cstr(&self, va: VirtAddr) -> UserResult<String> {
        let mut bytes = Vec::new();
        let mut cursor = va;
        loop {
            let mut byte = [0u8; 1];
            self.read(cursor, &mut byte)?;
            if byte[0] == 0 {
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte[0]);
            cursor = cursor.checked_add(1).ok_or(UserError::BadAddress)?;
        }
    }
}

/// Bytes from `va` to the end of its page, capped at `remaining`
fn chunk_len(va: VirtAddr, remaining: usize) -> usize {
    let to_page_end = (PGSIZE - va.page_offset()) as usize;
    remaining.min(to_page_end)
}
