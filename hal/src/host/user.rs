//! Simulated user mode.
//!
//! A user program only sees its own address space and the trap gate.

use super::HostPlatform;
use crate::interrupts::{SYSCALL_VECTOR, TrapFrame};
use crate::{Mmu, VirtAddr, PGSIZE};

/// Gap left between the initial stack pointer and the scratch area
const RED_ZONE: u64 = 64;

/// What a running user program can touch
pub struct UserContext<'a> {
    platform: &'a HostPlatform,
    initial_esp: VirtAddr,
    scratch: VirtAddr,
}

impl<'a> UserContext<'a> {
    pub(crate) fn new(platform: &'a HostPlatform, esp: VirtAddr) -> Self {
        Self {
            platform,
            initial_esp: esp,
            scratch: esp.sub(RED_ZONE).align_down(4),
        }
    }

    /// Stack pointer the program was started with
    pub fn initial_stack(&self) -> VirtAddr {
        self.initial_esp
    }

    /// Read a word of user memory, `None` if unmapped
    pub fn read_u32(&self, va: VirtAddr) -> Option<u32> {
        let bytes = self.read_bytes(va, 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read user memory, `None` if any byte is unmapped
    pub fn read_bytes(&self, va: VirtAddr, len: usize) -> Option<Vec<u8>> {
        let mmu = self.platform.memory();
        let space = mmu.active()?;
        let mut out = vec![0u8; len];
        for (i, byte) in out.iter_mut().enumerate() {
            let pa = mmu.translate(space, va.checked_add(i as u64)?)?;
            let mut one = [0u8; 1];
            mmu.read_phys(pa, &mut one);
            *byte = one[0];
        }
        Some(out)
    }

    /// Read a NUL-terminated string
    pub fn read_cstr(&self, va: VirtAddr) -> Option<String> {
        let mut bytes = Vec::new();
        let mut cursor = va;
        loop {
            let byte = self.read_bytes(cursor, 1)?[0];
            if byte == 0 {
                return String::from_utf8(bytes).ok();
            }
            bytes.push(byte);
            cursor = cursor.add(1);
        }
    }

    /// Write user memory, `false` if any byte is unmapped
    pub fn write_bytes(&self, va: VirtAddr, data: &[u8]) -> bool {
        let mmu = self.platform.memory();
        let Some(space) = mmu.active() else {
            return false;
        };
        for (i, byte) in data.iter().enumerate() {
            let Some(pa) = va.checked_add(i as u64).and_then(|a| mmu.translate(space, a)) else {
                return false;
            };
            mmu.write_phys(pa, &[*byte]);
        }
        true
    }

    /// `argc`/`argv` as laid out on the initial stack
    pub fn args(&self) -> Vec<String> {
        let esp = self.initial_esp;
        let argc = self.read_u32(esp.add(4)).expect("argc is mapped");
        let argv = VirtAddr::new(u64::from(self.read_u32(esp.add(8)).expect("argv is mapped")));
        (0..u64::from(argc))
            .map(|i| {
                let ptr = self.read_u32(argv.add(i * 4)).expect("argv slot is mapped");
                self.read_cstr(VirtAddr::new(u64::from(ptr))).expect("argument string is mapped")
            })
            .collect()
    }

    /// Copy bytes onto the stack below the argument block
    pub fn push_bytes(&mut self, data: &[u8]) -> VirtAddr {
        let len = (data.len() as u64 + 3) & !3;
        let floor = self.initial_esp.sub(1).page_base();
        assert!(
            self.scratch.as_u64() >= floor.as_u64() + len,
            "user program overflowed its stack page"
        );
        self.scratch = self.scratch.sub(len);
        assert!(self.write_bytes(self.scratch, data), "user stack is unmapped");
        self.scratch
    }

    /// Copy a NUL-terminated string onto the stack
    pub fn push_str(&mut self, s: &str) -> VirtAddr {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.push_bytes(&bytes)
    }

    /// Push `words` as a system-call frame and trap
    pub fn syscall(&mut self, words: &[u32]) -> u32 {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let frame = self.push_bytes(&bytes);
        let result = self.trap(frame);
        self.scratch = frame.add(bytes.len() as u64);
        result
    }

    /// Trap with an arbitrary stack pointer
    pub fn trap(&mut self, esp: VirtAddr) -> u32 {
        let mut frame = TrapFrame::new(SYSCALL_VECTOR, esp);
        self.platform.raise(&mut frame);
        frame.eax
    }

    /// Scratch space left on the stack page
    pub fn scratch_left(&self) -> u64 {
        self.scratch.as_u64() - self.initial_esp.sub(1).page_base().as_u64()
    }
}

const _: () = assert!(RED_ZONE < PGSIZE);
