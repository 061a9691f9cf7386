//! Shared harness: a booted kernel on the host platform plus thin wrappers
//! that user programs use to trap into it.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use corvid_execution::{Scheduler, SchedulerConfig};
use corvid_hal::host::{HostPlatform, UserContext};
use corvid_hal::{VirtAddr, PGSIZE};
use corvid_userspace::elf::{
    ELFCLASS32, ELFDATA2LSB, ELF_HEADER_SIZE, ELF_MAGIC, EM_386, ET_EXEC, EV_CURRENT, PROGRAM_HEADER_SIZE, PT_LOAD,
};
use corvid_userspace::{ElfLoader, MemFs, ProcessManager, Syscall, SyscallDispatcher};

/// Where every test program's single segment is loaded
pub const CODE_BASE: u64 = 0x0804_8000;

pub struct Kernel {
    pub platform: Arc<HostPlatform>,
    pub sched: Arc<Scheduler>,
    pub fs: Arc<MemFs>,
    pub processes: Arc<ProcessManager>,
    pub syscalls: Arc<SyscallDispatcher>,
    next_entry: AtomicU64,
}

pub fn boot() -> Kernel {
    let platform = HostPlatform::new();
    let sched = Scheduler::boot(platform.clone(), SchedulerConfig::strict());
    sched.start().unwrap();
    let fs = Arc::new(MemFs::new());
    let processes = ProcessManager::new(sched.clone(), fs.clone(), Arc::new(ElfLoader::new()));
    let syscalls = SyscallDispatcher::new(processes.clone());
    syscalls.install().unwrap();
    Kernel {
        platform,
        sched,
        fs,
        processes,
        syscalls,
        next_entry: AtomicU64::new(CODE_BASE + 0x100),
    }
}

impl Kernel {
    /// Put an executable called `name` on disk whose code is `program`
    pub fn install<F>(&self, name: &str, program: F)
    where
        F: Fn(&mut UserContext<'_>) + Send + Sync + 'static,
    {
        let entry = self.next_entry.fetch_add(0x10, Ordering::Relaxed);
        self.fs.insert(name, &executable(entry as u32));
        self.platform.register_program(VirtAddr::new(entry), program);
    }

    pub fn console(&self) -> String {
        self.platform.console_output()
    }
}

fn put16(data: &mut [u8], at: usize, v: u16) {
    data[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(data: &mut [u8], at: usize, v: u32) {
    data[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// ELF32 image with one read-execute segment covering the first code page
pub fn executable(entry: u32) -> Vec<u8> {
    let len = ELF_HEADER_SIZE + PROGRAM_HEADER_SIZE;
    let mut data = vec![0u8; len];
    data[0..4].copy_from_slice(&ELF_MAGIC);
    data[4] = ELFCLASS32;
    data[5] = ELFDATA2LSB;
    data[6] = EV_CURRENT;
    put16(&mut data, 16, ET_EXEC);
    put16(&mut data, 18, EM_386);
    put32(&mut data, 20, 1);
    put32(&mut data, 24, entry);
    put32(&mut data, 28, ELF_HEADER_SIZE as u32);
    put16(&mut data, 40, ELF_HEADER_SIZE as u16);
    put16(&mut data, 42, PROGRAM_HEADER_SIZE as u16);
    put16(&mut data, 44, 1);

    let ph = ELF_HEADER_SIZE;
    put32(&mut data, ph, PT_LOAD);
    put32(&mut data, ph + 4, 0);
    put32(&mut data, ph + 8, CODE_BASE as u32);
    put32(&mut data, ph + 12, CODE_BASE as u32);
    put32(&mut data, ph + 16, len as u32);
    put32(&mut data, ph + 20, PGSIZE as u32);
    put32(&mut data, ph + 24, 0b101);
    put32(&mut data, ph + 28, PGSIZE as u32);
    data
}

// System-call wrappers, as a user C library would have them.

pub fn halt(user: &mut UserContext<'_>) {
    user.syscall(&[Syscall::Halt as u32]);
}

pub fn exit(user: &mut UserContext<'_>, status: i32) -> ! {
    user.syscall(&[Syscall::Exit as u32, status as u32]);
    unreachable!("exit returned");
}

pub fn exec(user: &mut UserContext<'_>, cmd_line: &str) -> i32 {
    let cmd = user.push_str(cmd_line);
    user.syscall(&[Syscall::Exec as u32, addr(cmd)]) as i32
}

pub fn wait(user: &mut UserContext<'_>, pid: i32) -> i32 {
    user.syscall(&[Syscall::Wait as u32, pid as u32]) as i32
}

pub fn create(user: &mut UserContext<'_>, path: &str, size: u32) -> bool {
    let path = user.push_str(path);
    user.syscall(&[Syscall::Create as u32, addr(path), size]) != 0
}

pub fn remove(user: &mut UserContext<'_>, path: &str) -> bool {
    let path = user.push_str(path);
    user.syscall(&[Syscall::Remove as u32, addr(path)]) != 0
}

pub fn open(user: &mut UserContext<'_>, path: &str) -> i32 {
    let path = user.push_str(path);
    user.syscall(&[Syscall::Open as u32, addr(path)]) as i32
}

pub fn filesize(user: &mut UserContext<'_>, fd: i32) -> i32 {
    user.syscall(&[Syscall::Filesize as u32, fd as u32]) as i32
}

pub fn read(user: &mut UserContext<'_>, fd: i32, size: usize) -> (i32, Vec<u8>) {
    let buffer = user.push_bytes(&vec![0u8; size]);
    let count = user.syscall(&[Syscall::Read as u32, fd as u32, addr(buffer), size as u32]) as i32;
    let data = user.read_bytes(buffer, size).unwrap_or_default();
    (count, data)
}

pub fn write(user: &mut UserContext<'_>, fd: i32, data: &[u8]) -> i32 {
    let buffer = user.push_bytes(data);
    user.syscall(&[Syscall::Write as u32, fd as u32, addr(buffer), data.len() as u32]) as i32
}

pub fn seek(user: &mut UserContext<'_>, fd: i32, position: u32) {
    user.syscall(&[Syscall::Seek as u32, fd as u32, position]);
}

pub fn tell(user: &mut UserContext<'_>, fd: i32) -> i32 {
    user.syscall(&[Syscall::Tell as u32, fd as u32]) as i32
}

pub fn close(user: &mut UserContext<'_>, fd: i32) {
    user.syscall(&[Syscall::Close as u32, fd as u32]);
}

pub fn null(user: &mut UserContext<'_>, value: u32) -> u32 {
    user.syscall(&[Syscall::Null as u32, value])
}

pub fn addr(va: VirtAddr) -> u32 {
    va.as_u64() as u32
}
