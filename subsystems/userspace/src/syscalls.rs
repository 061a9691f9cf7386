//! # Syscall Interface
//!
//! ## Syscall Convention (i386, `int $0x30`)
//! - The user stack pointer points at the request: word 0 is the syscall
//!   number, the arguments follow, all 32-bit little-endian
//! - Return: `eax` (-1 = error)
//!
//! Every word read from the frame, every string up to its terminator and
//! every page of a buffer is checked against the caller's page tables
//! first. A bad pointer kills the caller with exit code -1; an unknown
//! number is logged and ignored.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec;
use core::sync::atomic::{AtomicU64, Ordering};
use corvid_execution::ThreadId;
use corvid_hal::interrupts::SYSCALL_VECTOR;
use corvid_hal::{Platform, TrapFrame, VirtAddr};
use static_assertions::const_assert_eq;

use crate::fd::{Fd, STDIN_FD, STDOUT_FD};
use crate::process::ProcessManager;
use crate::usermem::UserMemory;
use crate::{UserError, UserResult, FAIL};

/// Syscall numbers
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Power off
    Halt = 0,
    /// Terminate the calling process
    Exit = 1,
    /// Launch a program
    Exec = 2,
    /// Wait for a child
    Wait = 3,
    /// Create file
    Create = 4,
    /// Remove file
    Remove = 5,
    /// Open file
    Open = 6,
    /// Size of an open file
    Filesize = 7,
    /// Read from file descriptor
    Read = 8,
    /// Write to file descriptor
    Write = 9,
    /// Seek
    Seek = 10,
    /// Current position
    Tell = 11,
    /// Close file descriptor
    Close = 12,
    /// Returns its argument plus one
    Null = 13,
}

/// Number of syscalls
pub const SYSCALL_COUNT: usize = 14;

const_assert_eq!(SYSCALL_COUNT, Syscall::Null as usize + 1);

impl Syscall {
    /// Convert from number
    pub fn from_num(num: u32) -> Option<Self> {
        match num {
            0 => Some(Syscall::Halt),
            1 => Some(Syscall::Exit),
            2 => Some(Syscall::Exec),
            3 => Some(Syscall::Wait),
            4 => Some(Syscall::Create),
            5 => Some(Syscall::Remove),
            6 => Some(Syscall::Open),
            7 => Some(Syscall::Filesize),
            8 => Some(Syscall::Read),
            9 => Some(Syscall::Write),
            10 => Some(Syscall::Seek),
            11 => Some(Syscall::Tell),
            12 => Some(Syscall::Close),
            13 => Some(Syscall::Null),
            _ => None,
        }
    }

    /// Argument words following the number
    pub fn arg_count(self) -> u64 {
        match self {
            Syscall::Halt => 0,
            Syscall::Read | Syscall::Write => 3,
            Syscall::Create | Syscall::Seek => 2,
            _ => 1,
        }
    }
}

/// A decoded request, every pointer already checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallRequest {
    /// Power off
    Halt,
    /// Terminate with `status`
    Exit {
        /// Exit code
        status: i32,
    },
    /// Launch `cmd_line`
    Exec {
        /// Program name and arguments
        cmd_line: String,
    },
    /// Wait for the child on `tid`
    Wait {
        /// Child thread
        tid: ThreadId,
    },
    /// Create a file
    Create {
        /// File name
        path: String,
        /// Size in bytes
        initial_size: u32,
    },
    /// Remove a file
    Remove {
        /// File name
        path: String,
    },
    /// Open a file
    Open {
        /// File name
        path: String,
    },
    /// Size of an open file
    Filesize {
        /// Descriptor
        fd: Fd,
    },
    /// Read into user memory
    Read {
        /// Descriptor
        fd: Fd,
        /// Destination
        buffer: VirtAddr,
        /// Bytes wanted
        size: u32,
    },
    /// Write from user memory
    Write {
        /// Descriptor
        fd: Fd,
        /// Source
        buffer: VirtAddr,
        /// Bytes offered
        size: u32,
    },
    /// Move the position
    Seek {
        /// Descriptor
        fd: Fd,
        /// New position
        position: u32,
    },
    /// Current position
    Tell {
        /// Descriptor
        fd: Fd,
    },
    /// Close a descriptor
    Close {
        /// Descriptor
        fd: Fd,
    },
    /// Returns `value + 1`
    Null {
        /// Argument
        value: u32,
    },
}

impl SyscallRequest {
    /// Decode the frame at `esp`
    pub fn decode(mem: &UserMemory<'_>, esp: VirtAddr) -> UserResult<Self> {
        let number = mem.read_u32(esp)?;
        let syscall = Syscall::from_num(number).ok_or(UserError::UnknownSyscall(number))?;
        mem.check(esp, 4 * (1 + syscall.arg_count()))?;

        let arg = |n: u64| -> UserResult<u32> {
            let at = esp.checked_add(4 * n).ok_or(UserError::BadAddress)?;
            mem.read_u32(at)
        };
        let string = |n: u64| -> UserResult<String> { mem.read_cstr(VirtAddr::new(u64::from(arg(n)?))) };
        let buffer = |n: u64, size: u32| -> UserResult<VirtAddr> {
            let buffer = VirtAddr::new(u64::from(arg(n)?));
            mem.check(buffer, u64::from(size))?;
            Ok(buffer)
        };

        let request = match syscall {
            Syscall::Halt => Self::Halt,
            Syscall::Exit => Self::Exit { status: arg(1)? as i32 },
            Syscall::Exec => Self::Exec { cmd_line: string(1)? },
            Syscall::Wait => Self::Wait {
                tid: ThreadId::new(arg(1)?),
            },
            Syscall::Create => Self::Create {
                path: string(1)?,
                initial_size: arg(2)?,
            },
            Syscall::Remove => Self::Remove { path: string(1)? },
            Syscall::Open => Self::Open { path: string(1)? },
            Syscall::Filesize => Self::Filesize { fd: arg(1)? },
            Syscall::Read => {
                let size = arg(3)?;
                Self::Read {
                    fd: arg(1)?,
                    buffer: buffer(2, size)?,
                    size,
                }
            }
            Syscall::Write => {
                let size = arg(3)?;
                Self::Write {
                    fd: arg(1)?,
                    buffer: buffer(2, size)?,
                    size,
                }
            }
            Syscall::Seek => Self::Seek {
                fd: arg(1)?,
                position: arg(2)?,
            },
            Syscall::Tell => Self::Tell { fd: arg(1)? },
            Syscall::Close => Self::Close { fd: arg(1)? },
            Syscall::Null => Self::Null { value: arg(1)? },
        };
        Ok(request)
    }

    /// Which syscall this is
    pub fn syscall(&self) -> Syscall {
        match self {
            Self::Halt => Syscall::Halt,
            Self::Exit { .. } => Syscall::Exit,
            Self::Exec { .. } => Syscall::Exec,
            Self::Wait { .. } => Syscall::Wait,
            Self::Create { .. } => Syscall::Create,
            Self::Remove { .. } => Syscall::Remove,
            Self::Open { .. } => Syscall::Open,
            Self::Filesize { .. } => Syscall::Filesize,
            Self::Read { .. } => Syscall::Read,
            Self::Write { .. } => Syscall::Write,
            Self::Seek { .. } => Syscall::Seek,
            Self::Tell { .. } => Syscall::Tell,
            Self::Close { .. } => Syscall::Close,
            Self::Null { .. } => Syscall::Null,
        }
    }
}

fn flag(ok: bool) -> u32 {
    u32::from(ok)
}

fn fail() -> u32 {
    FAIL as u32
}

/// Routes trapped requests to the process layer and the file system
pub struct SyscallDispatcher {
    processes: Arc<ProcessManager>,
    call_counts: [AtomicU64; SYSCALL_COUNT],
    unknown: AtomicU64,
}

impl core::fmt::Debug for SyscallDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyscallDispatcher")
            .field("unknown", &self.unknown.load(Ordering::Relaxed))
            .finish()
    }
}

impl SyscallDispatcher {
    /// Create a dispatcher
    pub fn new(processes: Arc<ProcessManager>) -> Arc<Self> {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Arc::new(Self {
            processes,
            call_counts: [ZERO; SYSCALL_COUNT],
            unknown: AtomicU64::new(0),
        })
    }

    /// Install on the syscall vector
    pub fn install(self: &Arc<Self>) -> UserResult<()> {
        let dispatcher: Weak<Self> = Arc::downgrade(self);
        let handler = Arc::new(move |frame: &mut TrapFrame| {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.handle(frame);
            }
        });
        self.platform().interrupts().register(SYSCALL_VECTOR, handler)?;
        log::info!("syscalls: installed on vector {:#x}", SYSCALL_VECTOR);
        Ok(())
    }

    fn platform(&self) -> &dyn Platform {
        self.processes.scheduler().platform().as_ref()
    }

    /// Handle one trap. Does not return if the request ends the caller.
    pub fn handle(&self, frame: &mut TrapFrame) {
        let mem = UserMemory::active(self.platform().mmu());
        match SyscallRequest::decode(&mem, frame.esp) {
            Ok(request) => {
                self.call_counts[request.syscall() as usize].fetch_add(1, Ordering::Relaxed);
                frame.eax = self.dispatch(request, &mem);
            }
            Err(UserError::UnknownSyscall(number)) => {
                self.unknown.fetch_add(1, Ordering::Relaxed);
                log::warn!("unhandled system call number {} from thread {}", number, self.processes.scheduler().current());
            }
            Err(err) => self.processes.fault(err),
        }
    }

    /// Times `syscall` has been dispatched
    pub fn get_count(&self, syscall: Syscall) -> u64 {
        self.call_counts[syscall as usize].load(Ordering::Relaxed)
    }

    /// Requests with a number nobody knows
    pub fn unknown_count(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }

    fn dispatch(&self, request: SyscallRequest, mem: &UserMemory<'_>) -> u32 {
        match request {
            SyscallRequest::Halt => {
                self.platform().cpu().power_off();
                0
            }
            SyscallRequest::Exit { status } => self.processes.exit(status),
            SyscallRequest::Exec { cmd_line } => match self.processes.execute(&cmd_line) {
                Ok(tid) => tid.as_u32(),
                Err(_) => fail(),
            },
            SyscallRequest::Wait { tid } => self.processes.wait(tid) as u32,
            SyscallRequest::Create { path, initial_size } => {
                self.with_file_lock(|fs| flag(fs.create(&path, u64::from(initial_size))))
            }
            SyscallRequest::Remove { path } => self.with_file_lock(|fs| flag(fs.remove(&path))),
            SyscallRequest::Open { path } => self.with_file_lock(|fs| match fs.open(&path) {
                Some(file) => self.processes.current().with_files(|files| files.insert(file)),
                None => fail(),
            }),
            SyscallRequest::Filesize { fd } => self.with_fd(fd, |file| file.length() as u32).unwrap_or_else(fail),
            SyscallRequest::Read { fd, buffer, size } => self.read(mem, fd, buffer, size),
            SyscallRequest::Write { fd, buffer, size } => self.write(mem, fd, buffer, size),
            SyscallRequest::Seek { fd, position } => {
                self.with_fd(fd, |file| file.seek(u64::from(position)));
                0
            }
            SyscallRequest::Tell { fd } => self.with_fd(fd, |file| file.tell() as u32).unwrap_or_else(fail),
            SyscallRequest::Close { fd } => {
                let _guard = self.processes.file_lock().lock(self.processes.scheduler());
                let file = self.processes.current().with_files(|files| files.remove(fd));
                drop(file);
                0
            }
            SyscallRequest::Null { value } => value.wrapping_add(1),
        }
    }

    fn with_file_lock<R>(&self, f: impl FnOnce(&dyn crate::fs::FileSystem) -> R) -> R {
        let _guard = self.processes.file_lock().lock(self.processes.scheduler());
        f(self.processes.file_system())
    }

    /// Run `f` on the open file `fd` under the file lock
    fn with_fd<R>(&self, fd: Fd, f: impl FnOnce(&mut dyn crate::fs::File) -> R) -> Option<R> {
        let _guard = self.processes.file_lock().lock(self.processes.scheduler());
        self.processes.current().with_files(|files| files.get(fd).map(|file| f(file)))
    }

    fn read(&self, mem: &UserMemory<'_>, fd: Fd, buffer: VirtAddr, size: u32) -> u32 {
        let mut data = vec![0u8; size as usize];
        let count = match fd {
            STDIN_FD => {
                let console = self.platform().console();
                for byte in data.iter_mut() {
                    *byte = console.read_byte();
                }
                data.len()
            }
            STDOUT_FD => return fail(),
            _ => match self.with_fd(fd, |file| file.read(&mut data)) {
                Some(count) => count,
                None => return fail(),
            },
        };
        if let Err(err) = mem.write(buffer, &data[..count]) {
            drop(data);
            self.processes.fault(err);
        }
        count as u32
    }

    fn write(&self, mem: &UserMemory<'_>, fd: Fd, buffer: VirtAddr, size: u32) -> u32 {
        let mut data = vec![0u8; size as usize];
        if let Err(err) = mem.read(buffer, &mut data) {
            drop(data);
            self.processes.fault(err);
        }
        match fd {
            STDOUT_FD => {
                self.platform().console().write_bytes(&data);
                size
            }
            STDIN_FD => fail(),
            _ => self.with_fd(fd, |file| file.write(&data) as u32).unwrap_or_else(fail),
        }
    }
}
