//! # ELF32 Loader
//!
//! Loads statically linked i386 executables.
//!
//! ## Checks
//! - Header identity: class, byte order, version, type and machine
//! - Every `PT_LOAD` segment: file and memory offsets agree within a page,
//!   the segment lies wholly in user space above page 0, and its file part
//!   exists
//! - Dynamic linking of any kind is refused

use alloc::vec;

use crate::fs::File;
use crate::loader::{LoadTarget, LoadedImage, ProgramLoader};
use crate::UserResult;
use corvid_hal::{VirtAddr, PGSIZE, PHYS_BASE};

/// ELF magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class - 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF data encoding - little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF version
pub const EV_CURRENT: u8 = 1;

/// ELF type - executable
pub const ET_EXEC: u16 = 2;

/// Machine type - i386
pub const EM_386: u16 = 3;

/// Program header type - unused entry
pub const PT_NULL: u32 = 0;

/// Program header type - loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type - dynamic
pub const PT_DYNAMIC: u32 = 2;

/// Program header type - interpreter
pub const PT_INTERP: u32 = 3;

/// Program header type - note
pub const PT_NOTE: u32 = 4;

/// Program header type - reserved
pub const PT_SHLIB: u32 = 5;

/// Program header type - program header table
pub const PT_PHDR: u32 = 6;

/// Program header type - stack segment
pub const PT_STACK: u32 = 0x6474_e551;

/// Size of the executable header
pub const ELF_HEADER_SIZE: usize = 52;

/// Size of one program header
pub const PROGRAM_HEADER_SIZE: usize = 32;

/// Most program headers accepted
pub const MAX_PROGRAM_HEADERS: u16 = 1024;

/// Segment permissions
pub mod flags {
    use bitflags::bitflags;

    bitflags! {
        /// Segment permission bits
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct SegmentFlags: u32 {
            /// Executable
            const EXECUTE = 1 << 0;
            /// Writable
            const WRITE = 1 << 1;
            /// Readable
            const READ = 1 << 2;
        }
    }
}

pub use flags::SegmentFlags;

/// ELF errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Invalid magic number
    InvalidMagic,
    /// Unsupported class (not 32-bit)
    UnsupportedClass,
    /// Unsupported endianness
    UnsupportedEndian,
    /// Unsupported version
    UnsupportedVersion,
    /// Not an executable
    UnsupportedType,
    /// Unsupported machine
    UnsupportedMachine,
    /// Program header table is malformed or too large
    InvalidProgramHeader,
    /// The program wants dynamic linking
    UnsupportedSegment,
    /// A loadable segment is out of bounds
    InvalidSegment,
    /// The file ends early
    Truncated,
}

/// ELF32 Header
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    /// Magic number and identification
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point address
    pub e_entry: u32,
    /// Program header offset
    pub e_phoff: u32,
    /// Program header entry size
    pub e_phentsize: u16,
    /// Number of program headers
    pub e_phnum: u16,
}

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn u32_at(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

impl ElfHeader {
    /// Parse and check the executable header
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < ELF_HEADER_SIZE {
            return Err(ElfError::Truncated);
        }

        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if data[4] != ELFCLASS32 {
            return Err(ElfError::UnsupportedClass);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEndian);
        }
        if data[6] != EV_CURRENT {
            return Err(ElfError::UnsupportedVersion);
        }

        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&data[0..16]);
        let header = Self {
            e_ident,
            e_type: u16_at(data, 16),
            e_machine: u16_at(data, 18),
            e_version: u32_at(data, 20),
            e_entry: u32_at(data, 24),
            e_phoff: u32_at(data, 28),
            e_phentsize: u16_at(data, 42),
            e_phnum: u16_at(data, 44),
        };

        if header.e_type != ET_EXEC {
            return Err(ElfError::UnsupportedType);
        }
        if header.e_machine != EM_386 {
            return Err(ElfError::UnsupportedMachine);
        }
        if header.e_version != u32::from(EV_CURRENT) {
            return Err(ElfError::UnsupportedVersion);
        }
        if usize::from(header.e_phentsize) != PROGRAM_HEADER_SIZE || header.e_phnum > MAX_PROGRAM_HEADERS {
            return Err(ElfError::InvalidProgramHeader);
        }
        Ok(header)
    }

    /// Get entry point
    pub fn entry_point(&self) -> VirtAddr {
        VirtAddr::new(u64::from(self.e_entry))
    }
}

/// ELF32 Program Header
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Offset in file
    pub p_offset: u32,
    /// Virtual address
    pub p_vaddr: u32,
    /// Size in file
    pub p_filesz: u32,
    /// Size in memory
    pub p_memsz: u32,
    /// Segment flags
    pub p_flags: u32,
}

impl ProgramHeader {
    /// Parse program header from bytes
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < PROGRAM_HEADER_SIZE {
            return Err(ElfError::Truncated);
        }
        Ok(Self {
            p_type: u32_at(data, 0),
            p_offset: u32_at(data, 4),
            p_vaddr: u32_at(data, 8),
            p_filesz: u32_at(data, 16),
            p_memsz: u32_at(data, 20),
            p_flags: u32_at(data, 24),
        })
    }

    /// Check if segment is loadable
    pub fn is_loadable(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Permission bits
    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.p_flags)
    }

    /// Check if segment is writable
    pub fn is_writable(&self) -> bool {
        self.flags().contains(SegmentFlags::WRITE)
    }

    /// Check a loadable segment against a file of `file_len` bytes
    pub fn validate(&self, file_len: u64) -> Result<(), ElfError> {
        let offset = u64::from(self.p_offset);
        let vaddr = u64::from(self.p_vaddr);
        let memsz = u64::from(self.p_memsz);

        if offset % PGSIZE != vaddr % PGSIZE {
            return Err(ElfError::InvalidSegment);
        }
        if offset > file_len {
            return Err(ElfError::InvalidSegment);
        }
        if self.p_memsz < self.p_filesz || self.p_memsz == 0 {
            return Err(ElfError::InvalidSegment);
        }
        // Page 0 stays unmapped so null pointers fault.
        if vaddr < PGSIZE || vaddr + memsz >= PHYS_BASE {
            return Err(ElfError::InvalidSegment);
        }
        Ok(())
    }
}

/// Loader for ELF32 executables
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfLoader;

impl ElfLoader {
    /// Create a loader
    pub const fn new() -> Self {
        Self
    }

    fn read_exact(file: &mut dyn File, offset: u64, buf: &mut [u8]) -> Result<(), ElfError> {
        file.seek(offset);
        if file.read(buf) == buf.len() {
            Ok(())
        } else {
            Err(ElfError::Truncated)
        }
    }

    /// Map one validated segment. Pages past the file part are zero.
    fn load_segment(file: &mut dyn File, target: &LoadTarget<'_>, phdr: &ProgramHeader) -> UserResult<()> {
        let page_offset = u64::from(phdr.p_vaddr) % PGSIZE;
        let file_page = u64::from(phdr.p_offset) - page_offset;
        let mem_page = u64::from(phdr.p_vaddr) - page_offset;
        let span = (page_offset + u64::from(phdr.p_memsz)).div_ceil(PGSIZE) * PGSIZE;
        let mut read_bytes = if phdr.p_filesz > 0 {
            page_offset + u64::from(phdr.p_filesz)
        } else {
            0
        };
        let mut remaining = span;
        let writable = phdr.is_writable();

        let mut buf = vec![0u8; PGSIZE as usize];
        let mut upage = mem_page;
        let mut file_pos = file_page;
        while remaining > 0 {
            let page_read = read_bytes.min(PGSIZE);
            let kpage = target.map_zeroed(VirtAddr::new(upage), writable)?;
            if page_read > 0 {
                let chunk = &mut buf[..page_read as usize];
                Self::read_exact(file, file_pos, chunk)?;
                target.fill(kpage, chunk);
            }
            read_bytes -= page_read;
            remaining -= PGSIZE;
            upage += PGSIZE;
            file_pos += page_read;
        }
        Ok(())
    }
}

impl ProgramLoader for ElfLoader {
    fn load(&self, file: &mut dyn File, target: &LoadTarget<'_>) -> UserResult<LoadedImage> {
        let mut raw = [0u8; ELF_HEADER_SIZE];
        Self::read_exact(file, 0, &mut raw)?;
        let header = ElfHeader::parse(&raw)?;
        let file_len = file.length();

        for index in 0..u64::from(header.e_phnum) {
            let offset = u64::from(header.e_phoff) + index * PROGRAM_HEADER_SIZE as u64;
            if offset > file_len {
                return Err(ElfError::InvalidProgramHeader.into());
            }
            let mut raw = [0u8; PROGRAM_HEADER_SIZE];
            Self::read_exact(file, offset, &mut raw)?;
            let phdr = ProgramHeader::parse(&raw)?;

            match phdr.p_type {
                PT_NULL | PT_NOTE | PT_PHDR | PT_STACK => {}
                PT_DYNAMIC | PT_INTERP | PT_SHLIB => return Err(ElfError::UnsupportedSegment.into()),
                PT_LOAD => {
                    phdr.validate(file_len)?;
                    log::trace!(
                        "elf: segment at {:#x}, {} bytes ({:?})",
                        phdr.p_vaddr,
                        phdr.p_memsz,
                        phdr.flags()
                    );
                    Self::load_segment(file, target, &phdr)?;
                }
                _ => {}
            }
        }

        let stack_top = target.map_stack()?;
        Ok(LoadedImage {
            entry: header.entry_point(),
            stack_top,
        })
    }
}
