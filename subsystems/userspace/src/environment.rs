//! # Program Environment
//!
//! Command-line tokenizing and the initial user stack.
//!
//! A new program starts with this below `PHYS_BASE` (addresses grow up):
//!
//! ```text
//! stack_top  -> argument strings, last argument first
//!               padding to a word boundary
//!               0                   argv[argc]
//!               argv[argc-1] .. argv[0]
//!               argv
//!               argc
//! esp        -> 0                   return address
//! ```

use crate::usermem::UserMemory;
use crate::{UserError, UserResult};
use alloc::string::String;
use alloc::vec::Vec;
use corvid_execution::thread::THREAD_NAME_MAX;
use corvid_hal::{VirtAddr, PGSIZE};

/// Width of a user pointer
const WORD: u64 = 4;

/// A tokenized command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    args: Vec<String>,
}

impl CommandLine {
    /// Split on spaces; runs of spaces count as one. The first token names
    /// the program. `None` if there is no token at all.
    pub fn parse(line: &str) -> Option<Self> {
        let args: Vec<String> = line.split(' ').filter(|s| !s.is_empty()).map(String::from).collect();
        if args.is_empty() {
            None
        } else {
            Some(Self { args })
        }
    }

    /// Program name, the first token
    pub fn program(&self) -> &str {
        &self.args[0]
    }

    /// Program name cut down to what a thread name holds
    pub fn thread_name(&self) -> &str {
        let name = self.program();
        let mut end = name.len().min(THREAD_NAME_MAX);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        &name[..end]
    }

    /// All tokens, program name included
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Bytes the argument block takes on the stack
    pub fn stack_size(&self) -> u64 {
        let strings: u64 = self.args.iter().map(|a| a.len() as u64 + 1).sum();
        let padded = strings.div_ceil(WORD) * WORD;
        // argv[argc], argv[..], argv, argc, return address
        padded + WORD * (self.args.len() as u64 + 1) + 3 * WORD
    }

    /// Lay the argument block out below `stack_top` and return the stack
    /// pointer the program starts with. The block must fit in the page
    /// under `stack_top`.
    pub fn push(&self, mem: &UserMemory<'_>, stack_top: VirtAddr) -> UserResult<VirtAddr> {
        if self.stack_size() > PGSIZE {
            return Err(UserError::ArgumentsTooLong);
        }
        let mut stack = StackWriter { mem, esp: stack_top };

        let mut pointers = Vec::with_capacity(self.args.len());
        for arg in self.args.iter().rev() {
            stack.push(&[0])?;
            pointers.push(stack.push(arg.as_bytes())?);
        }
        pointers.reverse();

        let pad = stack.esp.as_u64() % WORD;
        if pad > 0 {
            stack.push(&[0u8; WORD as usize][..pad as usize])?;
        }

        stack.push_word(0)?;
        for ptr in pointers.iter().rev() {
            stack.push_word(word(*ptr)?)?;
        }
        let argv = stack.esp;
        stack.push_word(word(argv)?)?;
        stack.push_word(self.args.len() as u32)?;
        stack.push_word(0)?;
        Ok(stack.esp)
    }
}

impl core::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(arg)?;
        }
        Ok(())
    }
}

fn word(va: VirtAddr) -> UserResult<u32> {
    u32::try_from(va.as_u64()).map_err(|_| UserError::BadAddress)
}

struct StackWriter<'m, 'a> {
    mem: &'m UserMemory<'a>,
    esp: VirtAddr,
}

impl StackWriter<'_, '_> {
    fn push(&mut self, bytes: &[u8]) -> UserResult<VirtAddr> {
        self.esp = self.esp.sub(bytes.len() as u64);
        self.mem.write(self.esp, bytes)?;
        Ok(self.esp)
    }

    fn push_word(&mut self, value: u32) -> UserResult<VirtAddr> {
        self.push(&value.to_le_bytes())
    }
}
