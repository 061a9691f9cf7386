//! # Host Platform
//!
//! A [`Platform`] for running the kernel core inside an ordinary process.
//!
//! - Every execution context is a host thread; a baton hand-off makes sure
//!   exactly one of them runs at a time, so the single-CPU model holds.
//! - Page directories and physical pages are simulated in [`HostMemory`].
//! - "User mode" runs a registered Rust closure that talks to the kernel only
//!   through trap frames, see [`UserContext`].
//! - Interrupts are raised synchronously with [`HostPlatform::raise`]; the
//!   idle loop's halt delivers one timer interrupt.

mod context;
mod memory;
mod user;

pub use context::HostContexts;
pub use memory::HostMemory;
pub use user::UserContext;

use crate::interrupts::{InterruptController, InterruptHandler, InterruptVector, TIMER_VECTOR, TrapFrame};
use crate::{Console, ContextSwitch, Cpu, HalResult, InterruptLevel, Mmu, Platform, VirtAddr};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A simulated user program: runs in "user mode" until it traps into the
/// kernel for good.
pub type UserProgram = Arc<dyn Fn(&mut UserContext<'_>) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// std-backed platform
pub struct HostPlatform {
    interrupts_on: AtomicBool,
    handlers: Mutex<BTreeMap<InterruptVector, InterruptHandler>>,
    contexts: HostContexts,
    memory: HostMemory,
    console: HostConsole,
    programs: Mutex<BTreeMap<u64, UserProgram>>,
    powered_off: AtomicBool,
}

impl HostPlatform {
    /// Platform with unlimited physical pages. Interrupts start masked, as
    /// they are at boot.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Platform that runs out of physical pages after `pages` allocations
    /// are live at once
    pub fn with_page_limit(pages: usize) -> Arc<Self> {
        Arc::new(Self::build(Some(pages)))
    }

    fn build(page_limit: Option<usize>) -> Self {
        Self {
            interrupts_on: AtomicBool::new(false),
            handlers: Mutex::new(BTreeMap::new()),
            contexts: HostContexts::new(),
            memory: HostMemory::new(page_limit),
            console: HostConsole::default(),
            programs: Mutex::new(BTreeMap::new()),
            powered_off: AtomicBool::new(false),
        }
    }

    /// Deliver an interrupt on the calling context, as if the hardware had
    /// raised it right now. The interrupt level is restored afterwards.
    pub fn raise(&self, frame: &mut TrapFrame) {
        let handler = lock(&self.handlers).get(&frame.vector).cloned();
        let Some(handler) = handler else {
            log::warn!("host: no handler for vector {:#x}", frame.vector);
            return;
        };
        let level = self.interrupt_level();
        handler(frame);
        self.set_interrupt_level(level);
    }

    /// Deliver one timer interrupt
    pub fn tick(&self) {
        self.raise(&mut TrapFrame::new(TIMER_VECTOR, VirtAddr::new(0)));
    }

    /// Make `program` the code found at `entry` in every address space
    pub fn register_program<F>(&self, entry: VirtAddr, program: F)
    where
        F: Fn(&mut UserContext<'_>) + Send + Sync + 'static,
    {
        lock(&self.programs).insert(entry.as_u64(), Arc::new(program));
    }

    /// Simulated physical memory
    pub fn memory(&self) -> &HostMemory {
        &self.memory
    }

    /// Everything written to the console so far
    pub fn console_output(&self) -> String {
        self.console.output()
    }

    /// Queue keyboard input
    pub fn push_input(&self, bytes: &[u8]) {
        self.console.push_input(bytes);
    }

    /// Whether [`Cpu::power_off`] has been called
    pub fn is_powered_off(&self) -> bool {
        self.powered_off.load(Ordering::SeqCst)
    }
}

impl Cpu for HostPlatform {
    fn interrupt_level(&self) -> InterruptLevel {
        if self.interrupts_on.load(Ordering::SeqCst) {
            InterruptLevel::On
        } else {
            InterruptLevel::Off
        }
    }

    fn set_interrupt_level(&self, level: InterruptLevel) -> InterruptLevel {
        let was_on = self.interrupts_on.swap(level == InterruptLevel::On, Ordering::SeqCst);
        if was_on {
            InterruptLevel::On
        } else {
            InterruptLevel::Off
        }
    }

    fn wait_for_interrupt(&self) {
        self.enable_interrupts();
        self.tick();
    }

    fn enter_user_mode(&self, entry: VirtAddr, stack: VirtAddr) -> ! {
        let program = lock(&self.programs).get(&entry.as_u64()).cloned();
        let Some(program) = program else {
            panic!("host: no user program at {}", entry);
        };
        self.enable_interrupts();
        let mut user = UserContext::new(self, stack);
        program(&mut user);
        panic!("host: user program at {} returned instead of exiting", entry);
    }

    fn power_off(&self) {
        log::info!("host: powering off");
        self.powered_off.store(true, Ordering::SeqCst);
    }
}

impl InterruptController for HostPlatform {
    fn register(&self, vector: InterruptVector, handler: InterruptHandler) -> HalResult<()> {
        lock(&self.handlers).insert(vector, handler);
        Ok(())
    }
}

impl Platform for HostPlatform {
    fn cpu(&self) -> &dyn Cpu {
        self
    }

    fn mmu(&self) -> &dyn Mmu {
        &self.memory
    }

    fn context(&self) -> &dyn ContextSwitch {
        &self.contexts
    }

    fn interrupts(&self) -> &dyn InterruptController {
        self
    }

    fn console(&self) -> &dyn Console {
        &self.console
    }

    fn arch_name(&self) -> &'static str {
        "host"
    }
}

/// Console that records output and replays queued input
#[derive(Default)]
pub struct HostConsole {
    output: Mutex<Vec<u8>>,
    input: Mutex<VecDeque<u8>>,
}

impl HostConsole {
    /// Output so far, lossily decoded
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&lock(&self.output)).into_owned()
    }

    /// Queue keyboard input
    pub fn push_input(&self, bytes: &[u8]) {
        lock(&self.input).extend(bytes.iter().copied());
    }
}

impl Console for HostConsole {
    fn write_bytes(&self, bytes: &[u8]) {
        lock(&self.output).extend_from_slice(bytes);
    }

    /// Returns 0 once the queued input is exhausted.
    fn read_byte(&self) -> u8 {
        lock(&self.input).pop_front().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_raise_restores_level() {
        let platform = HostPlatform::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let cpu: &dyn Cpu = platform.as_ref();
        platform
            .register(
                TIMER_VECTOR,
                Arc::new(move |_frame: &mut TrapFrame| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        cpu.enable_interrupts();
        platform.tick();
        assert!(cpu.interrupts_enabled());
        cpu.disable_interrupts();
        platform.tick();
        assert!(!cpu.interrupts_enabled());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_console_roundtrip() {
        let platform = HostPlatform::new();
        platform.console().write_str("hello\n");
        platform.push_input(b"ab");
        assert_eq!(platform.console_output(), "hello\n");
        assert_eq!(platform.console().read_byte(), b'a');
        assert_eq!(platform.console().read_byte(), b'b');
        assert_eq!(platform.console().read_byte(), 0);
    }
}
