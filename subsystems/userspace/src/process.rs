//! # Processes
//!
//! One [`Process`] per running program image, owned by its parent's child
//! list. The [`ProcessManager`] launches programs, runs the wait/exit
//! rendezvous and owns the file lock that serializes every file system
//! call.
//!
//! ## Lifecycle
//!
//! ```text
//! execute ──spawn──> child thread: load ──ok──> user mode ──exit──┐
//!    │                             └──fail──> exit(-1) ───────────┤
//!    └─ blocks until the load outcome is known                    │
//! wait ─ blocks on the child's completion semaphore <─────────────┘
//! ```
//!
//! A child nobody waits for stays on its parent's list until the parent's
//! own record goes away.

use crate::environment::CommandLine;
use crate::fd::FdTable;
use crate::fs::{File, FileSystem};
use crate::loader::{LoadTarget, ProgramLoader};
use crate::{UserError, UserResult, UserspaceStats, FAIL};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use corvid_execution::{Lock, ProcessId, Scheduler, Semaphore, ThreadId, ThreadOptions};
use corvid_hal::{AddressSpaceId, VirtAddr};
use spin::Mutex;

/// Kernel-side record of one program
pub struct Process {
    id: ProcessId,
    name: String,
    /// Thread running the program, known once it has been spawned
    thread: Mutex<Option<ThreadId>>,
    /// Held open, with writes denied, while the program runs
    executable: Mutex<Option<Box<dyn File>>>,
    children: Mutex<Vec<Arc<Process>>>,
    /// Serializes lookups in `children`
    children_sema: Semaphore,
    /// Raised once, when the process has released everything
    wait_sema: Semaphore,
    exit_code: AtomicI32,
    exited: AtomicBool,
    files: Mutex<FdTable>,
    space: Mutex<Option<AddressSpaceId>>,
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("thread", &self.thread())
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl Process {
    fn new(id: ProcessId, name: &str) -> Self {
        Self {
            id,
            name: String::from(name),
            thread: Mutex::new(None),
            executable: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            children_sema: Semaphore::new(1),
            wait_sema: Semaphore::new(0),
            exit_code: AtomicI32::new(FAIL),
            exited: AtomicBool::new(false),
            files: Mutex::new(FdTable::new()),
            space: Mutex::new(None),
        }
    }

    /// Process ID
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Program name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thread running the program
    pub fn thread(&self) -> Option<ThreadId> {
        *self.thread.lock()
    }

    /// Exit code; -1 until the program sets one
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    /// Whether the exit path has completed
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Threads of children not yet waited for
    pub fn children(&self) -> Vec<ThreadId> {
        self.children.lock().iter().filter_map(|c| c.thread()).collect()
    }

    /// The not-yet-waited child running on `tid`, left on the list
    pub fn child(&self, tid: ThreadId) -> Option<Arc<Process>> {
        self.children.lock().iter().find(|c| c.thread() == Some(tid)).cloned()
    }

    /// Run `f` on the descriptor table. Callers hold the file lock.
    pub fn with_files<R>(&self, f: impl FnOnce(&mut FdTable) -> R) -> R {
        f(&mut *self.files.lock())
    }

    fn adopt(&self, sched: &Scheduler, child: Arc<Process>) {
        self.children_sema.down(sched);
        self.children.lock().push(child);
        self.children_sema.up(sched);
    }

    /// Remove and return the first child matching `pred`
    fn take_child(&self, sched: &Scheduler, pred: impl Fn(&Process) -> bool) -> Option<Arc<Process>> {
        self.children_sema.down(sched);
        let child = {
            let mut children = self.children.lock();
            children
                .iter()
                .position(|c| pred(c.as_ref()))
                .map(|index| children.remove(index))
        };
        self.children_sema.up(sched);
        child
    }

    fn signal_exit(&self, sched: &Scheduler) {
        assert!(!self.exited.swap(true, Ordering::SeqCst), "process {} signalled exit twice", self.name);
        self.wait_sema.up(sched);
    }
}

/// Load outcome handed from the child back to `execute`
struct Launch {
    done: Semaphore,
    loaded: AtomicBool,
}

impl Launch {
    fn new() -> Self {
        Self {
            done: Semaphore::new(0),
            loaded: AtomicBool::new(false),
        }
    }

    fn finish(&self, sched: &Scheduler, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
        self.done.up(sched);
    }
}

/// Launches programs and tracks every live process
pub struct ProcessManager {
    sched: Arc<Scheduler>,
    fs: Arc<dyn FileSystem>,
    loader: Arc<dyn ProgramLoader>,
    /// Serializes all file system calls
    file_lock: Lock,
    /// Root parent for threads that run on behalf of no program
    initial: Arc<Process>,
    live: Mutex<BTreeMap<ProcessId, Arc<Process>>>,
    stats: UserspaceStats,
}

impl core::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("live", &self.live.lock().len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ProcessManager {
    /// Create the manager and its initial process, "main"
    pub fn new(sched: Arc<Scheduler>, fs: Arc<dyn FileSystem>, loader: Arc<dyn ProgramLoader>) -> Arc<Self> {
        let initial = Arc::new(Process::new(ProcessId::initial(), "main"));
        *initial.thread.lock() = Some(sched.current());
        Arc::new(Self {
            sched,
            fs,
            loader,
            file_lock: Lock::new(),
            initial,
            live: Mutex::new(BTreeMap::new()),
            stats: UserspaceStats::new(),
        })
    }

    /// The scheduler processes run on
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.sched
    }

    /// The file system behind every path
    pub fn file_system(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// The global file lock
    pub fn file_lock(&self) -> &Lock {
        &self.file_lock
    }

    /// The synthetic root process
    pub fn initial(&self) -> &Arc<Process> {
        &self.initial
    }

    /// Launch and exit counters
    pub fn stats(&self) -> &UserspaceStats {
        &self.stats
    }

    /// A process that has not exited yet
    pub fn lookup(&self, id: ProcessId) -> Option<Arc<Process>> {
        self.live.lock().get(&id).cloned()
    }

    /// Process of the running thread; the initial process for threads
    /// that belong to none
    pub fn current(&self) -> Arc<Process> {
        self.sched
            .current_process()
            .and_then(|id| self.lookup(id))
            .unwrap_or_else(|| self.initial.clone())
    }

    /// Start `cmdline` as a child of the current process.
    ///
    /// Returns once the program has loaded, with the id of its thread, or
    /// with [`UserError::LaunchFailed`] if it could not be started.
    pub fn execute(self: &Arc<Self>, cmdline: &str) -> UserResult<ThreadId> {
        let command = CommandLine::parse(cmdline).ok_or(UserError::LaunchFailed)?;
        let parent = self.current();
        let child = Arc::new(Process::new(ProcessId::new(), command.thread_name()));
        let launch = Arc::new(Launch::new());
        let options = ThreadOptions::new(command.thread_name()).process(child.id());

        parent.adopt(&self.sched, child.clone());
        self.live.lock().insert(child.id(), child.clone());

        let manager = self.clone();
        let (process, outcome) = (child.clone(), launch.clone());
        let spawned = self.sched.spawn(options, move || manager.start(process, command, outcome));
        let tid = match spawned {
            Ok(tid) => tid,
            Err(err) => {
                log::warn!("exec: {}: {}", child.name(), err);
                self.live.lock().remove(&child.id());
                parent.take_child(&self.sched, |c| c.id == child.id);
                self.stats.load_failed();
                return Err(UserError::LaunchFailed);
            }
        };
        *child.thread.lock() = Some(tid);

        launch.done.down(&self.sched);
        if launch.loaded.load(Ordering::SeqCst) {
            Ok(tid)
        } else {
            parent.take_child(&self.sched, |c| c.id == child.id);
            Err(UserError::LaunchFailed)
        }
    }

    /// Wait for the child running on `tid` to exit and return its exit
    /// code. -1 at once if `tid` is not a child of the current process or
    /// has been waited for already.
    pub fn wait(&self, tid: ThreadId) -> i32 {
        let parent = self.current();
        let Some(child) = parent.take_child(&self.sched, |c| c.thread() == Some(tid)) else {
            return FAIL;
        };
        child.wait_sema.down(&self.sched);
        let code = child.exit_code();
        log::debug!("process {} ({}) reaped, exit code {}", tid, child.name(), code);
        code
    }

    /// End the current process with `code`
    pub fn exit(&self, code: i32) -> ! {
        let process = self.current();
        self.print_exit(code);
        process.exit_code.store(code, Ordering::SeqCst);
        self.release(&process);
        drop(process);
        self.sched.exit()
    }

    /// End the current process with -1
    pub fn fail(&self) -> ! {
        self.exit(FAIL)
    }

    /// Kill the current process for a bad request
    pub fn fault(&self, err: UserError) -> ! {
        log::debug!("process {} killed: {}", self.sched.current(), err);
        self.stats.user_fault();
        self.fail()
    }

    fn print_exit(&self, code: i32) {
        let line = format!("{}: exit({})\n", self.sched.current_name(), code);
        self.sched.platform().console().write_str(&line);
    }

    /// Body of a new process thread
    fn start(&self, process: Arc<Process>, command: CommandLine, launch: Arc<Launch>) {
        let loaded = self.load(&process, &command);
        match loaded {
            Ok((entry, esp)) => {
                log::debug!("process {} ({}) loaded, entry {}", self.sched.current(), command, entry);
                self.stats.process_started();
                launch.finish(&self.sched, true);
                drop((process, command, launch));
                self.sched.platform().cpu().enter_user_mode(entry, esp)
            }
            Err(err) => {
                log::warn!("load: {}: {}", command.program(), err);
                self.stats.load_failed();
                launch.finish(&self.sched, false);
                drop((process, command, launch));
                self.fail()
            }
        }
    }

    /// Build the address space and stack; returns (entry, esp)
    fn load(&self, process: &Process, command: &CommandLine) -> UserResult<(VirtAddr, VirtAddr)> {
        let mmu = self.sched.platform().mmu();
        let space = mmu.create()?;
        *process.space.lock() = Some(space);
        self.sched.set_address_space(self.sched.current(), Some(space))?;
        let target = LoadTarget::new(mmu, space);

        let image = {
            let _guard = self.file_lock.lock(&self.sched);
            let Some(mut file) = self.fs.open(command.program()) else {
                let line = format!("load: {}: open failed\n", command.program());
                self.sched.platform().console().write_str(&line);
                return Err(UserError::OpenFailed);
            };
            file.deny_write();
            let image = self.loader.load(file.as_mut(), &target);
            *process.executable.lock() = Some(file);
            image?
        };

        let esp = command.push(&target.memory(), image.stack_top)?;
        Ok((image.entry, esp))
    }

    /// Give back everything `process` holds, then let its parent in
    fn release(&self, process: &Process) {
        {
            let _guard = self.file_lock.lock(&self.sched);
            let executable = process.executable.lock().take();
            if let Some(mut executable) = executable {
                executable.allow_write();
            }
            let files = process.with_files(FdTable::drain);
            drop(files);
        }

        let space = process.space.lock().take();
        if let Some(space) = space {
            if let Err(err) = self.sched.set_address_space(self.sched.current(), None) {
                log::warn!("exit: cannot detach address space: {}", err);
            }
            self.sched.platform().mmu().destroy(space);
        }

        self.live.lock().remove(&process.id);
        self.stats.process_exited();
        process.signal_exit(&self.sched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::ElfLoader;
    use crate::fs::MemFs;
    use corvid_execution::SchedulerConfig;
    use corvid_hal::host::HostPlatform;

    fn manager() -> (Arc<HostPlatform>, Arc<ProcessManager>) {
        let platform = HostPlatform::new();
        let sched = Scheduler::boot(platform.clone(), SchedulerConfig::strict());
        sched.start().unwrap();
        let manager = ProcessManager::new(sched, Arc::new(MemFs::new()), Arc::new(ElfLoader::new()));
        (platform, manager)
    }

    #[test]
    fn test_unattached_threads_belong_to_initial() {
        let (_platform, manager) = manager();
        let current = manager.current();
        assert_eq!(current.id(), ProcessId::initial());
        assert_eq!(current.name(), "main");
        assert!(current.children().is_empty());
    }

    #[test]
    fn test_empty_command_line_fails() {
        let (_platform, manager) = manager();
        assert_eq!(manager.execute("   "), Err(UserError::LaunchFailed));
        assert!(manager.initial().children().is_empty());
    }

    #[test]
    fn test_missing_program() {
        let (platform, manager) = manager();
        let pages = platform.memory().live_pages();

        assert_eq!(manager.execute("ghost 1 2"), Err(UserError::LaunchFailed));
        assert!(manager.initial().children().is_empty());
        // Let the child run its exit path.
        manager.scheduler().yield_now();

        assert_eq!(platform.console_output(), "load: ghost: open failed\nghost: exit(-1)\n");
        assert_eq!(platform.memory().live_spaces(), 0);
        assert_eq!(platform.memory().live_pages(), pages);
        assert_eq!(manager.stats().load_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_wait_on_stranger() {
        let (_platform, manager) = manager();
        assert_eq!(manager.wait(ThreadId::new(77)), FAIL);
        assert_eq!(manager.wait(manager.scheduler().current()), FAIL);
    }
}
