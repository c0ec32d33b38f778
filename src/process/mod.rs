//! Process model: resource ownership around exactly one thread.

mod table;
mod thread;
mod types;

pub use table::ProcessTable;
pub use thread::{KernelStack, KernelThreadFn, Thread, THREAD_TAG_DEAD, THREAD_TAG_LIVE};
pub use types::{
    ArgStr, Argv, FixedStr, PathStr, Pid, PidSet, Priority, ProcessInfo, ProcessName,
    ProcessState, WaitTarget,
};

use crate::memory::AddressSpaceId;

/// Pending `waitpid` of a process in [`ProcessState::Waiting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRequest {
    pub target: WaitTarget,
    /// User address receiving the exit code; 0 when the caller passed null.
    pub status_ptr: u64,
}

/// What a process in [`ProcessState::Sleeping`] is blocked on.
///
/// A wake aimed at one channel never ends a sleep on another, so an entry
/// a wait queue still holds for an already woken process cannot cut a
/// later unrelated sleep short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitChannel {
    /// Plain block, ended only by a direct wake.
    Direct,
    /// Timed sleep until the given tick.
    Timer(u64),
    /// A wait queue, by its id.
    Queue(usize),
}

/// Loader output for a process created at bootstrap.
#[derive(Debug, Clone, Copy)]
pub struct ProcessImage<'a> {
    pub name: &'a str,
    pub entry_rip: u64,
    pub user_rsp: u64,
    pub address_space: AddressSpaceId,
    pub argv: &'a [&'a str],
    pub cwd: &'a str,
    /// `None` selects the scheduler's default priority.
    pub priority: Option<Priority>,
}

/// Unit of resource ownership.
pub struct Process {
    pub(crate) pid: Pid,
    pub(crate) parent: Option<Pid>,
    pub(crate) children: PidSet,
    pub(crate) priority: Priority,
    pub(crate) state: ProcessState,
    pub(crate) exit_code: Option<i32>,
    pub(crate) name: ProcessName,
    pub(crate) cwd: PathStr,
    pub(crate) argv: Argv,
    /// `None` once torn down at the transition into zombie.
    pub(crate) address_space: Option<AddressSpaceId>,
    /// Kernel processes borrow the kernel space and never destroy it.
    pub(crate) owns_address_space: bool,
    pub(crate) thread: Thread,
    pub(crate) wait: Option<WaitRequest>,
    /// What the process is blocked on while `Sleeping`.
    pub(crate) channel: Option<WaitChannel>,
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        name: &str,
        priority: Priority,
        address_space: AddressSpaceId,
        owns_address_space: bool,
        thread: Thread,
    ) -> Self {
        Self {
            pid,
            parent: None,
            children: PidSet::new(),
            priority,
            state: ProcessState::Running,
            exit_code: None,
            name: ProcessName::from_str_truncate(name),
            cwd: PathStr::from_str_truncate("/"),
            argv: Argv::default(),
            address_space: Some(address_space),
            owns_address_space,
            thread,
            wait: None,
            channel: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn children(&self) -> &PidSet {
        &self.children
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn name(&self) -> &ProcessName {
        &self.name
    }

    pub fn set_name(&mut self, name: ProcessName) {
        self.name = name;
    }

    pub fn cwd(&self) -> &PathStr {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: PathStr) {
        self.cwd = cwd;
    }

    pub fn argv(&self) -> &Argv {
        &self.argv
    }

    pub fn address_space(&self) -> Option<AddressSpaceId> {
        self.address_space
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn is_kernel(&self) -> bool {
        self.thread.is_kernel()
    }

    /// Whether the process can be picked by the scheduler.
    pub fn is_runnable(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            parent: self.parent,
            priority: self.priority,
            name: self.name,
            state: self.state,
            exit_code: self.exit_code,
        }
    }
}
