//! Kernel error space.
//!
//! Recoverable errors travel back to the syscall caller as negative result
//! codes. Fatal errors mean the scheduler state can no longer be trusted and
//! stop the kernel through [`fatal`].

use core::fmt;

/// Recoverable error returned by scheduler and syscall operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No PID slot, address space, or table capacity left.
    OutOfMemory,

    /// Wait target is not (or no longer) a child of the caller.
    NoSuchProcess,

    /// A user pointer lies outside the caller's mapped range.
    InvalidAddress,

    /// Malformed syscall parameters or misuse of a kernel object.
    InvalidArgument,

    /// Unknown syscall number or operation the collaborators do not provide.
    Unsupported,

    /// A collaborating device failed.
    Io,
}

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Positive error number. The syscall ABI returns its negation.
    pub const fn errno(self) -> u64 {
        match self {
            Self::Unsupported => 1,
            Self::InvalidArgument => 2,
            Self::Io => 3,
            Self::OutOfMemory => 4,
            Self::NoSuchProcess => 5,
            Self::InvalidAddress => 6,
        }
    }

    /// Inverse of [`KernelError::errno`].
    pub const fn from_errno(errno: u64) -> Option<Self> {
        match errno {
            1 => Some(Self::Unsupported),
            2 => Some(Self::InvalidArgument),
            3 => Some(Self::Io),
            4 => Some(Self::OutOfMemory),
            5 => Some(Self::NoSuchProcess),
            6 => Some(Self::InvalidAddress),
            _ => None,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::NoSuchProcess => f.write_str("no such child process"),
            Self::InvalidAddress => f.write_str("user address is not mapped"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::Unsupported => f.write_str("operation not supported"),
            Self::Io => f.write_str("device I/O error"),
        }
    }
}

/// Scheduler invariant violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// A thread about to be restored failed its validity check.
    CorruptThread { pid: u32 },

    /// The run queue is empty and no idle thread was installed.
    IdleMissing,

    /// An exit path could not find any thread to switch to.
    NoSuccessor,

    /// A queued PID refers to a free slot or a non-runnable process.
    DeadThreadSelected { pid: u32 },

    /// Control came back to a thread after it exited.
    ResumedAfterExit { pid: u32 },

    /// The idle context issued an operation only processes may issue.
    IdleExit,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptThread { pid } => write!(f, "corrupt thread selected (pid {})", pid),
            Self::IdleMissing => f.write_str("no idle thread installed"),
            Self::NoSuccessor => f.write_str("exit found no successor"),
            Self::DeadThreadSelected { pid } => {
                write!(f, "dead thread found in run queue (pid {})", pid)
            }
            Self::ResumedAfterExit { pid } => {
                write!(f, "exited thread resumed (pid {})", pid)
            }
            Self::IdleExit => f.write_str("idle context tried to exit"),
        }
    }
}

/// Stops the kernel on a scheduler invariant violation.
///
/// The panic handler of the kernel image halts the CPU; hosted builds unwind
/// so death tests can observe the condition.
#[cold]
pub fn fatal(err: FatalError) -> ! {
    log::error!(target: "sched", "FATAL: {}", err);
    panic!("kernel fatal: {}", err);
}
