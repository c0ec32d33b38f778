//! Value types shared by the process table, scheduler, and syscall layer.

use core::fmt;

use crate::config::{MAX_ARGS, MAX_ARG_LEN, MAX_NAME_LEN, MAX_PATH_LEN, MAX_PROCESSES, PRIORITY_LEVELS};
use crate::error::{KernelError, KernelResult};

/// Process identifier: the index of the owning slot in the PID table.
///
/// PID 0 names the idle/bootstrap context and is never allocated to a
/// process, so a fork return value of 0 is unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    /// The idle/bootstrap context.
    pub const IDLE: Pid = Pid(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Band 0 is the most important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const LOWEST: Priority = Priority(PRIORITY_LEVELS as u8 - 1);

    /// Checked constructor for values coming from outside the kernel.
    pub fn new(raw: u64) -> KernelResult<Self> {
        if raw >= PRIORITY_LEVELS as u64 {
            return Err(KernelError::InvalidArgument);
        }
        Ok(Self(raw as u8))
    }

    /// Constructor for compile-time constants. Values outside the band range
    /// are clamped to the lowest band.
    pub const fn new_const(raw: u8) -> Self {
        if (raw as usize) < PRIORITY_LEVELS {
            Self(raw)
        } else {
            Self::LOWEST
        }
    }

    pub const fn band(self) -> usize {
        self.0 as usize
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

/// Lifecycle state of a process.
///
/// A reaped process has no state: its slot is gone from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Ready to run or currently executing.
    Running,

    /// Blocked inside `waitpid` until a matching child exits.
    Waiting,

    /// Blocked on a timed sleep or a wait queue.
    Sleeping,

    /// Exited; exit code and PID are retained until reaped.
    Zombie,
}

impl ProcessState {
    /// Stable numeric encoding used in process records copied to user space.
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Waiting => 1,
            Self::Sleeping => 2,
            Self::Zombie => 3,
        }
    }
}

/// Kernel-owned bounded string buffer.
///
/// Input longer than `N` bytes is truncated at the last UTF-8 boundary that
/// fits; nothing is ever written past the buffer.
#[derive(Clone, Copy)]
pub struct FixedStr<const N: usize> {
    len: usize,
    buf: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    pub const fn new() -> Self {
        Self { len: 0, buf: [0; N] }
    }

    /// Copies `s`, truncating to the capacity.
    pub fn from_str_truncate(s: &str) -> Self {
        let mut out = Self::new();
        out.push_str_truncate(s);
        out
    }

    /// Builds a string from raw bytes, truncating to the capacity.
    ///
    /// Bytes that are not valid UTF-8 are rejected, unless the only invalid
    /// part is a multi-byte sequence cut at the capacity boundary.
    pub fn from_bytes_truncate(bytes: &[u8]) -> KernelResult<Self> {
        let take = bytes.len().min(N);
        let mut candidate = &bytes[..take];
        if let Err(err) = core::str::from_utf8(candidate) {
            // `error_len() == None` means the input ended mid-character.
            if take == N && err.error_len().is_none() {
                candidate = &candidate[..err.valid_up_to()];
            } else {
                return Err(KernelError::InvalidArgument);
            }
        }

        let mut out = Self::new();
        out.buf[..candidate.len()].copy_from_slice(candidate);
        out.len = candidate.len();
        Ok(out)
    }

    /// Appends as much of `s` as fits. Returns `false` if anything was cut.
    pub fn push_str_truncate(&mut self, s: &str) -> bool {
        let room = N - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        take == s.len()
    }

    pub fn as_str(&self) -> &str {
        // Only whole UTF-8 sequences are ever stored.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PartialEq for FixedStr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> Eq for FixedStr<N> {}

impl<const N: usize> PartialEq<str> for FixedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> PartialEq<&str> for FixedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ProcessName = FixedStr<MAX_NAME_LEN>;
pub type PathStr = FixedStr<MAX_PATH_LEN>;
pub type ArgStr = FixedStr<MAX_ARG_LEN>;

/// Argument vector with fixed capacity. Extra arguments are dropped.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Argv {
    count: usize,
    args: [ArgStr; MAX_ARGS],
}

impl Argv {
    pub fn from_strs(args: &[&str]) -> Self {
        let mut argv = Self::default();
        for arg in args.iter().take(MAX_ARGS) {
            argv.args[argv.count] = ArgStr::from_str_truncate(arg);
            argv.count += 1;
        }
        argv
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: usize) -> Option<&ArgStr> {
        self.args[..self.count].get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArgStr> {
        self.args[..self.count].iter()
    }
}

impl fmt::Debug for Argv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

const PID_SET_WORDS: usize = MAX_PROCESSES.div_ceil(64);

/// Fixed-capacity set of PIDs (bitmap indexed by PID).
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct PidSet {
    words: [u64; PID_SET_WORDS],
}

impl PidSet {
    pub const fn new() -> Self {
        Self {
            words: [0; PID_SET_WORDS],
        }
    }

    pub fn insert(&mut self, pid: Pid) {
        let i = pid.index();
        debug_assert!(i < MAX_PROCESSES, "pid {} outside PidSet range", i);
        if i < MAX_PROCESSES {
            self.words[i / 64] |= 1 << (i % 64);
        }
    }

    pub fn remove(&mut self, pid: Pid) {
        let i = pid.index();
        if i < MAX_PROCESSES {
            self.words[i / 64] &= !(1 << (i % 64));
        }
    }

    pub fn contains(&self, pid: Pid) -> bool {
        let i = pid.index();
        i < MAX_PROCESSES && self.words[i / 64] & (1 << (i % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Members in ascending PID order.
    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        (0..MAX_PROCESSES)
            .filter(move |&i| self.words[i / 64] & (1 << (i % 64)) != 0)
            .map(|i| Pid::new(i as u32))
    }
}

impl fmt::Debug for PidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Snapshot of one live process for process listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub priority: Priority,
    pub name: ProcessName,
    pub state: ProcessState,
    /// `Some` once the process is a zombie.
    pub exit_code: Option<i32>,
}

/// Which children a wait call accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// Any child (`pid == -1`).
    Any,
    /// One specific child.
    Pid(Pid),
}

impl WaitTarget {
    /// Decodes the syscall argument: `-1` is any child, positive values
    /// name one child, everything else is rejected.
    pub fn from_raw(raw: i64) -> KernelResult<Self> {
        match raw {
            -1 => Ok(Self::Any),
            p if p > 0 && p <= u32::MAX as i64 => Ok(Self::Pid(Pid::new(p as u32))),
            _ => Err(KernelError::InvalidArgument),
        }
    }

    pub fn matches(self, pid: Pid) -> bool {
        match self {
            Self::Any => true,
            Self::Pid(target) => target == pid,
        }
    }
}
