//! Kernel-side syscall dispatcher (`int 0x80` path).
//!
//! Responsibilities of this module:
//! - decode syscall number + ABI arguments into a [`Syscall`],
//! - route to the corresponding scheduler or service operation,
//! - marshal user buffers through [`UserMemory`] only,
//! - return stable numeric result/error codes to the caller context.
//!
//! ABI (provided by the interrupt entry glue):
//! - `RAX` -> syscall number
//! - `RDI` -> `arg0`
//! - `RSI` -> `arg1`
//! - `RDX` -> `arg2`
//! - `R10` -> `arg3`

use crate::arch::interrupts::TrapFrame;
use crate::config::{MAX_NAME_LEN, MAX_PATH_LEN};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::memory::Access;
use crate::process::{PathStr, Pid, Priority, ProcessName, WaitTarget};
use crate::scheduler::WaitOutcome;

use super::types::{encode_result, ProcessRecord, SyscallId, SYSCALL_OK};
use super::usermem::UserMemory;

/// Console writes are copied in through a bounce buffer of this size.
const CONSOLE_CHUNK: usize = 256;

/// A decoded syscall with its typed arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Yield,
    WriteConsole { ptr: u64, len: usize },
    Exit { code: i32 },
    Fork,
    WaitPid { target: i64, status_ptr: u64 },
    GetPid,
    GetPpid,
    Sleep { ms: u64 },
    Uptime,
    ProcessList { buf: u64, capacity: usize },
    GetCwd { buf: u64, len: usize },
    Chdir { path: u64 },
    ArgCount,
    GetArg { index: usize, buf: u64, len: usize },
    GetPriority,
    SetPriority { priority: u64 },
    ReadKey,
    SetName { name: u64 },
}

impl Syscall {
    /// Decodes the call in `frame`. Unknown numbers are `Unsupported`.
    pub fn decode(frame: &TrapFrame) -> KernelResult<Self> {
        let id = SyscallId::from_raw(frame.syscall_number()).ok_or(KernelError::Unsupported)?;
        let arg = |i| frame.arg(i);

        Ok(match id {
            SyscallId::Yield => Self::Yield,
            SyscallId::WriteConsole => Self::WriteConsole {
                ptr: arg(0),
                len: arg(1) as usize,
            },
            // Exit codes are the low 32 bits of RDI.
            SyscallId::Exit => Self::Exit { code: arg(0) as i32 },
            SyscallId::Fork => Self::Fork,
            SyscallId::WaitPid => Self::WaitPid {
                target: arg(0) as i64,
                status_ptr: arg(1),
            },
            SyscallId::GetPid => Self::GetPid,
            SyscallId::GetPpid => Self::GetPpid,
            SyscallId::Sleep => Self::Sleep { ms: arg(0) },
            SyscallId::Uptime => Self::Uptime,
            SyscallId::ProcessList => Self::ProcessList {
                buf: arg(0),
                capacity: arg(1) as usize,
            },
            SyscallId::GetCwd => Self::GetCwd {
                buf: arg(0),
                len: arg(1) as usize,
            },
            SyscallId::Chdir => Self::Chdir { path: arg(0) },
            SyscallId::ArgCount => Self::ArgCount,
            SyscallId::GetArg => Self::GetArg {
                index: arg(0) as usize,
                buf: arg(1),
                len: arg(2) as usize,
            },
            SyscallId::GetPriority => Self::GetPriority,
            SyscallId::SetPriority => Self::SetPriority { priority: arg(0) },
            SyscallId::ReadKey => Self::ReadKey,
            SyscallId::SetName => Self::SetName { name: arg(0) },
        })
    }

    pub fn id(&self) -> SyscallId {
        match self {
            Self::Yield => SyscallId::Yield,
            Self::WriteConsole { .. } => SyscallId::WriteConsole,
            Self::Exit { .. } => SyscallId::Exit,
            Self::Fork => SyscallId::Fork,
            Self::WaitPid { .. } => SyscallId::WaitPid,
            Self::GetPid => SyscallId::GetPid,
            Self::GetPpid => SyscallId::GetPpid,
            Self::Sleep { .. } => SyscallId::Sleep,
            Self::Uptime => SyscallId::Uptime,
            Self::ProcessList { .. } => SyscallId::ProcessList,
            Self::GetCwd { .. } => SyscallId::GetCwd,
            Self::Chdir { .. } => SyscallId::Chdir,
            Self::ArgCount => SyscallId::ArgCount,
            Self::GetArg { .. } => SyscallId::GetArg,
            Self::GetPriority => SyscallId::GetPriority,
            Self::SetPriority { .. } => SyscallId::SetPriority,
            Self::ReadKey => SyscallId::ReadKey,
            Self::SetName { .. } => SyscallId::SetName,
        }
    }
}

/// How a handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Result goes into the caller's `RAX` in `frame`.
    Immediate(KernelResult<u64>),
    /// `frame` was switched to another thread; the caller's result was
    /// placed in its saved snapshot or is delivered when it wakes.
    Deferred,
}

/// Resolves the syscall in `frame` and runs it on behalf of the current
/// process.
///
/// On return `frame` holds either the caller with its result in `RAX`, or
/// the next thread to run when the call blocked, yielded, or exited.
pub fn dispatch(kernel: &Kernel, frame: &mut TrapFrame) {
    let completion = match Syscall::decode(frame) {
        Ok(call) => execute(kernel, frame, call),
        Err(err) => Completion::Immediate(Err(err)),
    };

    if let Completion::Immediate(result) = completion {
        if let Err(err) = result {
            log::warn!(
                target: "syscall",
                "syscall {} from {} rejected: {}",
                frame.syscall_number(),
                kernel.scheduler().current_pid().unwrap_or(Pid::IDLE),
                err
            );
        }
        frame.set_return(encode_result(result));
    }
}

/// Runs one decoded call.
pub fn execute(kernel: &Kernel, frame: &mut TrapFrame, call: Syscall) -> Completion {
    use Completion::{Deferred, Immediate};

    let sched = kernel.scheduler();
    match call {
        Syscall::Yield => {
            frame.set_return(SYSCALL_OK);
            sched.yield_now(frame);
            Deferred
        }
        Syscall::WriteConsole { ptr, len } => Immediate(sys_write_console(kernel, ptr, len)),
        Syscall::Exit { code } => {
            sched.exit(frame, code);
            Deferred
        }
        Syscall::Fork => Immediate(sched.fork(frame).map(Pid::as_u64)),
        Syscall::WaitPid { target, status_ptr } => {
            let result = WaitTarget::from_raw(target)
                .and_then(|target| sched.wait(frame, target, status_ptr));
            match result {
                Ok(WaitOutcome::Reaped { pid, .. }) => Immediate(Ok(pid.as_u64())),
                Ok(WaitOutcome::Blocked) => Deferred,
                Err(err) => Immediate(Err(err)),
            }
        }
        Syscall::GetPid => Immediate(current(kernel).map(Pid::as_u64)),
        Syscall::GetPpid => Immediate(
            sched
                .current_process()
                .ok_or(KernelError::NoSuchProcess)
                .map(|info| info.parent.map_or(0, Pid::as_u64)),
        ),
        Syscall::Sleep { ms } => match sched.sleep(frame, ms) {
            Ok(()) => Deferred,
            Err(err) => Immediate(Err(err)),
        },
        Syscall::Uptime => Immediate(Ok(sched.jiffies())),
        Syscall::ProcessList { buf, capacity } => {
            Immediate(sys_process_list(kernel, buf, capacity))
        }
        Syscall::GetCwd { buf, len } => Immediate(sys_get_cwd(kernel, buf, len)),
        Syscall::Chdir { path } => Immediate(sys_chdir(kernel, path)),
        Syscall::ArgCount => Immediate(
            sched
                .with_current(|p| p.argv().len() as u64)
                .ok_or(KernelError::NoSuchProcess),
        ),
        Syscall::GetArg { index, buf, len } => Immediate(sys_get_arg(kernel, index, buf, len)),
        Syscall::GetPriority => Immediate(
            sched
                .current_process()
                .ok_or(KernelError::NoSuchProcess)
                .map(|info| info.priority.as_u8() as u64),
        ),
        Syscall::SetPriority { priority } => Immediate(
            Priority::new(priority)
                .and_then(|priority| sched.set_priority(current(kernel)?, priority))
                .map(|()| SYSCALL_OK),
        ),
        Syscall::ReadKey => sys_read_key(kernel, frame),
        Syscall::SetName { name } => Immediate(sys_set_name(kernel, name)),
    }
}

fn current(kernel: &Kernel) -> KernelResult<Pid> {
    kernel
        .scheduler()
        .current_pid()
        .ok_or(KernelError::NoSuchProcess)
}

/// User memory of the calling process.
fn caller_memory(kernel: &Kernel) -> KernelResult<UserMemory<'_>> {
    let sched = kernel.scheduler();
    let space = sched
        .address_space_of(current(kernel)?)
        .ok_or(KernelError::NoSuchProcess)?;
    Ok(UserMemory::new(sched.address_spaces(), space))
}

/// Implements `WriteConsole(ptr, len)`.
///
/// - `len == 0` succeeds with 0 and touches nothing,
/// - the whole range is validated before the first byte goes out,
/// - returns the number of bytes the console accepted.
fn sys_write_console(kernel: &Kernel, ptr: u64, len: usize) -> KernelResult<u64> {
    if len == 0 {
        return Ok(0);
    }
    let memory = caller_memory(kernel)?;
    memory.probe(ptr, len, Access::READ)?;

    let mut bounce = [0u8; CONSOLE_CHUNK];
    let mut written = 0usize;
    while written < len {
        let chunk = (len - written).min(CONSOLE_CHUNK);
        memory.copy_in(ptr + written as u64, &mut bounce[..chunk])?;
        let accepted = kernel.services().console_write(&bounce[..chunk])?;
        written += accepted;
        if accepted < chunk {
            break;
        }
    }
    Ok(written as u64)
}

/// Implements `ProcessList(buf, capacity)`.
///
/// Writes up to `capacity` [`ProcessRecord`]s and returns how many were
/// written. A null buffer with zero capacity returns the process count.
fn sys_process_list(kernel: &Kernel, buf: u64, capacity: usize) -> KernelResult<u64> {
    let mut infos = alloc::vec::Vec::new();
    kernel.scheduler().process_list(&mut infos)?;

    if buf == 0 && capacity == 0 {
        return Ok(infos.len() as u64);
    }

    let count = infos.len().min(capacity);
    let bytes = count
        .checked_mul(ProcessRecord::SIZE)
        .ok_or(KernelError::InvalidArgument)?;
    let memory = caller_memory(kernel)?;
    memory.probe(buf, bytes, Access::WRITE)?;

    for (i, info) in infos.iter().take(count).enumerate() {
        let record = ProcessRecord::from_info(info);
        let va = buf + (i * ProcessRecord::SIZE) as u64;
        memory.copy_out(va, &record.to_bytes())?;
    }
    Ok(count as u64)
}

/// Copies `s` plus a NUL terminator to `buf` if it fits in `len` bytes.
fn copy_out_cstr(memory: &UserMemory<'_>, buf: u64, len: usize, s: &str) -> KernelResult<u64> {
    let needed = s.len() + 1;
    if len < needed {
        return Err(KernelError::InvalidArgument);
    }
    memory.probe(buf, needed, Access::WRITE)?;
    memory.copy_out(buf, s.as_bytes())?;
    memory.copy_out(buf + s.len() as u64, &[0])?;
    Ok(s.len() as u64)
}

/// Implements `GetCwd(buf, len)`: returns the path length without the NUL.
fn sys_get_cwd(kernel: &Kernel, buf: u64, len: usize) -> KernelResult<u64> {
    let cwd = kernel
        .scheduler()
        .with_current(|p| *p.cwd())
        .ok_or(KernelError::NoSuchProcess)?;
    copy_out_cstr(&caller_memory(kernel)?, buf, len, cwd.as_str())
}

/// Implements `GetArg(index, buf, len)`: returns the argument length.
fn sys_get_arg(kernel: &Kernel, index: usize, buf: u64, len: usize) -> KernelResult<u64> {
    let arg = kernel
        .scheduler()
        .with_current(|p| p.argv().get(index).copied())
        .ok_or(KernelError::NoSuchProcess)?
        .ok_or(KernelError::InvalidArgument)?;
    copy_out_cstr(&caller_memory(kernel)?, buf, len, arg.as_str())
}

/// Resolves `path` against `cwd` into an absolute path without `.` or `..`
/// components. `..` at the root stays at the root.
pub fn normalize_path(cwd: &str, path: &str) -> KernelResult<PathStr> {
    if path.is_empty() {
        return Err(KernelError::InvalidArgument);
    }

    let mut out = PathStr::from_str_truncate("/");
    let base = if path.starts_with('/') { "" } else { cwd };

    for component in base.split('/').chain(path.split('/')) {
        match component {
            "" | "." => {}
            ".." => {
                let current = out;
                let s = current.as_str();
                let cut = s.rfind('/').unwrap_or(0).max(1);
                out = PathStr::from_str_truncate(&s[..cut]);
            }
            name => {
                if out.as_str() != "/" && !out.push_str_truncate("/") {
                    return Err(KernelError::InvalidArgument);
                }
                if !out.push_str_truncate(name) {
                    return Err(KernelError::InvalidArgument);
                }
            }
        }
    }
    Ok(out)
}

/// Implements `Chdir(path)`.
fn sys_chdir(kernel: &Kernel, path: u64) -> KernelResult<u64> {
    let requested: PathStr = caller_memory(kernel)?.copy_in_str::<MAX_PATH_LEN>(path)?;
    let sched = kernel.scheduler();
    let cwd = sched
        .with_current(|p| *p.cwd())
        .ok_or(KernelError::NoSuchProcess)?;

    let target = normalize_path(cwd.as_str(), requested.as_str())?;
    if !kernel.services().directory_exists(target.as_str()) {
        return Err(KernelError::InvalidArgument);
    }
    sched
        .with_current(|p| p.set_cwd(target))
        .ok_or(KernelError::NoSuchProcess)?;
    Ok(SYSCALL_OK)
}

/// Implements `SetName(ptr)`: names longer than the limit are truncated.
fn sys_set_name(kernel: &Kernel, ptr: u64) -> KernelResult<u64> {
    let name: ProcessName = caller_memory(kernel)?.copy_in_str::<MAX_NAME_LEN>(ptr)?;
    if name.is_empty() {
        return Err(KernelError::InvalidArgument);
    }
    kernel
        .scheduler()
        .with_current(|p| p.set_name(name))
        .ok_or(KernelError::NoSuchProcess)?;
    Ok(SYSCALL_OK)
}

/// Implements `ReadKey`.
///
/// A buffered key is returned at once. Otherwise the caller sleeps on the
/// input queue and receives the key that `Kernel::notify_input` hands over.
fn sys_read_key(kernel: &Kernel, frame: &mut TrapFrame) -> Completion {
    let mut key = None;
    // Saved as the result should the waiter be woken without a key.
    frame.set_return(SYSCALL_OK);

    let blocked = kernel.input().sleep_if(kernel.scheduler(), frame, || {
        key = kernel.services().read_key();
        key.is_none()
    });

    match blocked {
        Ok(true) => Completion::Deferred,
        Ok(false) => Completion::Immediate(key.map(u64::from).ok_or(KernelError::Io)),
        Err(err) => Completion::Immediate(Err(err)),
    }
}
