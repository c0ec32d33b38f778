use crate::config::MAX_NAME_LEN;
use crate::error::{KernelError, KernelResult};
use crate::process::ProcessInfo;

/// Stable syscall numbers exposed to user mode.
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallId {
    /// Cooperative reschedule request.
    Yield = 0,
    /// Write bytes to the kernel console.
    WriteConsole = 1,
    /// Terminate current process.
    Exit = 2,
    /// Clone the current process.
    Fork = 3,
    /// Wait for a child to exit and collect its status.
    WaitPid = 4,
    GetPid = 5,
    GetPpid = 6,
    /// Sleep for a number of milliseconds.
    Sleep = 7,
    /// Timer ticks since boot.
    Uptime = 8,
    /// Copy process records into a user buffer.
    ProcessList = 9,
    GetCwd = 10,
    Chdir = 11,
    ArgCount = 12,
    GetArg = 13,
    GetPriority = 14,
    SetPriority = 15,
    /// Block until a key is available.
    ReadKey = 16,
    SetName = 17,
}

impl SyscallId {
    /// Maps a raw syscall number to its id.
    pub const fn from_raw(nr: u64) -> Option<Self> {
        Some(match nr {
            0 => Self::Yield,
            1 => Self::WriteConsole,
            2 => Self::Exit,
            3 => Self::Fork,
            4 => Self::WaitPid,
            5 => Self::GetPid,
            6 => Self::GetPpid,
            7 => Self::Sleep,
            8 => Self::Uptime,
            9 => Self::ProcessList,
            10 => Self::GetCwd,
            11 => Self::Chdir,
            12 => Self::ArgCount,
            13 => Self::GetArg,
            14 => Self::GetPriority,
            15 => Self::SetPriority,
            16 => Self::ReadKey,
            17 => Self::SetName,
            _ => return None,
        })
    }

    pub const fn as_u64(self) -> u64 {
        self as u64
    }
}

/// Unknown syscall number.
pub const SYSCALL_ERR_UNSUPPORTED: u64 = encode_error(KernelError::Unsupported);

/// Invalid argument combination for a known syscall.
pub const SYSCALL_ERR_INVALID_ARG: u64 = encode_error(KernelError::InvalidArgument);

/// I/O error during syscall execution.
pub const SYSCALL_ERR_IO: u64 = encode_error(KernelError::Io);

/// PID table or address-space exhaustion.
pub const SYSCALL_ERR_NO_MEMORY: u64 = encode_error(KernelError::OutOfMemory);

/// Wait target is not a child of the caller.
pub const SYSCALL_ERR_NO_CHILD: u64 = encode_error(KernelError::NoSuchProcess);

/// User pointer outside the caller's mapped range.
pub const SYSCALL_ERR_FAULT: u64 = encode_error(KernelError::InvalidAddress);

/// Lowest raw value that is an error code.
const SYSCALL_ERR_FLOOR: u64 = 0u64.wrapping_sub(4095);

/// Successful syscall return code for void-like operations.
pub const SYSCALL_OK: u64 = 0;

/// Two's complement negation of the error number.
pub const fn encode_error(err: KernelError) -> u64 {
    0u64.wrapping_sub(err.errno())
}

/// Encodes an operation result for the return register.
#[inline]
pub fn encode_result(result: KernelResult<u64>) -> u64 {
    match result {
        Ok(value) => value,
        Err(err) => encode_error(err),
    }
}

/// Upper exclusive bound of user-accessible canonical virtual addresses.
const USER_CANONICAL_END: u64 = 0x0000_8000_0000_0000;

/// Returns `true` when `start..start+len` lies entirely within user
/// canonical space.
///
/// Rejects null pointers, kernel-half addresses, and integer-overflow
/// attempts. A zero-length range is always valid (no memory access occurs).
///
/// A valid range does not guarantee the memory is mapped; translation
/// through the caller's address space decides that.
pub fn is_valid_user_range(start: u64, len: usize) -> bool {
    if len == 0 {
        return true;
    }
    if start == 0 {
        return false;
    }
    let end = match start.checked_add(len as u64) {
        Some(e) => e,
        None => return false,
    };
    start < USER_CANONICAL_END && end <= USER_CANONICAL_END
}

/// User-facing syscall error space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// A kernel error the ABI knows about.
    Kernel(KernelError),
    /// Any unclassified value in the error range.
    Unknown(u64),
}

/// Decodes a raw syscall return value into `Result`.
#[inline]
pub fn decode_result(raw: u64) -> Result<u64, SysError> {
    if raw < SYSCALL_ERR_FLOOR {
        return Ok(raw);
    }
    let errno = 0u64.wrapping_sub(raw);
    match KernelError::from_errno(errno) {
        Some(err) => Err(SysError::Kernel(err)),
        None => Err(SysError::Unknown(raw)),
    }
}

/// Fixed-layout process record written by `ProcessList`.
///
/// Wire layout (little-endian, 32 bytes, no padding):
/// - `0..4`   pid
/// - `4..8`   parent pid (0 = none)
/// - `8..12`  exit code (valid when state is zombie)
/// - `12`     priority band
/// - `13`     state (`ProcessState::as_u8`)
/// - `14..16` name length
/// - `16..32` name bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent: u32,
    pub exit_code: i32,
    pub priority: u8,
    pub state: u8,
    pub name_len: u16,
    pub name: [u8; MAX_NAME_LEN],
}

impl ProcessRecord {
    pub const SIZE: usize = 16 + MAX_NAME_LEN;

    pub fn from_info(info: &ProcessInfo) -> Self {
        let mut name = [0u8; MAX_NAME_LEN];
        let bytes = info.name.as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);
        Self {
            pid: info.pid.as_u32(),
            parent: info.parent.map_or(0, |p| p.as_u32()),
            exit_code: info.exit_code.unwrap_or(0),
            priority: info.priority.as_u8(),
            state: info.state.as_u8(),
            name_len: bytes.len() as u16,
            name,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.pid.to_le_bytes());
        out[4..8].copy_from_slice(&self.parent.to_le_bytes());
        out[8..12].copy_from_slice(&self.exit_code.to_le_bytes());
        out[12] = self.priority;
        out[13] = self.state;
        out[14..16].copy_from_slice(&self.name_len.to_le_bytes());
        out[16..].copy_from_slice(&self.name);
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut name = [0u8; MAX_NAME_LEN];
        name.copy_from_slice(&bytes[16..]);
        Self {
            pid: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            parent: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            exit_code: i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            priority: bytes[12],
            state: bytes[13],
            name_len: u16::from_le_bytes([bytes[14], bytes[15]]),
            name,
        }
    }

    pub fn name(&self) -> &str {
        let len = (self.name_len as usize).min(MAX_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}
