//! Architecture-specific code for x86_64

pub mod interrupts;
pub mod trap;

use bitflags::bitflags;

// GDT layout owned by the boot code:
//   [0] null
//   [1] kernel code
//   [2] kernel data
//   [3] user code
//   [4] user data
const KERNEL_CODE_INDEX: u16 = 1;
const KERNEL_DATA_INDEX: u16 = 2;
const USER_CODE_INDEX: u16 = 3;
const USER_DATA_INDEX: u16 = 4;

/// Requested Privilege Level (RPL) for ring 3.
const RPL_RING3: u16 = 0x3;

/// Kernel code segment selector (ring 0).
pub const KERNEL_CODE_SELECTOR: u16 = KERNEL_CODE_INDEX << 3;

/// Kernel data segment selector (ring 0).
pub const KERNEL_DATA_SELECTOR: u16 = KERNEL_DATA_INDEX << 3;

/// User code segment selector (ring 3).
pub const USER_CODE_SELECTOR: u16 = (USER_CODE_INDEX << 3) | RPL_RING3;

/// User data segment selector (ring 3).
pub const USER_DATA_SELECTOR: u16 = (USER_DATA_INDEX << 3) | RPL_RING3;

bitflags! {
    /// Subset of RFLAGS the scheduler writes into synthetic frames.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RFlags: u64 {
        /// Reserved bit 1, must always be set.
        const RESERVED = 1 << 1;
        /// Interrupt enable flag.
        const IF = 1 << 9;
    }
}

/// Default RFLAGS value for new tasks.
/// - IF=1: Enable timer preemption
/// - Reserved=1: Required by architecture
/// - IOPL=0: No direct I/O port access from ring 3
pub const DEFAULT_RFLAGS: RFlags = RFlags::IF.union(RFlags::RESERVED);
