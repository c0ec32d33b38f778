//! Compile-time limits and runtime scheduler configuration.

use crate::error::{KernelError, KernelResult};
use crate::process::Priority;

/// Hard upper bound of the PID table (slot 0 included).
///
/// Child sets and wait queues are fixed-size and sized by this value.
pub const MAX_PROCESSES: usize = 64;

/// Number of priority bands in the run queue. Band 0 is served first.
pub const PRIORITY_LEVELS: usize = 8;

/// Priority given to processes that do not ask for one.
pub const DEFAULT_PRIORITY: Priority = Priority::new_const(1);

/// PIT frequency programmed by the boot code.
pub const TICK_HZ: u64 = 250;

/// Kernel stack size for kernel threads.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Alignment of kernel thread stacks.
pub const STACK_ALIGNMENT: usize = 16;

/// Granularity of user-pointer translation.
pub const PAGE_SIZE: usize = 4096;

/// Maximum bytes kept of a process name.
pub const MAX_NAME_LEN: usize = 16;

/// Maximum bytes kept of a working-directory path.
pub const MAX_PATH_LEN: usize = 128;

/// Maximum number of argument-vector entries.
pub const MAX_ARGS: usize = 8;

/// Maximum bytes kept of one argument.
pub const MAX_ARG_LEN: usize = 64;

/// Runtime parameters of one scheduler instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of PID slots, including the reserved slot 0.
    pub max_processes: usize,
    /// Timer interrupt frequency in Hz, used for sleep deadlines.
    pub tick_hz: u64,
    /// Priority of processes spawned without an explicit priority.
    pub default_priority: Priority,
}

impl SchedulerConfig {
    /// Checks that the configuration can back a scheduler.
    pub fn validate(&self) -> KernelResult<()> {
        // Slot 0 is reserved, so at least one real process needs a second slot.
        if self.max_processes < 2 || self.max_processes > MAX_PROCESSES {
            return Err(KernelError::InvalidArgument);
        }
        if self.tick_hz == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if self.default_priority.band() >= PRIORITY_LEVELS {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }

    /// Converts a millisecond duration into timer ticks, rounding up.
    ///
    /// Any non-zero duration sleeps for at least one tick.
    pub fn ms_to_ticks(&self, ms: u64) -> u64 {
        if ms == 0 {
            return 0;
        }
        let ticks = ms.saturating_mul(self.tick_hz).div_ceil(1000);
        ticks.max(1)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_processes: MAX_PROCESSES,
            tick_hz: TICK_HZ,
            default_priority: DEFAULT_PRIORITY,
        }
    }
}
