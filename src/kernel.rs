//! Kernel context handed to the trap paths.

extern crate alloc;
use alloc::sync::Arc;

use crate::error::KernelResult;
use crate::process::Pid;
use crate::scheduler::Scheduler;
use crate::sync::WaitQueue;

/// Device and filesystem services the syscall layer forwards to.
pub trait KernelServices: Send + Sync {
    /// Writes bytes to the console. Returns how many were written.
    fn console_write(&self, bytes: &[u8]) -> KernelResult<usize>;

    /// Next buffered key, if any.
    fn read_key(&self) -> Option<u8>;

    /// Whether `path` (absolute, normalised) names an existing directory.
    fn directory_exists(&self, path: &str) -> bool;
}

/// Everything a syscall needs: the scheduler, the keyboard wait queue and
/// the external services.
pub struct Kernel {
    scheduler: Scheduler,
    input: WaitQueue,
    services: Arc<dyn KernelServices>,
}

impl Kernel {
    pub fn new(scheduler: Scheduler, services: Arc<dyn KernelServices>) -> Self {
        Self {
            scheduler,
            input: WaitQueue::new(),
            services,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Processes blocked in `ReadKey`.
    pub fn input(&self) -> &WaitQueue {
        &self.input
    }

    pub fn services(&self) -> &dyn KernelServices {
        &*self.services
    }

    /// Hands `key` to the oldest process blocked in `ReadKey`.
    ///
    /// Returns `false` when nobody is waiting; the keyboard driver then
    /// keeps the key buffered for the next `read_key`.
    pub fn notify_input(&self, key: u8) -> bool {
        match self.input.wake_one(&self.scheduler, Some(u64::from(key))) {
            Some(pid) => {
                log::trace!(target: "syscall", "key {:#04x} delivered to {}", key, pid);
                true
            }
            None => false,
        }
    }

    pub fn input_waiter_count(&self) -> usize {
        self.input.len()
    }

    /// Whether `pid` is blocked in `ReadKey`.
    pub fn is_waiting_for_input(&self, pid: Pid) -> bool {
        self.scheduler.wait_channel(pid) == Some(self.input.channel())
    }
}
