//! Sleeping mutual-exclusion lock for process context.
//!
//! Unlike [`SpinLock`], a contended [`SleepLock`] puts the caller to sleep
//! instead of spinning. Ownership is handed directly to the oldest waiter on
//! release, so a woken waiter returns from its blocked syscall already
//! holding the lock.
//!
//! Lock order: sleeplock state, then its wait queue, then the scheduler.

use crate::arch::interrupts::TrapFrame;
use crate::error::{KernelError, KernelResult};
use crate::process::Pid;
use crate::scheduler::Scheduler;

use super::spinlock::SpinLock;
use super::waitqueue::WaitQueue;

/// Outcome of [`SleepLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquire {
    /// The caller owns the lock now.
    Acquired,
    /// The caller sleeps; `frame` holds the next thread. Ownership is
    /// transferred before the caller is woken.
    Blocked,
}

pub struct SleepLock {
    owner: SpinLock<Option<Pid>>,
    waiters: WaitQueue,
}

impl SleepLock {
    pub const fn new() -> Self {
        Self {
            owner: SpinLock::new(None),
            waiters: WaitQueue::new(),
        }
    }

    pub fn owner(&self) -> Option<Pid> {
        *self.owner.lock()
    }

    /// Takes the lock for `pid` if it is free.
    pub fn try_acquire(&self, pid: Pid) -> bool {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return false;
        }
        *owner = Some(pid);
        true
    }

    /// Acquires the lock for the current process, sleeping while another
    /// process holds it. Re-acquiring a held lock is an error.
    pub fn acquire(&self, sched: &Scheduler, frame: &mut TrapFrame) -> KernelResult<LockAcquire> {
        let mut owner = self.owner.lock();
        let pid = sched.current_pid().ok_or(KernelError::InvalidArgument)?;

        match *owner {
            None => {
                *owner = Some(pid);
                Ok(LockAcquire::Acquired)
            }
            Some(holder) if holder == pid => Err(KernelError::InvalidArgument),
            Some(_) => {
                // The owner lock stays held across the block, so a release
                // cannot run between the check and the enqueue.
                self.waiters.sleep_if(sched, frame, || true)?;
                Ok(LockAcquire::Blocked)
            }
        }
    }

    /// Releases the lock held by `pid`.
    ///
    /// Returns the waiter that now owns the lock, if any.
    pub fn release(&self, sched: &Scheduler, pid: Pid) -> KernelResult<Option<Pid>> {
        let mut owner = self.owner.lock();
        if *owner != Some(pid) {
            return Err(KernelError::InvalidArgument);
        }

        let next = self.waiters.wake_one(sched, Some(0));
        *owner = next;
        if let Some(next) = next {
            log::trace!(target: "sync", "sleeplock handed from {} to {}", pid, next);
        }
        Ok(next)
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

impl Default for SleepLock {
    fn default() -> Self {
        Self::new()
    }
}
