//! FIFO wait queue of blocked processes.
//!
//! Processes register themselves as waiters and are put to sleep in the
//! scheduler; an event source later wakes one or all of them. Membership is
//! kept as PIDs, so a process that dies or is woken elsewhere leaves at most
//! a stale entry. Each queue has its own wait channel, and a stale entry is
//! skipped unless its process still sleeps on this queue.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::interrupts::TrapFrame;
use crate::error::{KernelError, KernelResult};
use crate::process::{Pid, WaitChannel};
use crate::scheduler::{PidQueue, Scheduler};

use super::spinlock::SpinLock;

/// A wait queue with wake-one and wake-all semantics.
///
/// # Usage
///
/// **Sleeping** (syscall context):
/// ```ignore
/// if QUEUE.sleep_if(&sched, frame, || !data_available())? {
///     return Completion::Deferred; // frame now belongs to the next thread
/// }
/// ```
///
/// **Waking** (IRQ or syscall context):
/// ```ignore
/// produce_data();
/// QUEUE.wake_one(&sched, Some(byte));
/// ```
pub struct WaitQueue {
    waiters: SpinLock<PidQueue>,
    /// Channel id, assigned on first use; 0 until then.
    id: AtomicUsize,
}

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(1);

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(PidQueue::new()),
            id: AtomicUsize::new(0),
        }
    }

    /// The channel processes sleeping on this queue are blocked on.
    pub fn channel(&self) -> WaitChannel {
        let id = self.id.load(Ordering::Acquire);
        if id != 0 {
            return WaitChannel::Queue(id);
        }
        let fresh = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        match self
            .id
            .compare_exchange(0, fresh, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => WaitChannel::Queue(fresh),
            Err(current) => WaitChannel::Queue(current),
        }
    }

    /// Conditionally blocks the current process.
    ///
    /// `should_block` is evaluated with interrupts masked and the queue
    /// locked, so no waker can slip in between the check and the state
    /// change. This prevents the lost-wakeup race where the producer fires
    /// between the caller's empty-check and the sleep.
    ///
    /// Returns `true` if the process was blocked; `frame` then holds the
    /// next thread. Returns `false` if the predicate returned `false`.
    pub fn sleep_if(
        &self,
        sched: &Scheduler,
        frame: &mut TrapFrame,
        should_block: impl FnOnce() -> bool,
    ) -> KernelResult<bool> {
        let mut waiters = self.waiters.lock();
        let pid = sched.current_pid().ok_or(KernelError::InvalidArgument)?;

        if !should_block() {
            return Ok(false);
        }
        // A stale entry from an earlier wait must not keep its old position.
        waiters.remove(pid);
        if !waiters.push_back(pid) {
            return Err(KernelError::OutOfMemory);
        }
        if let Err(err) = sched.block_on(frame, self.channel()) {
            waiters.remove(pid);
            return Err(err);
        }
        Ok(true)
    }

    /// Wakes the oldest waiter.
    ///
    /// `value`, when given, becomes the return value of the waiter's
    /// blocked syscall. Stale entries (waiters that died, were woken by
    /// someone else, or now sleep on another channel) are skipped.
    pub fn wake_one(&self, sched: &Scheduler, value: Option<u64>) -> Option<Pid> {
        let channel = self.channel();
        let mut waiters = self.waiters.lock();
        while let Some(pid) = waiters.pop_front() {
            if sched.wake_on(pid, channel, value) {
                return Some(pid);
            }
        }
        None
    }

    /// Wakes every waiter. Returns how many were actually woken.
    ///
    /// Woken processes compete for the event on their next quantum; those
    /// that find nothing simply sleep again.
    pub fn wake_all(&self, sched: &Scheduler) -> usize {
        let channel = self.channel();
        let mut waiters = self.waiters.lock();
        let mut woken = 0;
        while let Some(pid) = waiters.pop_front() {
            if sched.wake_on(pid, channel, None) {
                woken += 1;
            }
        }
        woken
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.waiters.lock().contains(pid)
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
