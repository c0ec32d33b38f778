//! Index-based queues: PID FIFOs and the priority-banded run queue.
//!
//! Membership is tracked by PID instead of links embedded in threads, so a
//! freed process can never leave a dangling pointer behind in a queue.

use crate::config::{MAX_PROCESSES, PRIORITY_LEVELS};
use crate::process::{Pid, Priority};

/// Fixed-capacity FIFO of PIDs backed by a ring.
///
/// `head` is the oldest element; `len` entries follow it modulo the ring
/// size. Unlike a byte ring there is no wasted slot, since `len`
/// distinguishes full from empty.
#[derive(Clone, Copy)]
pub struct PidQueue {
    ring: [Pid; MAX_PROCESSES],
    head: usize,
    len: usize,
}

impl PidQueue {
    pub const fn new() -> Self {
        Self {
            ring: [Pid::IDLE; MAX_PROCESSES],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `pid`. Returns `false` when the queue is full.
    pub fn push_back(&mut self, pid: Pid) -> bool {
        if self.len == MAX_PROCESSES {
            return false;
        }
        let tail = (self.head + self.len) % MAX_PROCESSES;
        self.ring[tail] = pid;
        self.len += 1;
        true
    }

    /// Removes and returns the oldest PID.
    pub fn pop_front(&mut self) -> Option<Pid> {
        if self.len == 0 {
            return None;
        }
        let pid = self.ring[self.head];
        self.head = (self.head + 1) % MAX_PROCESSES;
        self.len -= 1;
        Some(pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.iter().any(|p| p == pid)
    }

    /// Removes the first occurrence of `pid`, keeping the order of the rest.
    pub fn remove(&mut self, pid: Pid) -> bool {
        let Some(pos) = self.iter().position(|p| p == pid) else {
            return false;
        };
        // Shift the younger entries one slot towards the head.
        for i in pos..self.len - 1 {
            let dst = (self.head + i) % MAX_PROCESSES;
            let src = (self.head + i + 1) % MAX_PROCESSES;
            self.ring[dst] = self.ring[src];
        }
        self.len -= 1;
        true
    }

    /// Entries from oldest to youngest.
    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        (0..self.len).map(move |i| self.ring[(self.head + i) % MAX_PROCESSES])
    }
}

impl Default for PidQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Ready threads grouped by priority band, FIFO within a band.
pub struct RunQueue {
    bands: [PidQueue; PRIORITY_LEVELS],
}

impl RunQueue {
    pub const fn new() -> Self {
        Self {
            bands: [PidQueue::new(); PRIORITY_LEVELS],
        }
    }

    /// Appends `pid` at the tail of its priority band.
    pub fn enqueue(&mut self, pid: Pid, priority: Priority) -> bool {
        self.bands[priority.band()].push_back(pid)
    }

    /// Takes the oldest thread of the most important non-empty band.
    pub fn pop_next(&mut self) -> Option<Pid> {
        self.bands.iter_mut().find_map(|band| band.pop_front())
    }

    pub fn remove(&mut self, pid: Pid) -> bool {
        self.bands.iter_mut().any(|band| band.remove(pid))
    }

    pub fn len(&self) -> usize {
        self.bands.iter().map(PidQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(PidQueue::is_empty)
    }

    /// Ready PIDs in selection order.
    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        self.bands.iter().flat_map(PidQueue::iter)
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
