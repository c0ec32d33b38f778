//! Fixed-capacity PID table: the sole owner of process objects.

extern crate alloc;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

use super::{Pid, Process};

/// One slot in the PID table.
enum Slot {
    /// Available for allocation.
    Free,
    /// Held by an in-flight fork, or permanently for PID 0.
    Reserved,
    /// Owned by a live or zombie process.
    Used(Process),
}

pub struct ProcessTable {
    /// Never grows after construction; slot index == PID.
    slots: Vec<Slot>,
    used: usize,
}

impl ProcessTable {
    /// Builds a table with `capacity` slots. Slot 0 is reserved for the idle
    /// context.
    pub fn new(capacity: usize) -> KernelResult<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| KernelError::OutOfMemory)?;
        slots.push(Slot::Reserved);
        while slots.len() < capacity {
            slots.push(Slot::Free);
        }
        Ok(Self { slots, used: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots owned by processes (zombies included).
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Reserves the lowest free PID.
    ///
    /// A PID becomes free only once its process was reaped, so a reserved
    /// PID never aliases a live process.
    pub fn reserve(&mut self) -> KernelResult<Pid> {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Slot::Free))
            .ok_or(KernelError::OutOfMemory)?;
        self.slots[index] = Slot::Reserved;
        Ok(Pid::new(index as u32))
    }

    /// Returns a reservation that will not be committed.
    pub fn cancel(&mut self, pid: Pid) {
        if pid == Pid::IDLE {
            return;
        }
        if let Some(slot) = self.slots.get_mut(pid.index()) {
            if matches!(slot, Slot::Reserved) {
                *slot = Slot::Free;
            }
        }
    }

    /// Moves a process into its reserved slot.
    pub fn commit(&mut self, process: Process) -> KernelResult<()> {
        let pid = process.pid;
        if pid == Pid::IDLE {
            return Err(KernelError::InvalidArgument);
        }
        let slot = self
            .slots
            .get_mut(pid.index())
            .ok_or(KernelError::InvalidArgument)?;
        if !matches!(slot, Slot::Reserved) {
            return Err(KernelError::InvalidArgument);
        }
        *slot = Slot::Used(process);
        self.used += 1;
        Ok(())
    }

    /// Frees the slot of `pid`, handing the process back to the caller.
    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        let slot = self.slots.get_mut(pid.index())?;
        if !matches!(slot, Slot::Used(_)) {
            return None;
        }
        match core::mem::replace(slot, Slot::Free) {
            Slot::Used(process) => {
                self.used -= 1;
                Some(process)
            }
            _ => None,
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        match self.slots.get(pid.index()) {
            Some(Slot::Used(process)) => Some(process),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        match self.slots.get_mut(pid.index()) {
            Some(Slot::Used(process)) => Some(process),
            _ => None,
        }
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.get(pid).is_some()
    }

    /// Live and zombie processes in PID order.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Used(process) => Some(process),
            _ => None,
        })
    }
}
