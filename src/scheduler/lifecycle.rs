//! Process lifecycle: fork, exit, waitpid, sleep, and reaping.
//!
//! Calls that switch the trap frame (exit, blocking wait, sleep) never write a
//! result into the frame after the switch: the frame then belongs to the next
//! thread. A blocked caller receives its result when it is woken, written into
//! its saved context.

use crate::arch::interrupts::{self, TrapFrame};
use crate::error::{fatal, FatalError, KernelError, KernelResult};
use crate::memory::{Access, AddressSpaces};
use crate::process::{
    Argv, PathStr, Pid, Priority, Process, ProcessName, ProcessState, Thread, WaitChannel,
    WaitRequest, WaitTarget,
};
use crate::syscall::types::encode_error;
use crate::syscall::usermem::UserMemory;

use super::roundrobin::{Scheduler, SchedulerState};

/// Attributes a fork child copies from its parent.
struct Inherited {
    name: ProcessName,
    priority: Priority,
    cwd: PathStr,
    argv: Argv,
}

/// Result of [`Scheduler::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A matching zombie child was reaped immediately.
    Reaped { pid: Pid, exit_code: i32 },
    /// The caller blocked; the frame now holds the next thread. The child
    /// PID lands in the caller's saved return register when it is woken.
    Blocked,
}

impl SchedulerState {
    /// Oldest zombie child of `parent` that `target` selects.
    fn find_zombie_child(&self, parent: Pid, target: WaitTarget) -> Option<Pid> {
        self.zombies.iter().find(|&pid| {
            target.matches(pid)
                && self
                    .table
                    .get(pid)
                    .is_some_and(|p| p.parent == Some(parent))
        })
    }

    /// Frees the slot of zombie `pid` and returns its exit code.
    fn reap(&mut self, pid: Pid) -> Option<(Pid, i32)> {
        let process = self.table.get(pid)?;
        if process.state != ProcessState::Zombie {
            return None;
        }
        let parent = process.parent;

        self.zombies.remove(pid);
        if let Some(parent) = parent.and_then(|p| self.table.get_mut(p)) {
            parent.children.remove(pid);
        }

        // A reused PID must not inherit the adopter role.
        if self.init == Some(pid) {
            self.init = None;
        }

        let mut process = self.table.remove(pid)?;
        if let Some(stack) = process.thread.tear_down() {
            self.defer_free(stack);
        }
        let exit_code = process.exit_code.unwrap_or(0);
        log::debug!(target: "proc", "reaped {} (status {})", pid, exit_code);
        Some((pid, exit_code))
    }

    /// Non-blocking `waitpid` core.
    ///
    /// `Ok(None)` means a matching child exists but none has exited yet.
    fn try_wait(&mut self, parent: Pid, target: WaitTarget) -> KernelResult<Option<(Pid, i32)>> {
        let process = self.table.get(parent).ok_or(KernelError::NoSuchProcess)?;
        if let Some(child) = self.find_zombie_child(parent, target) {
            return Ok(self.reap(child));
        }
        if process.children.iter().any(|child| target.matches(child)) {
            Ok(None)
        } else {
            Err(KernelError::NoSuchProcess)
        }
    }

    /// Completes the pending `waitpid` of `parent` if one of its zombie
    /// children now satisfies it.
    fn notify_parent(&mut self, spaces: &dyn AddressSpaces, parent: Pid) {
        let Some(process) = self.table.get(parent) else {
            return;
        };
        if process.state != ProcessState::Waiting {
            return;
        }
        let Some(request) = process.wait else {
            return;
        };
        let Some(child) = self.find_zombie_child(parent, request.target) else {
            return;
        };
        let Some((child, exit_code)) = self.reap(child) else {
            return;
        };

        let Some(process) = self.table.get_mut(parent) else {
            return;
        };
        let mut result = child.as_u64();
        if request.status_ptr != 0 {
            if let Some(space) = process.address_space {
                if let Err(err) = UserMemory::new(spaces, space).write_i32(request.status_ptr, exit_code) {
                    result = encode_error(err);
                }
            }
        }
        process.thread.context_mut().set_return(result);
        process.state = ProcessState::Running;
        process.wait = None;
        self.enqueue(parent);
    }

    /// Moves `pid` into the zombie state and releases its resources.
    ///
    /// Children are handed to init, or to the kernel when init is gone or
    /// is the exiting process itself. A parent blocked in `waitpid` on this
    /// process is completed here.
    pub(super) fn mark_exited(&mut self, spaces: &dyn AddressSpaces, pid: Pid, exit_code: i32) {
        self.dequeue(pid);
        let kernel_space = self.kernel_space;

        let Some(process) = self.table.get_mut(pid) else {
            return;
        };
        process.state = ProcessState::Zombie;
        process.exit_code = Some(exit_code);
        process.wait = None;
        process.channel = None;
        let parent = process.parent;
        let children = core::mem::take(&mut process.children);
        let owned_space = if process.owns_address_space {
            process.address_space.take()
        } else {
            None
        };

        if let Some(space) = owned_space {
            // Never tear down the tables the CPU is still walking.
            if self.active_space == space {
                self.activate(spaces, kernel_space);
            }
            spaces.destroy(space);
        }

        let adopter = self.init.filter(|&init| {
            init != pid
                && self
                    .table
                    .get(init)
                    .is_some_and(|p| p.state != ProcessState::Zombie)
        });

        let mut adopted_zombie = false;
        for child in children.iter() {
            let Some(process) = self.table.get_mut(child) else {
                continue;
            };
            process.parent = adopter;
            adopted_zombie |= process.state == ProcessState::Zombie;
            if let Some(adopter) = adopter.and_then(|a| self.table.get_mut(a)) {
                adopter.children.insert(child);
            }
        }

        if !self.zombies.push_back(pid) {
            log::warn!(target: "proc", "zombie list full, {} not tracked", pid);
        }

        log::info!(target: "proc", "{} exited with status {}", pid, exit_code);

        if let Some(parent) = parent {
            self.notify_parent(spaces, parent);
        }
        if adopted_zombie {
            if let Some(adopter) = adopter {
                self.notify_parent(spaces, adopter);
            }
        }
    }
}

/// Frees zombies nobody will ever wait for.
pub(super) fn reap_orphans(st: &mut SchedulerState) {
    loop {
        let orphan = st
            .zombies
            .iter()
            .find(|&pid| st.table.get(pid).map_or(true, |p| p.parent.is_none()));
        let Some(pid) = orphan else {
            break;
        };
        if st.reap(pid).is_none() {
            // Stale entry without a zombie behind it.
            st.zombies.remove(pid);
        }
    }
}

impl Scheduler {
    /// Duplicates the current process.
    ///
    /// The child receives a copy of the parent's address space, its priority,
    /// name, working directory and arguments, and the parent's live registers
    /// with a return value of 0. It becomes ready at the tail of its band.
    /// The parent gets the child PID from the syscall layer.
    pub fn fork(&self, frame: &TrapFrame) -> KernelResult<Pid> {
        let (child, parent, parent_space, inherited) = {
            let mut st = self.state.lock();
            let parent = st.current.ok_or(KernelError::InvalidArgument)?;
            let process = st.table.get(parent).ok_or(KernelError::NoSuchProcess)?;
            if process.is_kernel() {
                return Err(KernelError::InvalidArgument);
            }
            let space = process.address_space.ok_or(KernelError::InvalidArgument)?;
            let inherited = Inherited {
                name: process.name,
                priority: process.priority,
                cwd: process.cwd,
                argv: process.argv,
            };
            let child = st.table.reserve()?;
            (child, parent, space, inherited)
        };

        // Copying the address space may allocate frames and page tables; it
        // runs without the scheduler lock.
        let child_space = match self.spaces.duplicate(parent_space) {
            Ok(space) => space,
            Err(err) => {
                self.state.lock().table.cancel(child);
                log::warn!(target: "proc", "fork of {} failed: {}", parent, err);
                return Err(err);
            }
        };

        let mut context = *frame;
        context.set_return(0);

        let mut process = Process::new(
            child,
            inherited.name.as_str(),
            inherited.priority,
            child_space,
            true,
            Thread::from_context(child, context),
        );
        process.parent = Some(parent);
        process.cwd = inherited.cwd;
        process.argv = inherited.argv;

        let mut st = self.state.lock();
        if let Err(err) = st.table.commit(process) {
            st.table.cancel(child);
            drop(st);
            self.spaces.destroy(child_space);
            return Err(err);
        }
        if let Some(parent) = st.table.get_mut(parent) {
            parent.children.insert(child);
        }
        st.enqueue(child);

        log::info!(target: "proc", "{} forked {}", parent, child);
        Ok(child)
    }

    /// Terminates the current process and switches `frame` to a successor.
    ///
    /// The dying thread is never re-enqueued and its frame is not saved.
    pub fn exit(&self, frame: &mut TrapFrame, exit_code: i32) {
        let mut st = self.state.lock();
        let Some(pid) = st.current else {
            fatal(FatalError::IdleExit);
        };
        st.mark_exited(&*self.spaces, pid, exit_code);

        if st.run_queue.is_empty() && st.idle.is_none() {
            fatal(FatalError::NoSuccessor);
        }
        st.switch(&*self.spaces, frame, false);
    }

    /// Exit path for kernel threads, which have no syscall frame to hand
    /// over: marks the thread exited and forces a reschedule.
    pub fn exit_current_thread(&self, exit_code: i32) -> ! {
        let pid = {
            let mut st = self.state.lock();
            let Some(pid) = st.current else {
                fatal(FatalError::IdleExit);
            };
            st.mark_exited(&*self.spaces, pid, exit_code);
            pid
        };

        interrupts::trigger_reschedule();

        // A zombie is never selected again.
        fatal(FatalError::ResumedAfterExit { pid: pid.as_u32() })
    }

    /// Waits for a child of the current process to exit.
    ///
    /// `status_ptr` (0 for none) must be writable in the caller's address
    /// space; it receives the exit code. With no matching child at all the
    /// call fails with `NoSuchProcess`. A zombie child is reaped at once;
    /// otherwise the caller blocks and `frame` switches away.
    pub fn wait(
        &self,
        frame: &mut TrapFrame,
        target: WaitTarget,
        status_ptr: u64,
    ) -> KernelResult<WaitOutcome> {
        let mut st = self.state.lock();
        let pid = st.current.ok_or(KernelError::InvalidArgument)?;
        let space = st
            .table
            .get(pid)
            .and_then(|p| p.address_space)
            .ok_or(KernelError::NoSuchProcess)?;
        let memory = UserMemory::new(&*self.spaces, space);

        if status_ptr != 0 {
            memory.probe(status_ptr, core::mem::size_of::<i32>(), Access::WRITE)?;
        }

        if let Some((child, exit_code)) = st.try_wait(pid, target)? {
            if status_ptr != 0 {
                memory.write_i32(status_ptr, exit_code)?;
            }
            return Ok(WaitOutcome::Reaped {
                pid: child,
                exit_code,
            });
        }

        if let Some(process) = st.table.get_mut(pid) {
            process.state = ProcessState::Waiting;
            process.wait = Some(WaitRequest { target, status_ptr });
        }
        st.switch(&*self.spaces, frame, true);
        Ok(WaitOutcome::Blocked)
    }

    /// Non-blocking wait for `parent`.
    ///
    /// Returns the reaped child and its exit code, `None` while matching
    /// children are still alive, or `NoSuchProcess` when nothing matches.
    pub fn try_wait(&self, parent: Pid, target: WaitTarget) -> KernelResult<Option<(Pid, i32)>> {
        self.state.lock().try_wait(parent, target)
    }

    /// Puts the current process to sleep for at least `ms` milliseconds.
    ///
    /// The return value 0 is set in `frame` before the switch, so it is
    /// what the sleeper sees after waking. `ms == 0` only yields.
    pub fn sleep(&self, frame: &mut TrapFrame, ms: u64) -> KernelResult<()> {
        frame.set_return(0);
        let mut st = self.state.lock();
        if st.current.is_none() {
            return Err(KernelError::InvalidArgument);
        }
        if ms == 0 {
            st.switch(&*self.spaces, frame, true);
            return Ok(());
        }
        let wake_at = st.jiffies.saturating_add(self.config.ms_to_ticks(ms));
        st.block_current(&*self.spaces, frame, WaitChannel::Timer(wake_at))?;
        Ok(())
    }
}
