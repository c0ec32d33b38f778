//! Priority round-robin scheduler core.
//!
//! The scheduler works on the trap frame of the interrupted thread: every
//! switch saves that frame into the current thread and overwrites it with
//! the snapshot of the next thread, which the trap stub then restores with
//! `iretq`. Timer preemption and voluntary switches (yield, block, exit) run
//! the same protocol.

use core::mem;

extern crate alloc;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::interrupts::{self, InterruptStackFrame, SavedRegisters, TrapFrame};
use crate::arch::{DEFAULT_RFLAGS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use crate::config::SchedulerConfig;
use crate::error::{fatal, FatalError, KernelError, KernelResult};
use crate::memory::{AddressSpaceId, AddressSpaces};
use crate::process::{
    Argv, KernelStack, KernelThreadFn, PathStr, Pid, Priority, Process, ProcessImage,
    ProcessInfo, ProcessState, ProcessTable, Thread, WaitChannel,
};
use crate::sync::spinlock::SpinLock;

use super::runqueue::{PidQueue, RunQueue};

/// Runtime state of one scheduler instance, guarded by a single spinlock.
pub(super) struct SchedulerState {
    /// Set by [`Scheduler::start`]; ticks before that only count jiffies.
    pub(super) started: bool,

    /// Sole owner of all process objects.
    pub(super) table: ProcessTable,

    /// Ready PIDs per priority band. The running thread is never queued.
    pub(super) run_queue: RunQueue,

    /// Exited processes awaiting reap, in exit order.
    pub(super) zombies: PidQueue,

    /// PID of the executing thread; `None` while the idle context runs.
    pub(super) current: Option<Pid>,

    /// The idle context. Installed by `start`, refreshed from the bootstrap
    /// frame on the first tick, selected whenever no thread is ready.
    pub(super) idle: Option<Thread>,

    /// Monotonic tick counter.
    pub(super) jiffies: u64,

    /// Address space currently loaded in the MMU.
    pub(super) active_space: AddressSpaceId,

    /// Kernel address space (idle and kernel threads).
    pub(super) kernel_space: AddressSpaceId,

    /// Adopter of orphaned children: the first user process spawned.
    pub(super) init: Option<Pid>,

    /// Kernel stacks of reaped threads, freed on the next tick once
    /// execution has certainly left them.
    pub(super) pending_free: Vec<KernelStack>,

    /// Number of switches that restored a different thread.
    pub(super) switches: u64,
}

impl SchedulerState {
    /// Appends `pid` to the tail of its band if it is runnable and not
    /// already queued. A thread is never queued twice.
    pub(super) fn enqueue(&mut self, pid: Pid) -> bool {
        let Some(process) = self.table.get_mut(pid) else {
            return false;
        };
        if !process.is_runnable() || process.thread.is_queued() {
            return false;
        }
        if !self.run_queue.enqueue(pid, process.priority) {
            return false;
        }
        process.thread.set_queued(true);
        true
    }

    pub(super) fn dequeue(&mut self, pid: Pid) {
        if let Some(process) = self.table.get_mut(pid) {
            if process.thread.is_queued() {
                self.run_queue.remove(pid);
                process.thread.set_queued(false);
            }
        }
    }

    /// Takes the next thread off the run queue and validates it.
    ///
    /// `None` means nothing is ready and the idle context should run.
    fn pick_next(&mut self) -> Option<Pid> {
        let pid = self.run_queue.pop_next()?;
        let Some(process) = self.table.get_mut(pid) else {
            fatal(FatalError::DeadThreadSelected { pid: pid.as_u32() });
        };
        process.thread.set_queued(false);

        if !process.is_runnable() {
            fatal(FatalError::DeadThreadSelected { pid: pid.as_u32() });
        }
        if !process.thread.validate() || process.thread.owner() != pid {
            fatal(FatalError::CorruptThread { pid: pid.as_u32() });
        }
        Some(pid)
    }

    /// Loads `space` into the MMU unless it is already active.
    pub(super) fn activate(&mut self, spaces: &dyn AddressSpaces, space: AddressSpaceId) {
        if self.active_space == space {
            return;
        }
        // SAFETY:
        // - `space` comes from scheduler-owned process metadata or is the
        //   kernel space; live address spaces always map the kernel.
        unsafe {
            spaces.activate(space);
        }
        self.active_space = space;
    }

    /// Context-switch protocol.
    ///
    /// 1. save the interrupted thread (when `save_current`),
    /// 2. re-enqueue it at the tail of its band if still runnable,
    /// 3. select the next thread,
    /// 4. switch the address space,
    /// 5. restore the next thread into `frame`.
    ///
    /// Step 4 always completes before step 5, so nothing restored into the
    /// frame can resolve through the previous address space.
    pub(super) fn switch(
        &mut self,
        spaces: &dyn AddressSpaces,
        frame: &mut TrapFrame,
        save_current: bool,
    ) {
        let previous = self.current;

        match previous {
            Some(pid) => {
                if let Some(process) = self.table.get_mut(pid) {
                    if save_current {
                        process.thread.save(frame);
                    }
                }
                self.enqueue(pid);
            }
            None => {
                if save_current {
                    if let Some(idle) = self.idle.as_mut() {
                        idle.save(frame);
                    }
                }
            }
        }

        let next = self.pick_next();

        let target_space = match next {
            Some(pid) => self
                .table
                .get(pid)
                .and_then(Process::address_space)
                .unwrap_or(self.kernel_space),
            None => self.kernel_space,
        };
        self.activate(spaces, target_space);

        match next {
            Some(pid) => {
                if let Some(process) = self.table.get(pid) {
                    *frame = *process.thread.context();
                }
            }
            None => {
                let Some(idle) = self.idle.as_ref() else {
                    fatal(FatalError::IdleMissing);
                };
                if !idle.validate() {
                    fatal(FatalError::CorruptThread { pid: 0 });
                }
                *frame = *idle.context();
            }
        }

        if next != previous {
            self.switches = self.switches.wrapping_add(1);
            log::debug!(
                target: "sched",
                "switch {} -> {}",
                previous.unwrap_or(Pid::IDLE),
                next.unwrap_or(Pid::IDLE)
            );
        }
        self.current = next;
    }

    /// Moves a sleeping process back to the run queue.
    ///
    /// With `expected` set, only a sleep on that channel is ended; `None`
    /// ends any sleep. `value`, when given, becomes the return value of the
    /// syscall the process blocked in. Processes in `waitpid` are only woken
    /// by a child exit and are ignored here.
    pub(super) fn wake(
        &mut self,
        pid: Pid,
        expected: Option<WaitChannel>,
        value: Option<u64>,
    ) -> bool {
        let Some(process) = self.table.get_mut(pid) else {
            return false;
        };
        if process.state != ProcessState::Sleeping {
            return false;
        }
        if expected.is_some_and(|channel| process.channel != Some(channel)) {
            return false;
        }
        process.state = ProcessState::Running;
        process.channel = None;
        if let Some(value) = value {
            process.thread.context_mut().set_return(value);
        }
        self.enqueue(pid)
    }

    /// Blocks the current process in `Sleeping` on `channel` and switches away.
    pub(super) fn block_current(
        &mut self,
        spaces: &dyn AddressSpaces,
        frame: &mut TrapFrame,
        channel: WaitChannel,
    ) -> KernelResult<Pid> {
        let pid = self.current.ok_or(KernelError::InvalidArgument)?;
        let process = self
            .table
            .get_mut(pid)
            .ok_or(KernelError::NoSuchProcess)?;
        process.state = ProcessState::Sleeping;
        process.channel = Some(channel);
        self.switch(spaces, frame, true);
        Ok(pid)
    }

    /// Wakes timed sleepers whose deadline has passed.
    fn wake_sleepers(&mut self) {
        let now = self.jiffies;
        for index in 1..self.table.capacity() {
            let pid = Pid::new(index as u32);
            let due = self.table.get(pid).and_then(|p| match (p.state, p.channel) {
                (ProcessState::Sleeping, Some(WaitChannel::Timer(at))) if at <= now => Some(at),
                _ => None,
            });
            if let Some(at) = due {
                self.wake(pid, Some(WaitChannel::Timer(at)), Some(0));
            }
        }
    }

    /// Hands a torn-down kernel stack to the deferred free list.
    pub(super) fn defer_free(&mut self, stack: KernelStack) {
        if self.pending_free.try_reserve(1).is_ok() {
            self.pending_free.push(stack);
        } else {
            // Freeing now could pull the stack out from under the running
            // exit path; leaking one stack is the lesser failure.
            log::warn!(target: "sched", "leaking kernel stack at {:#x}", stack.base());
            mem::forget(stack);
        }
    }
}

/// Placeholder idle context, replaced by the bootstrap frame on the first
/// tick after [`Scheduler::start`].
fn idle_placeholder_context() -> TrapFrame {
    TrapFrame {
        regs: SavedRegisters::default(),
        iret: InterruptStackFrame {
            rip: interrupts::idle_loop as usize as u64,
            cs: KERNEL_CODE_SELECTOR as u64,
            rflags: DEFAULT_RFLAGS.bits(),
            rsp: 0,
            ss: KERNEL_DATA_SELECTOR as u64,
        },
    }
}

/// One scheduler instance.
///
/// There is no global scheduler: the kernel owns one and hands references
/// to the syscall layer, tests build as many as they like.
pub struct Scheduler {
    pub(super) state: SpinLock<SchedulerState>,
    pub(super) spaces: Arc<dyn AddressSpaces>,
    pub(super) config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a stopped scheduler with an empty PID table.
    pub fn new(config: SchedulerConfig, spaces: Arc<dyn AddressSpaces>) -> KernelResult<Self> {
        config.validate()?;

        let table = ProcessTable::new(config.max_processes)?;
        let mut pending_free = Vec::new();
        pending_free
            .try_reserve(config.max_processes)
            .map_err(|_| KernelError::OutOfMemory)?;
        let kernel_space = spaces.kernel_space();

        Ok(Self {
            state: SpinLock::new(SchedulerState {
                started: false,
                table,
                run_queue: RunQueue::new(),
                zombies: PidQueue::new(),
                current: None,
                idle: None,
                jiffies: 0,
                active_space: kernel_space,
                kernel_space,
                init: None,
                pending_free,
                switches: 0,
            }),
            spaces,
            config,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn address_spaces(&self) -> &dyn AddressSpaces {
        &*self.spaces
    }

    /// Installs the idle context and enables scheduling on timer ticks.
    pub fn start(&self) {
        let mut st = self.state.lock();
        if st.started {
            return;
        }
        st.idle = Some(Thread::from_context(Pid::IDLE, idle_placeholder_context()));
        st.current = None;
        st.started = true;
        log::info!(target: "sched", "scheduler started with {} ready", st.run_queue.len());
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Creates a user process from loader output and makes it ready.
    ///
    /// The first process created this way becomes init, the adopter of
    /// orphaned children.
    pub fn spawn(&self, image: ProcessImage<'_>) -> KernelResult<Pid> {
        let priority = image.priority.unwrap_or(self.config.default_priority);

        let mut st = self.state.lock();
        let pid = st.table.reserve()?;

        let thread = Thread::new_user(pid, image.entry_rip, image.user_rsp);
        let mut process = Process::new(pid, image.name, priority, image.address_space, true, thread);
        process.argv = Argv::from_strs(image.argv);
        process.cwd = PathStr::from_str_truncate(image.cwd);

        if let Err(err) = st.table.commit(process) {
            st.table.cancel(pid);
            return Err(err);
        }
        if st.init.is_none() {
            st.init = Some(pid);
        }
        st.enqueue(pid);

        log::info!(target: "proc", "spawned {} '{}' prio {}", pid, image.name, priority.band());
        Ok(pid)
    }

    /// Creates a kernel thread running `entry` in the kernel address space.
    ///
    /// The stack is allocated outside the scheduler lock so the heap lock is
    /// never taken while the scheduler lock is held.
    pub fn spawn_kernel_thread(
        &self,
        name: &str,
        entry: KernelThreadFn,
        priority: Priority,
    ) -> KernelResult<Pid> {
        let (pid, kernel_space) = {
            let mut st = self.state.lock();
            (st.table.reserve()?, st.kernel_space)
        };

        let thread = match Thread::new_kernel(pid, entry) {
            Ok(thread) => thread,
            Err(err) => {
                self.state.lock().table.cancel(pid);
                return Err(err);
            }
        };

        let process = Process::new(pid, name, priority, kernel_space, false, thread);
        let mut st = self.state.lock();
        if let Err(err) = st.table.commit(process) {
            st.table.cancel(pid);
            return Err(err);
        }
        st.enqueue(pid);

        log::info!(target: "proc", "spawned kernel thread {} '{}'", pid, name);
        Ok(pid)
    }

    /// Scheduler entry executed on every timer IRQ.
    ///
    /// The tick counter advances on every call. Once started, the tick also
    /// frees stacks reaped on an earlier tick, reaps parentless zombies,
    /// wakes expired sleepers, and preempts the current thread.
    pub fn on_timer_tick(&self, frame: &mut TrapFrame) {
        // Freed after the lock is released; taken before this tick reaps
        // anything, since a stack reaped now may be the one we run on.
        let stacks_to_free: Vec<KernelStack>;

        {
            let mut st = self.state.lock();
            st.jiffies = st.jiffies.wrapping_add(1);

            if !st.started {
                return;
            }

            stacks_to_free = mem::take(&mut st.pending_free);
            super::lifecycle::reap_orphans(&mut st);
            st.wake_sleepers();
            st.switch(&*self.spaces, frame, true);
        }

        drop(stacks_to_free);
    }

    /// Voluntary reschedule: the caller goes to the tail of its band.
    pub fn yield_now(&self, frame: &mut TrapFrame) {
        let mut st = self.state.lock();
        if !st.started {
            return;
        }
        st.switch(&*self.spaces, frame, true);
    }

    /// Blocks the current process until [`Scheduler::wake`] and switches
    /// `frame` to the next thread.
    pub fn block_current(&self, frame: &mut TrapFrame) -> KernelResult<Pid> {
        self.block_on(frame, WaitChannel::Direct)
    }

    pub(crate) fn block_on(
        &self,
        frame: &mut TrapFrame,
        channel: WaitChannel,
    ) -> KernelResult<Pid> {
        let mut st = self.state.lock();
        st.block_current(&*self.spaces, frame, channel)
    }

    /// Makes a blocked process ready again, whatever it sleeps on.
    ///
    /// Returns `false` when `pid` is not sleeping (already runnable, waiting
    /// in `waitpid`, or gone).
    pub fn wake(&self, pid: Pid, value: Option<u64>) -> bool {
        self.state.lock().wake(pid, None, value)
    }

    /// Like [`Scheduler::wake`], but only if `pid` still sleeps on `channel`.
    pub fn wake_on(&self, pid: Pid, channel: WaitChannel, value: Option<u64>) -> bool {
        self.state.lock().wake(pid, Some(channel), value)
    }

    /// The channel `pid` sleeps on, `None` unless it is `Sleeping`.
    pub fn wait_channel(&self, pid: Pid) -> Option<WaitChannel> {
        let st = self.state.lock();
        st.table
            .get(pid)
            .filter(|p| p.state == ProcessState::Sleeping)
            .and_then(|p| p.channel)
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.state.lock().current
    }

    /// Snapshot of the current process (`None` while idle).
    pub fn current_process(&self) -> Option<ProcessInfo> {
        let st = self.state.lock();
        st.current.and_then(|pid| st.table.get(pid)).map(Process::info)
    }

    /// Runs `f` on the current process under the scheduler lock.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
        let mut st = self.state.lock();
        let pid = st.current?;
        st.table.get_mut(pid).map(f)
    }

    /// Saved register snapshot of `pid`'s thread.
    ///
    /// For the running thread this is the state of its last switch-out;
    /// its live registers are in the trap frame.
    pub fn thread_context(&self, pid: Pid) -> Option<TrapFrame> {
        self.state
            .lock()
            .table
            .get(pid)
            .map(|p| *p.thread.context())
    }

    /// Saved register snapshot of the current thread.
    pub fn current_thread_context(&self) -> Option<TrapFrame> {
        let st = self.state.lock();
        st.current
            .and_then(|pid| st.table.get(pid))
            .map(|p| *p.thread.context())
    }

    pub fn process_info(&self, pid: Pid) -> Option<ProcessInfo> {
        self.state.lock().table.get(pid).map(Process::info)
    }

    pub fn state_of(&self, pid: Pid) -> Option<ProcessState> {
        self.state.lock().table.get(pid).map(Process::state)
    }

    pub fn address_space_of(&self, pid: Pid) -> Option<AddressSpaceId> {
        self.state.lock().table.get(pid).and_then(Process::address_space)
    }

    /// Fills `out` with one snapshot per live or zombie process, in PID order.
    pub fn process_list(&self, out: &mut Vec<ProcessInfo>) -> KernelResult<()> {
        out.clear();
        // Reserve outside the lock so the push loop never allocates.
        out.try_reserve(self.config.max_processes)
            .map_err(|_| KernelError::OutOfMemory)?;

        let st = self.state.lock();
        out.extend(st.table.iter().map(Process::info));
        Ok(())
    }

    /// Changes the priority of `pid`, moving it between bands if queued.
    pub fn set_priority(&self, pid: Pid, priority: Priority) -> KernelResult<()> {
        let mut st = self.state.lock();
        let process = st.table.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;
        if process.state == ProcessState::Zombie {
            return Err(KernelError::NoSuchProcess);
        }
        process.priority = priority;
        if process.thread.is_queued() {
            st.dequeue(pid);
            st.enqueue(pid);
        }
        Ok(())
    }

    pub fn jiffies(&self) -> u64 {
        self.state.lock().jiffies
    }

    /// Milliseconds since boot derived from the tick counter.
    pub fn uptime_ms(&self) -> u64 {
        self.jiffies().saturating_mul(1000) / self.config.tick_hz
    }

    pub fn ready_count(&self) -> usize {
        self.state.lock().run_queue.len()
    }

    /// Ready PIDs in the order they would be selected.
    pub fn ready_pids(&self) -> Vec<Pid> {
        let st = self.state.lock();
        let mut out = Vec::new();
        if out.try_reserve(st.run_queue.len()).is_ok() {
            out.extend(st.run_queue.iter());
        }
        out
    }

    pub fn zombie_count(&self) -> usize {
        self.state.lock().zombies.len()
    }

    pub fn process_count(&self) -> usize {
        self.state.lock().table.len()
    }

    pub fn init_pid(&self) -> Option<Pid> {
        self.state.lock().init
    }

    pub fn active_address_space(&self) -> AddressSpaceId {
        self.state.lock().active_space
    }

    /// Number of switches that changed the running thread.
    pub fn switch_count(&self) -> u64 {
        self.state.lock().switches
    }

    /// Number of kernel stacks waiting for deferred deallocation.
    pub fn pending_stack_count(&self) -> usize {
        self.state.lock().pending_free.len()
    }

    /// Corrupts the validity tag of `pid`'s thread. Only used to exercise
    /// the fatal path.
    #[doc(hidden)]
    pub fn debug_poison_thread(&self, pid: Pid) -> bool {
        match self.state.lock().table.get_mut(pid) {
            Some(process) => {
                process.thread.poison_tag();
                true
            }
            None => false,
        }
    }
}
