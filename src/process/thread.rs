//! Thread: saved register snapshot plus a back-reference to its process.

use core::mem::size_of;

extern crate alloc;
use alloc::vec::Vec;

use crate::arch::interrupts::{InterruptStackFrame, SavedRegisters, TrapFrame};
use crate::arch::{
    DEFAULT_RFLAGS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR,
    USER_DATA_SELECTOR,
};
use crate::config::{KERNEL_STACK_SIZE, STACK_ALIGNMENT};
use crate::error::{KernelError, KernelResult};

use super::Pid;

/// Entry point type for kernel threads.
///
/// Kernel threads are entered via a synthetic interrupt-return frame and
/// cannot return; they leave through `Scheduler::exit_current_thread`.
pub type KernelThreadFn = extern "C" fn() -> !;

/// Tag carried by every live thread.
pub const THREAD_TAG_LIVE: u32 = 0x5448_5244; // "THRD"

/// Tag written when a thread is torn down.
pub const THREAD_TAG_DEAD: u32 = 0xDEAD_7448;

/// Aligns `value` down to the given power-of-two `align`.
#[inline]
const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Heap-allocated kernel stack owned by a kernel thread.
pub struct KernelStack {
    memory: Vec<u8>,
}

impl KernelStack {
    /// Allocates and zeroes a stack without aborting on OOM.
    pub fn allocate(size: usize) -> KernelResult<Self> {
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| KernelError::OutOfMemory)?;
        // Capacity is reserved; this touches every page up front instead of
        // demand-faulting later in IRQ context.
        memory.resize(size, 0);
        Ok(Self { memory })
    }

    pub fn base(&self) -> u64 {
        self.memory.as_ptr() as u64
    }

    pub fn top(&self) -> u64 {
        self.base() + self.memory.len() as u64
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Checks whether a saved frame at `rsp` lies within this stack.
    pub fn contains(&self, rsp: u64) -> bool {
        rsp >= self.base() && rsp <= self.top()
    }
}

/// Unit of execution switched by the scheduler.
pub struct Thread {
    tag: u32,

    /// Owning process. Non-owning: the process table owns the thread.
    owner: Pid,

    /// Register snapshot restored on the next switch to this thread.
    context: TrapFrame,

    /// Present for kernel threads only; user threads enter the kernel on
    /// the shared trap stack programmed into TSS.RSP0 by the boot code.
    kernel_stack: Option<KernelStack>,

    /// Whether this thread currently sits in the run queue.
    queued: bool,
}

impl Thread {
    /// Thread that resumes from an existing snapshot (fork child, idle).
    pub fn from_context(owner: Pid, context: TrapFrame) -> Self {
        Self {
            tag: THREAD_TAG_LIVE,
            owner,
            context,
            kernel_stack: None,
            queued: false,
        }
    }

    /// Builds a ring-3 thread that starts at `entry_rip` on `user_rsp`.
    pub fn new_user(owner: Pid, entry_rip: u64, user_rsp: u64) -> Self {
        let context = TrapFrame {
            regs: SavedRegisters::default(),
            iret: InterruptStackFrame {
                rip: entry_rip,
                cs: USER_CODE_SELECTOR as u64,
                rflags: DEFAULT_RFLAGS.bits(), // IF=1 so timer preemption stays active in user mode.
                rsp: user_rsp,
                ss: USER_DATA_SELECTOR as u64,
            },
        };
        Self::from_context(owner, context)
    }

    /// Builds a ring-0 thread on a fresh heap stack.
    pub fn new_kernel(owner: Pid, entry: KernelThreadFn) -> KernelResult<Self> {
        let stack = KernelStack::allocate(KERNEL_STACK_SIZE)?;

        // SysV-friendly entry alignment with room for the trap frame that
        // the first interrupt of this thread will push.
        let entry_rsp = align_down(stack.top() as usize, STACK_ALIGNMENT)
            - size_of::<u64>()
            - size_of::<TrapFrame>();

        let context = TrapFrame {
            regs: SavedRegisters::default(),
            iret: InterruptStackFrame {
                rip: entry as usize as u64,
                cs: KERNEL_CODE_SELECTOR as u64,
                rflags: DEFAULT_RFLAGS.bits(),
                rsp: entry_rsp as u64,
                ss: KERNEL_DATA_SELECTOR as u64,
            },
        };

        Ok(Self {
            tag: THREAD_TAG_LIVE,
            owner,
            context,
            kernel_stack: Some(stack),
            queued: false,
        })
    }

    pub fn owner(&self) -> Pid {
        self.owner
    }

    pub fn context(&self) -> &TrapFrame {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut TrapFrame {
        &mut self.context
    }

    pub fn save(&mut self, frame: &TrapFrame) {
        self.context = *frame;
    }

    pub fn is_kernel(&self) -> bool {
        self.kernel_stack.is_some()
    }

    pub fn kernel_stack(&self) -> Option<&KernelStack> {
        self.kernel_stack.as_ref()
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub(crate) fn set_queued(&mut self, queued: bool) {
        self.queued = queued;
    }

    /// Checks the validity tag and the saved frame before a restore.
    pub fn validate(&self) -> bool {
        if self.tag != THREAD_TAG_LIVE || !self.context.is_plausible() {
            return false;
        }
        match &self.kernel_stack {
            // A kernel thread always resumes on its own stack.
            Some(stack) => stack.contains(self.context.iret.rsp),
            None => true,
        }
    }

    /// Marks the thread dead and hands back its stack for deferred freeing.
    pub fn tear_down(&mut self) -> Option<KernelStack> {
        self.tag = THREAD_TAG_DEAD;
        self.queued = false;
        self.kernel_stack.take()
    }

    /// Overwrites the validity tag. Only used to exercise corruption paths.
    #[doc(hidden)]
    pub fn poison_tag(&mut self) {
        self.tag = THREAD_TAG_DEAD;
    }
}
