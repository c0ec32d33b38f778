//! Trap frame layout and local interrupt control.
//!
//! On bare metal the interrupt flag is the real RFLAGS.IF. Hosted builds
//! (the test suite) keep an emulated flag per host thread, so every test
//! thread behaves like its own single CPU.

use super::{RFlags, KERNEL_CODE_SELECTOR, USER_CODE_SELECTOR};

pub const IRQ0_PIT_TIMER_VECTOR: u8 = 32;
pub const SYSCALL_INT80_VECTOR: u8 = 0x80;

/// Saved general-purpose register state as pushed by the trap trampolines.
///
/// Layout contract:
/// - Must match the push/pop order in the trap stubs.
/// - Any change requires synchronized updates in assembly and tests.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SavedRegisters {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
}

/// Hardware interrupt return frame for `iretq` in 64-bit long mode.
///
/// In IA-32e mode `iretq` unconditionally pops all five values, regardless
/// of privilege-level change.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterruptStackFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Full register snapshot of an interrupted thread.
///
/// This is the region the trap stub leaves on the stack: saved registers
/// directly followed by the CPU-pushed `iretq` frame. The scheduler both
/// reads the interrupted thread from it and writes the next thread into it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub regs: SavedRegisters,
    pub iret: InterruptStackFrame,
}

impl TrapFrame {
    /// Syscall number (`RAX`).
    #[inline]
    pub fn syscall_number(&self) -> u64 {
        self.regs.rax
    }

    /// Ordinal syscall argument: `RDI`, `RSI`, `RDX`, `R10`.
    ///
    /// Out-of-range indices read as zero.
    #[inline]
    pub fn arg(&self, index: usize) -> u64 {
        match index {
            0 => self.regs.rdi,
            1 => self.regs.rsi,
            2 => self.regs.rdx,
            3 => self.regs.r10,
            _ => 0,
        }
    }

    /// Places a syscall result into the return register (`RAX`).
    #[inline]
    pub fn set_return(&mut self, value: u64) {
        self.regs.rax = value;
    }

    /// Value currently held in the return register.
    #[inline]
    pub fn return_value(&self) -> u64 {
        self.regs.rax
    }

    /// Whether `iretq` on this frame enters ring 3.
    #[inline]
    pub fn is_user(&self) -> bool {
        self.iret.cs & 0x3 == 0x3
    }

    /// Cheap sanity check used before the scheduler restores a snapshot.
    ///
    /// A frame whose code selector is not one of ours or whose reserved
    /// RFLAGS bit is clear cannot originate from a legitimate trap.
    pub fn is_plausible(&self) -> bool {
        let cs_ok = self.iret.cs == KERNEL_CODE_SELECTOR as u64
            || self.iret.cs == USER_CODE_SELECTOR as u64;
        cs_ok && RFlags::from_bits_retain(self.iret.rflags).contains(RFlags::RESERVED)
    }
}

#[cfg(target_os = "none")]
mod imp {
    use core::arch::asm;

    pub fn enable() {
        // SAFETY:
        // - `sti` only changes the interrupt flag; kernel runs in ring 0.
        unsafe {
            asm!("sti", options(nomem, nostack, preserves_flags));
        }
    }

    pub fn disable() {
        // SAFETY:
        // - `cli` only changes the interrupt flag; kernel runs in ring 0.
        unsafe {
            asm!("cli", options(nomem, nostack, preserves_flags));
        }
    }

    pub fn are_enabled() -> bool {
        let rflags: u64;
        // SAFETY:
        // - Reading RFLAGS via pushfq/pop is safe and does not modify flags.
        // - `rflags` is a plain register output.
        unsafe {
            asm!(
                "pushfq",
                "pop {}",
                out(reg) rflags,
                options(nomem, preserves_flags)
            );
        }
        (rflags & (1 << 9)) != 0
    }

    pub fn halt() {
        // SAFETY:
        // - `hlt` parks the CPU until the next interrupt; valid in ring 0.
        unsafe {
            asm!("hlt", options(nomem, nostack, preserves_flags));
        }
    }

    pub fn trigger_reschedule() {
        // SAFETY:
        // - Software interrupt to the IRQ0 vector enters the same scheduler
        //   path as the timer IRQ.
        // - Valid only in ring 0, which holds for kernel code.
        unsafe {
            asm!(
                "int {vector}",
                vector = const super::IRQ0_PIT_TIMER_VECTOR,
                options(nomem)
            );
        }
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use std::cell::Cell;

    std::thread_local! {
        // Hosted CPUs boot with interrupts enabled, like a kernel after `sti`.
        static IF_FLAG: Cell<bool> = const { Cell::new(true) };
    }

    pub fn enable() {
        IF_FLAG.with(|flag| flag.set(true));
    }

    pub fn disable() {
        IF_FLAG.with(|flag| flag.set(false));
    }

    pub fn are_enabled() -> bool {
        IF_FLAG.with(|flag| flag.get())
    }

    pub fn halt() {
        std::thread::yield_now();
    }

    pub fn trigger_reschedule() {
        // No trap hardware when hosted; the caller observes that no switch
        // happened.
    }
}

/// Enable interrupts globally.
#[inline]
pub fn enable() {
    imp::enable();
}

/// Disable interrupts globally.
#[inline]
pub fn disable() {
    imp::disable();
}

/// Returns whether interrupts are currently enabled (IF flag set).
#[inline]
pub fn are_enabled() -> bool {
    imp::are_enabled()
}

/// Parks the CPU until the next interrupt.
#[inline]
pub fn halt() {
    imp::halt();
}

/// Enters the timer trap path from kernel code to force a reschedule.
#[inline]
pub fn trigger_reschedule() {
    imp::trigger_reschedule();
}

/// Body of the idle context: halt with interrupts enabled, forever.
pub fn idle_loop() -> ! {
    loop {
        enable();
        halt();
    }
}
