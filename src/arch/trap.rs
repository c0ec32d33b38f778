//! Rust side of the timer and `int 0x80` trap stubs.
//!
//! The assembly stubs (owned by the boot code) push the register state,
//! call one of the entries below with a pointer to the resulting
//! [`TrapFrame`], and restore whatever frame the entry returns before
//! `iretq`. PIC end-of-interrupt for the timer is sent by the stub.
//!
//! This is the only global in the crate: the stubs cannot carry a context
//! argument, so boot code installs the one [`Kernel`] here.

use spin::Once;

use crate::kernel::Kernel;
use crate::syscall::{self, SYSCALL_ERR_UNSUPPORTED};

use super::interrupts::TrapFrame;

static KERNEL: Once<&'static Kernel> = Once::new();

/// Makes `kernel` the target of both trap entries.
///
/// Only the first call installs; returns whether this call did.
pub fn install(kernel: &'static Kernel) -> bool {
    let mut installed = false;
    KERNEL.call_once(|| {
        installed = true;
        kernel
    });
    installed
}

/// The installed kernel, if any.
pub fn installed() -> Option<&'static Kernel> {
    KERNEL.get().copied()
}

/// IRQ0 entry.
///
/// Before installation the tick is dropped and the interrupted context
/// resumes unchanged.
///
/// # Safety
/// `frame` must be null or point to the trap frame the stub just pushed,
/// valid for reads and writes until the stub restores it.
pub unsafe extern "C" fn timer_trap_entry(frame: *mut TrapFrame) -> *mut TrapFrame {
    // SAFETY:
    // - Caller guarantees `frame` is null or a valid, exclusive trap frame.
    let Some(frame_ref) = (unsafe { frame.as_mut() }) else {
        return frame;
    };
    if let Some(kernel) = installed() {
        kernel.scheduler().on_timer_tick(frame_ref);
    }
    frame
}

/// `int 0x80` entry.
///
/// Before installation every call fails with `Unsupported`.
///
/// # Safety
/// Same contract as [`timer_trap_entry`].
pub unsafe extern "C" fn syscall_trap_entry(frame: *mut TrapFrame) -> *mut TrapFrame {
    // SAFETY:
    // - Caller guarantees `frame` is null or a valid, exclusive trap frame.
    let Some(frame_ref) = (unsafe { frame.as_mut() }) else {
        return frame;
    };
    match installed() {
        Some(kernel) => syscall::dispatch(kernel, frame_ref),
        None => frame_ref.set_return(SYSCALL_ERR_UNSUPPORTED),
    }
    frame
}
