//! Nesting interrupt-disable sections.
//!
//! `enter_critical` masks local interrupts and bumps a per-CPU depth counter.
//! Only the matching outermost `leave_critical` restores the interrupt flag
//! that was observed when the outermost section was entered.

use crate::arch::interrupts;

#[cfg(target_os = "none")]
mod local {
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // Single CPU: one counter for the whole kernel.
    static DEPTH: AtomicUsize = AtomicUsize::new(0);
    static RESTORE: AtomicBool = AtomicBool::new(false);

    pub fn depth() -> usize {
        DEPTH.load(Ordering::Relaxed)
    }

    pub fn set_depth(depth: usize) {
        DEPTH.store(depth, Ordering::Relaxed);
    }

    pub fn restore() -> bool {
        RESTORE.load(Ordering::Relaxed)
    }

    pub fn set_restore(restore: bool) {
        RESTORE.store(restore, Ordering::Relaxed);
    }
}

#[cfg(not(target_os = "none"))]
mod local {
    use std::cell::Cell;

    std::thread_local! {
        static DEPTH: Cell<usize> = const { Cell::new(0) };
        static RESTORE: Cell<bool> = const { Cell::new(false) };
    }

    pub fn depth() -> usize {
        DEPTH.with(|d| d.get())
    }

    pub fn set_depth(depth: usize) {
        DEPTH.with(|d| d.set(depth));
    }

    pub fn restore() -> bool {
        RESTORE.with(|r| r.get())
    }

    pub fn set_restore(restore: bool) {
        RESTORE.with(|r| r.set(restore));
    }
}

/// Masks interrupts and increments the nesting depth.
pub fn enter_critical() {
    let were_enabled = interrupts::are_enabled();
    interrupts::disable();

    // Interrupts are off from here on, so the counter cannot be raced locally.
    let depth = local::depth();
    if depth == 0 {
        local::set_restore(were_enabled);
    }
    local::set_depth(depth + 1);
}

/// Decrements the nesting depth; the outermost leave restores interrupts.
pub fn leave_critical() {
    let depth = local::depth();
    debug_assert!(depth > 0, "leave_critical without matching enter_critical");
    if depth == 0 {
        return;
    }

    local::set_depth(depth - 1);
    if depth == 1 && local::restore() {
        local::set_restore(false);
        interrupts::enable();
    }
}

/// Current nesting depth on this CPU.
pub fn depth() -> usize {
    local::depth()
}

/// RAII form of [`enter_critical`]/[`leave_critical`].
#[must_use = "dropping the guard immediately leaves the critical section"]
pub struct CriticalGuard {
    // Not Send: the section belongs to the CPU that entered it.
    _not_send: core::marker::PhantomData<*const ()>,
}

/// Enters a critical section that ends when the guard is dropped.
pub fn enter() -> CriticalGuard {
    enter_critical();
    CriticalGuard {
        _not_send: core::marker::PhantomData,
    }
}

impl Drop for CriticalGuard {
    fn drop(&mut self) {
        leave_critical();
    }
}
