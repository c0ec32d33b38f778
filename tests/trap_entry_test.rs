//! Trap entry tests.
//!
//! The installed kernel is process-global, so the whole lifecycle runs in
//! one sequential test.

use kaos_core::arch::interrupts::TrapFrame;
use kaos_core::arch::trap;
use kaos_core::syscall::{SyscallId, SYSCALL_ERR_UNSUPPORTED};
use kaos_core::testing::{bootstrap_frame, set_syscall, TestKernel};

/// Contract: trap entries are inert until a kernel is installed, then
/// route to the scheduler and the dispatcher.
/// Given: No kernel installed.
/// When: Timer and syscall traps arrive before and after `install`.
/// Then: Before, ticks are dropped and syscalls fail with Unsupported;
/// after, ticks switch threads and syscalls run.
#[test]
fn test_trap_entries_route_to_installed_kernel() {
    // Before install.
    assert!(trap::installed().is_none());
    let mut frame = bootstrap_frame();
    // SAFETY: `frame` is a live, exclusive trap frame.
    let returned = unsafe { trap::timer_trap_entry(&mut frame) };
    assert_eq!(returned, &mut frame as *mut TrapFrame, "the same frame must be handed back");
    assert_eq!(frame, bootstrap_frame(), "ticks before install must not touch the frame");

    set_syscall(&mut frame, SyscallId::GetPid, &[]);
    // SAFETY: as above.
    unsafe { trap::syscall_trap_entry(&mut frame) };
    assert_eq!(frame.return_value(), SYSCALL_ERR_UNSUPPORTED);

    // SAFETY: null is an accepted input.
    unsafe {
        assert!(trap::timer_trap_entry(core::ptr::null_mut()).is_null());
        assert!(trap::syscall_trap_entry(core::ptr::null_mut()).is_null());
    }

    // Install.
    let tk: &'static TestKernel = Box::leak(Box::new(TestKernel::new()));
    let (pid, _) = tk.spawn_user("init");
    assert!(trap::install(&tk.kernel), "first install must succeed");
    assert!(!trap::install(&tk.kernel), "the kernel is installed only once");
    assert!(trap::installed().is_some());

    let mut frame = bootstrap_frame();
    // SAFETY: as above.
    unsafe { trap::timer_trap_entry(&mut frame) };
    assert_eq!(tk.sched().current_pid(), Some(pid), "the timer entry must schedule");
    assert!(frame.is_user(), "the frame must now resume the user process");

    set_syscall(&mut frame, SyscallId::GetPid, &[]);
    // SAFETY: as above.
    unsafe { trap::syscall_trap_entry(&mut frame) };
    assert_eq!(frame.return_value(), pid.as_u64(), "the syscall entry must dispatch");
}
