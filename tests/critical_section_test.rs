//! Critical-section nesting tests.

use kaos_core::arch::interrupts;
use kaos_core::sync::critical::{self, enter_critical, leave_critical};

/// Contract: only the outermost leave restores the interrupt flag.
/// Given: Interrupts are enabled.
/// When: Three critical sections are entered and left in order.
/// Then: Interrupts stay masked until the last leave.
#[test]
fn test_nested_sections_restore_at_outermost_leave() {
    interrupts::enable();

    enter_critical();
    enter_critical();
    enter_critical();
    assert_eq!(critical::depth(), 3, "depth must count every enter");
    assert!(!interrupts::are_enabled(), "enter must mask interrupts");

    leave_critical();
    leave_critical();
    assert!(
        !interrupts::are_enabled(),
        "inner leaves must not restore interrupts"
    );

    leave_critical();
    assert_eq!(critical::depth(), 0, "matching leaves must return depth to zero");
    assert!(
        interrupts::are_enabled(),
        "outermost leave must restore the flag seen at the outermost enter"
    );
}

/// Contract: a section entered with interrupts off leaves them off.
#[test]
fn test_section_entered_masked_stays_masked() {
    interrupts::disable();

    enter_critical();
    enter_critical();
    leave_critical();
    leave_critical();

    assert!(
        !interrupts::are_enabled(),
        "leaving must not enable interrupts that were off at entry"
    );
    interrupts::enable();
}

/// Contract: the flag recorded by the outermost enter wins over later changes.
#[test]
fn test_inner_enable_does_not_change_restore_decision() {
    interrupts::disable();
    enter_critical();

    // Misbehaving code inside the section.
    interrupts::enable();
    enter_critical();
    leave_critical();
    leave_critical();

    assert!(
        !interrupts::are_enabled(),
        "outermost leave must restore the state recorded at the outermost enter"
    );
    interrupts::enable();
}

/// Contract: the RAII guard ends its section on drop.
#[test]
fn test_guard_leaves_on_drop() {
    interrupts::enable();
    {
        let _outer = critical::enter();
        let _inner = critical::enter();
        assert_eq!(critical::depth(), 2);
    }
    assert_eq!(critical::depth(), 0, "guards must close their sections");
    assert!(interrupts::are_enabled(), "guards must restore interrupts");
}
