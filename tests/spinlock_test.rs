//! SpinLock integration tests.

use std::sync::Arc;
use std::thread;

use kaos_core::arch::interrupts;
use kaos_core::sync::critical;
use kaos_core::sync::spinlock::SpinLock;

/// Contract: spinlock basic mutation.
/// Given: A static lock holding zero.
/// When: One guard increments the value and is dropped.
/// Then: A second guard observes the update.
#[test]
fn test_spinlock_basic_mutation() {
    static LOCK: SpinLock<usize> = SpinLock::new(0);

    {
        let mut guard = LOCK.lock();
        *guard += 1;
    }

    let guard = LOCK.lock();
    assert!(*guard == 1, "spinlock should protect shared state");
}

/// Contract: spinlock preserves interrupt state when disabled.
/// Given: Interrupts are disabled before the lock is taken.
/// When: The lock is acquired and released.
/// Then: Interrupts stay disabled.
#[test]
fn test_spinlock_preserves_interrupt_state_when_disabled() {
    static LOCK: SpinLock<usize> = SpinLock::new(0);

    interrupts::disable();
    assert!(
        !interrupts::are_enabled(),
        "interrupts should be disabled for this test"
    );

    {
        let mut guard = LOCK.lock();
        *guard += 1;
    }

    assert!(
        !interrupts::are_enabled(),
        "spinlock should not enable interrupts when they were disabled"
    );
    interrupts::enable();
}

/// Contract: spinlock preserves interrupt state when enabled.
/// Given: Interrupts are enabled before the lock is taken.
/// When: The lock is acquired and released.
/// Then: Interrupts are masked while held and enabled again afterwards.
#[test]
fn test_spinlock_masks_interrupts_while_held() {
    let lock = SpinLock::new(0u32);

    interrupts::enable();
    {
        let _guard = lock.lock();
        assert!(
            !interrupts::are_enabled(),
            "a held spinlock must keep local interrupts masked"
        );
        assert_eq!(critical::depth(), 1, "lock must open exactly one critical section");
    }

    assert!(
        interrupts::are_enabled(),
        "spinlock should restore enabled interrupts state"
    );
    assert_eq!(critical::depth(), 0, "guard drop must close its critical section");
}

/// Contract: nested locks restore interrupts only at the outermost release.
#[test]
fn test_nested_spinlocks_restore_only_at_outermost_release() {
    let outer = SpinLock::new(());
    let inner = SpinLock::new(());

    interrupts::enable();
    let outer_guard = outer.lock();
    {
        let _inner_guard = inner.lock();
        assert_eq!(critical::depth(), 2, "nested locks must nest critical sections");
    }
    assert!(
        !interrupts::are_enabled(),
        "releasing the inner lock must not re-enable interrupts"
    );

    drop(outer_guard);
    assert!(
        interrupts::are_enabled(),
        "releasing the outermost lock must restore interrupts"
    );
}

/// Contract: try_lock fails without blocking while the lock is held.
#[test]
fn test_try_lock_fails_while_held() {
    let lock = SpinLock::new(5u8);

    let guard = lock.lock();
    assert!(lock.is_locked(), "is_locked must report a held lock");
    assert!(lock.try_lock().is_none(), "try_lock must fail while held");
    drop(guard);

    assert!(!lock.is_locked(), "drop must release the lock");
    let guard = lock.try_lock();
    assert!(
        matches!(guard.as_deref(), Some(&5)),
        "try_lock must succeed on a free lock"
    );
    drop(guard);
    assert!(
        interrupts::are_enabled(),
        "a failed try_lock must not leak its critical section"
    );
}

/// Contract: spinlock serialises concurrent writers.
/// Given: Four host threads, each acting as its own CPU.
/// When: Each increments a shared counter 10 000 times under the lock.
/// Then: No increment is lost.
#[test]
fn test_spinlock_serialises_concurrent_writers() {
    let counter = Arc::new(SpinLock::new(0usize));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    assert_eq!(*counter.lock(), 40_000, "spinlock must not lose increments");
}
