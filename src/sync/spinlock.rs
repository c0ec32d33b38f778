//! Test-and-set spinlock with interrupt masking.
//!
//! Holding the lock keeps local interrupts masked through the nesting
//! counter in [`critical`](super::critical), so an IRQ handler can never spin
//! on a lock its own CPU already holds.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{fence, AtomicBool, Ordering};

use super::critical::{self, CriticalGuard};

pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let critical = critical::enter();

        while self.locked.swap(true, Ordering::Acquire) {
            // Spin on a plain load so the cache line is not hammered with writes.
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }

        SpinLockGuard {
            lock: self,
            _critical: critical,
        }
    }

    /// Single acquisition attempt; `None` when the lock is held.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let critical = critical::enter();
        if self.locked.swap(true, Ordering::Acquire) {
            return None;
        }
        Some(SpinLockGuard {
            lock: self,
            _critical: critical,
        })
    }

    /// Diagnostic snapshot of the lock flag.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    // Dropped after `Drop::drop` released the flag.
    _critical: CriticalGuard,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY:
        // - The spinlock guarantees exclusive access while the guard lives.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY:
        // - The spinlock guarantees exclusive access while the guard lives.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        fence(Ordering::SeqCst);
    }
}

// SAFETY:
// - Access to `data` is synchronized via the spinlock.
// - `T: Send` ensures it is safe to transfer ownership across threads/CPUs.
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}
