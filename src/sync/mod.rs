//! Synchronization primitives.

pub mod critical;
pub mod sleeplock;
pub mod spinlock;
pub mod waitqueue;

pub use critical::CriticalGuard;
pub use sleeplock::{LockAcquire, SleepLock};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use waitqueue::WaitQueue;
