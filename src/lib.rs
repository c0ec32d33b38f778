//! KAOS kernel core: preemptive scheduler, process lifecycle and the
//! syscall boundary.
//!
//! Boot glue, drivers, paging and the heap live outside this crate and are
//! reached through [`memory::AddressSpaces`] and [`kernel::KernelServices`].
//! Integration tests link the library on the host, where `arch` emulates the
//! interrupt flag per thread and [`testing`] provides the fakes.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod logging;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscall;

#[cfg(not(target_os = "none"))]
pub mod testing;

pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KernelServices};
pub use scheduler::Scheduler;
