//! Paging collaborator interface.
//!
//! Page-table construction lives outside this crate. The scheduler and the
//! syscall layer only need to create, switch, tear down, and translate
//! through address spaces, and they do so through [`AddressSpaces`].

use core::fmt;
use core::ptr::NonNull;

use bitflags::bitflags;

use crate::config::PAGE_SIZE;
use crate::error::KernelResult;

/// Address-space root (physical PML4 address loaded into CR3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(pub u64);

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

bitflags! {
    /// Access a translation must permit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Operations the scheduler consumes from the paging layer.
pub trait AddressSpaces: Send + Sync {
    /// Address space used by kernel threads and the idle context.
    fn kernel_space(&self) -> AddressSpaceId;

    /// Creates a private copy of `space` for a forked child.
    fn duplicate(&self, space: AddressSpaceId) -> KernelResult<AddressSpaceId>;

    /// Releases all resources of `space`. Never called for the kernel space
    /// or for the currently active space.
    fn destroy(&self, space: AddressSpaceId);

    /// Loads `space` into the MMU.
    ///
    /// # Safety
    /// `space` must be a live address space that maps the kernel, so
    /// execution can continue after the switch.
    unsafe fn activate(&self, space: AddressSpaceId);

    /// Kernel-accessible pointer to the byte at user address `va`.
    ///
    /// The pointer stays valid for the rest of `va`'s page. `None` when the
    /// page is unmapped, not user-accessible, or lacks `access`.
    fn translate(&self, space: AddressSpaceId, va: u64, access: Access) -> Option<NonNull<u8>>;
}

/// Number of bytes from `va` to the end of its page.
#[inline]
pub const fn bytes_left_in_page(va: u64) -> usize {
    PAGE_SIZE - (va as usize & (PAGE_SIZE - 1))
}
