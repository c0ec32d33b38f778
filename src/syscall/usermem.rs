//! Privileged user-memory boundary.
//!
//! This is the only module that dereferences memory named by user space.
//! Every access goes through the *calling* process's address space:
//! - the range is checked against the user canonical half first,
//! - each page chunk is translated before its first byte is touched,
//! - a failed check or translation returns `InvalidAddress` without any
//!   dereference.

use core::ptr;

use crate::error::{KernelError, KernelResult};
use crate::memory::{bytes_left_in_page, Access, AddressSpaceId, AddressSpaces};
use crate::process::FixedStr;

use super::types::is_valid_user_range;

/// View of one process's user memory.
#[derive(Clone, Copy)]
pub struct UserMemory<'a> {
    spaces: &'a dyn AddressSpaces,
    space: AddressSpaceId,
}

impl<'a> UserMemory<'a> {
    pub fn new(spaces: &'a dyn AddressSpaces, space: AddressSpaceId) -> Self {
        Self { spaces, space }
    }

    pub fn space(&self) -> AddressSpaceId {
        self.space
    }

    /// Walks `va..va+len` page chunk by page chunk, translating each chunk
    /// before handing it to `f` as `(kernel_ptr, offset, chunk_len)`.
    fn for_each_chunk(
        &self,
        va: u64,
        len: usize,
        access: Access,
        mut f: impl FnMut(*mut u8, usize, usize),
    ) -> KernelResult<()> {
        if !is_valid_user_range(va, len) {
            return Err(KernelError::InvalidAddress);
        }

        let mut done = 0usize;
        while done < len {
            let chunk_va = va + done as u64;
            let chunk_len = bytes_left_in_page(chunk_va).min(len - done);
            let kernel_ptr = self
                .spaces
                .translate(self.space, chunk_va, access)
                .ok_or(KernelError::InvalidAddress)?;
            f(kernel_ptr.as_ptr(), done, chunk_len);
            done += chunk_len;
        }
        Ok(())
    }

    /// Checks that `va..va+len` is mapped with `access`, touching nothing.
    pub fn probe(&self, va: u64, len: usize, access: Access) -> KernelResult<()> {
        self.for_each_chunk(va, len, access, |_, _, _| {})
    }

    /// Copies `dst.len()` bytes from user address `va`.
    pub fn copy_in(&self, va: u64, dst: &mut [u8]) -> KernelResult<()> {
        // Validate the whole range first so a fault halfway leaves `dst`
        // untouched.
        self.probe(va, dst.len(), Access::READ)?;
        let len = dst.len();
        self.for_each_chunk(va, len, Access::READ, |src, offset, chunk| {
            // SAFETY:
            // - `src` was returned by `translate` for this chunk's page and is
            //   valid for `chunk` bytes (chunk never crosses the page end).
            // - `dst[offset..offset + chunk]` is in bounds by construction.
            unsafe {
                ptr::copy_nonoverlapping(src, dst.as_mut_ptr().add(offset), chunk);
            }
        })
    }

    /// Copies `src` to user address `va`.
    pub fn copy_out(&self, va: u64, src: &[u8]) -> KernelResult<()> {
        self.probe(va, src.len(), Access::WRITE)?;
        self.for_each_chunk(va, src.len(), Access::WRITE, |dst, offset, chunk| {
            // SAFETY:
            // - `dst` is a writable translation valid for `chunk` bytes.
            // - `src[offset..offset + chunk]` is in bounds by construction.
            unsafe {
                ptr::copy_nonoverlapping(src.as_ptr().add(offset), dst, chunk);
            }
        })
    }

    /// Writes a little-endian `i32` (wait status) to `va`.
    pub fn write_i32(&self, va: u64, value: i32) -> KernelResult<()> {
        self.copy_out(va, &value.to_le_bytes())
    }

    /// Copies a NUL-terminated string into a kernel-owned buffer.
    ///
    /// At most `N` bytes are read. A string without a terminator inside
    /// that bound is truncated to `N` bytes; the bytes beyond are never
    /// read. Unmapped bytes before the terminator are `InvalidAddress`.
    pub fn copy_in_str<const N: usize>(&self, va: u64) -> KernelResult<FixedStr<N>> {
        if va == 0 {
            return Err(KernelError::InvalidAddress);
        }

        let mut scratch = [0u8; N];
        let mut len = 0usize;

        while len < N {
            let chunk_va = va
                .checked_add(len as u64)
                .ok_or(KernelError::InvalidAddress)?;
            let chunk_len = bytes_left_in_page(chunk_va).min(N - len);
            if !is_valid_user_range(chunk_va, chunk_len) {
                return Err(KernelError::InvalidAddress);
            }
            let src = self
                .spaces
                .translate(self.space, chunk_va, Access::READ)
                .ok_or(KernelError::InvalidAddress)?;

            for i in 0..chunk_len {
                // SAFETY:
                // - `src` is a readable translation valid up to the end of
                //   the page, and `i < chunk_len <= bytes_left_in_page`.
                let byte = unsafe { ptr::read_volatile(src.as_ptr().add(i)) };
                if byte == 0 {
                    return FixedStr::from_bytes_truncate(&scratch[..len]);
                }
                scratch[len] = byte;
                len += 1;
            }
        }

        FixedStr::from_bytes_truncate(&scratch[..len])
    }
}
