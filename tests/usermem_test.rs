//! User-memory boundary tests: translation, permissions, string copies.

use kaos_core::memory::{Access, AddressSpaceId};
use kaos_core::syscall::{is_valid_user_range, UserMemory};
use kaos_core::testing::{FakeAddressSpaces, USER_DATA, USER_DATA_PAGES, USER_ENTRY};
use kaos_core::KernelError;

const WINDOW_END: u64 = USER_DATA + (USER_DATA_PAGES * 4096) as u64;

fn user_space() -> (FakeAddressSpaces, AddressSpaceId) {
    let spaces = FakeAddressSpaces::new();
    let space = spaces.create_user_space();
    (spaces, space)
}

/// Contract: copies crossing a page boundary translate each page.
#[test]
fn test_copy_in_crosses_page_boundary() {
    let (spaces, space) = user_space();
    let va = USER_DATA + 4094;
    assert!(spaces.write_bytes(space, va, b"abcd"));

    let memory = UserMemory::new(&spaces, space);
    let mut dst = [0u8; 4];
    memory.copy_in(va, &mut dst).unwrap();

    assert_eq!(&dst, b"abcd");
}

/// Contract: out-of-range pointers fail before any translation.
/// Given: Null, kernel-half, and wrapping addresses.
/// When: Each is used for a copy.
/// Then: Every copy fails with InvalidAddress without consulting the paging
/// layer.
#[test]
fn test_bad_pointers_rejected_without_translation() {
    let (spaces, space) = user_space();
    let memory = UserMemory::new(&spaces, space);
    let before = spaces.translate_count();

    for va in [0, 0xFFFF_8000_0000_0000, u64::MAX - 1] {
        let mut dst = [0u8; 4];
        assert_eq!(
            memory.copy_in(va, &mut dst),
            Err(KernelError::InvalidAddress),
            "{va:#x} must be rejected"
        );
    }
    assert_eq!(
        spaces.translate_count(),
        before,
        "range checks must run before translation"
    );
}

/// Contract: a fault in a later page leaves the destination untouched.
#[test]
fn test_partial_mapping_leaves_destination_untouched() {
    let (spaces, space) = user_space();
    assert!(spaces.write_bytes(space, WINDOW_END - 2, b"ok"));
    let memory = UserMemory::new(&spaces, space);

    let mut dst = [0xAAu8; 4];
    assert_eq!(memory.copy_in(WINDOW_END - 2, &mut dst), Err(KernelError::InvalidAddress));
    assert_eq!(dst, [0xAA; 4], "no byte may be copied before the whole range is checked");
}

/// Contract: writes require a writable mapping.
#[test]
fn test_copy_out_to_read_only_page_fails() {
    let (spaces, space) = user_space();
    let memory = UserMemory::new(&spaces, space);

    assert_eq!(memory.copy_out(USER_ENTRY, b"xx"), Err(KernelError::InvalidAddress));
    assert_eq!(
        spaces.read_bytes(space, USER_ENTRY, 2).as_deref(),
        Some(&[0u8, 0][..]),
        "a rejected write must not modify the page"
    );
    assert_eq!(memory.probe(USER_ENTRY, 2, Access::READ), Ok(()));
}

/// Contract: write_i32 stores little-endian bytes.
#[test]
fn test_write_i32_little_endian() {
    let (spaces, space) = user_space();
    let memory = UserMemory::new(&spaces, space);

    memory.write_i32(USER_DATA, -2).unwrap();
    assert_eq!(
        spaces.read_bytes(space, USER_DATA, 4).as_deref(),
        Some(&[0xFE, 0xFF, 0xFF, 0xFF][..])
    );
}

/// Contract: zero-length ranges are valid and touch nothing.
#[test]
fn test_zero_length_range_is_valid() {
    let (spaces, space) = user_space();
    let memory = UserMemory::new(&spaces, space);
    let before = spaces.translate_count();

    assert_eq!(memory.probe(0, 0, Access::WRITE), Ok(()));
    assert_eq!(memory.copy_in(0, &mut []), Ok(()));
    assert_eq!(spaces.translate_count(), before);
}

/// Contract: the user range check accepts exactly the lower canonical half.
#[test]
fn test_user_range_bounds() {
    assert!(is_valid_user_range(0x1000, 0x1000));
    assert!(is_valid_user_range(0x7FFF_FFFF_F000, 0x1000), "the last user page is valid");
    assert!(!is_valid_user_range(0x7FFF_FFFF_F000, 0x1001), "ranges may not reach the hole");
    assert!(!is_valid_user_range(0, 1), "null is never valid");
    assert!(!is_valid_user_range(u64::MAX, 2), "wrapping ranges are rejected");
    assert!(is_valid_user_range(0, 0));
}

/// Contract: string copies stop at the NUL or at the bound.
#[test]
fn test_copy_in_str_terminator_and_bound() {
    let (spaces, space) = user_space();
    let memory = UserMemory::new(&spaces, space);

    assert!(spaces.write_cstr(space, USER_DATA, "hello"));
    assert_eq!(memory.copy_in_str::<16>(USER_DATA).unwrap().as_str(), "hello");

    assert!(spaces.write_cstr(space, USER_DATA, "abcdefghij"));
    assert_eq!(
        memory.copy_in_str::<4>(USER_DATA).unwrap().as_str(),
        "abcd",
        "strings without a terminator inside the bound are truncated"
    );
}

/// Contract: invalid UTF-8 is rejected, except a character cut at the bound.
#[test]
fn test_copy_in_str_utf8_handling() {
    let (spaces, space) = user_space();
    let memory = UserMemory::new(&spaces, space);

    assert!(spaces.write_bytes(space, USER_DATA, &[0xFF, 0xFE, 0]));
    assert_eq!(
        memory.copy_in_str::<16>(USER_DATA).err(),
        Some(KernelError::InvalidArgument)
    );

    assert!(spaces.write_cstr(space, USER_DATA, "a\u{e9}"));
    assert_eq!(
        memory.copy_in_str::<2>(USER_DATA).unwrap().as_str(),
        "a",
        "a multi-byte character cut at the bound is dropped"
    );
}

/// Contract: a string running into an unmapped page faults.
#[test]
fn test_copy_in_str_unmapped_tail_faults() {
    let (spaces, space) = user_space();
    let memory = UserMemory::new(&spaces, space);
    assert!(spaces.write_bytes(space, WINDOW_END - 2, b"xy"));

    assert_eq!(
        memory.copy_in_str::<16>(WINDOW_END - 2).err(),
        Some(KernelError::InvalidAddress)
    );
    assert_eq!(memory.copy_in_str::<16>(0).err(), Some(KernelError::InvalidAddress));
}
