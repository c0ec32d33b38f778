//! Syscall table, dispatcher, and user-memory marshaling.
//!
//! The `int 0x80` trap glue hands the interrupted frame to [`dispatch`].
//! Numbers, result encoding and wire records live in `types`, the
//! privileged user-memory boundary in `usermem`.

mod dispatch;
pub mod types;
pub mod usermem;

pub use dispatch::{dispatch, execute, normalize_path, Completion, Syscall};
pub use types::{
    decode_result, encode_error, encode_result, is_valid_user_range, ProcessRecord, SysError,
    SyscallId, SYSCALL_ERR_FAULT, SYSCALL_ERR_INVALID_ARG, SYSCALL_ERR_IO, SYSCALL_ERR_NO_CHILD,
    SYSCALL_ERR_NO_MEMORY, SYSCALL_ERR_UNSUPPORTED, SYSCALL_OK,
};
pub use usermem::UserMemory;
