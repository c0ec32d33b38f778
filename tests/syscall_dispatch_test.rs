//! Syscall dispatcher integration tests.

use kaos_core::arch::interrupts::TrapFrame;
use kaos_core::memory::AddressSpaceId;
use kaos_core::process::{Pid, ProcessState};
use kaos_core::syscall::{
    self, decode_result, normalize_path, ProcessRecord, SysError, SyscallId, SYSCALL_ERR_FAULT,
    SYSCALL_ERR_INVALID_ARG, SYSCALL_ERR_UNSUPPORTED, SYSCALL_OK,
};
use kaos_core::testing::{self, TestKernel, USER_DATA, USER_DATA_PAGES};
use kaos_core::KernelError;

fn booted(name: &str) -> (TestKernel, Pid, AddressSpaceId, TrapFrame) {
    let tk = TestKernel::new();
    let (pid, space) = tk.spawn_user(name);
    let frame = tk.boot();
    (tk, pid, space, frame)
}

/// Contract: unknown syscall IDs return ERR_UNSUPPORTED.
/// Given: A running process.
/// When: It issues syscall number 99.
/// Then: RAX holds the Unsupported error, which decodes back to the error.
#[test]
fn test_unknown_syscall_returns_unsupported() {
    let (tk, pid, _, mut frame) = booted("a");

    frame.regs.rax = 99;
    syscall::dispatch(&tk.kernel, &mut frame);

    assert_eq!(frame.return_value(), SYSCALL_ERR_UNSUPPORTED);
    assert_eq!(
        decode_result(frame.return_value()),
        Err(SysError::Kernel(KernelError::Unsupported))
    );
    assert_eq!(decode_result(5), Ok(5), "small values are successes");
    assert_eq!(tk.sched().current_pid(), Some(pid), "an error must not switch away");
}

/// Contract: GetPid and GetPpid report the caller and its parent.
#[test]
fn test_pid_queries() {
    let (tk, pid, _, mut frame) = booted("a");

    tk.syscall(&mut frame, SyscallId::GetPid, &[]);
    assert_eq!(frame.return_value(), pid.as_u64());
    tk.syscall(&mut frame, SyscallId::GetPpid, &[]);
    assert_eq!(frame.return_value(), 0, "a spawned process has no parent");

    tk.syscall(&mut frame, SyscallId::Fork, &[]);
    let child = frame.return_value();
    tk.syscall(&mut frame, SyscallId::Yield, &[]);

    tk.syscall(&mut frame, SyscallId::GetPid, &[]);
    assert_eq!(frame.return_value(), child);
    tk.syscall(&mut frame, SyscallId::GetPpid, &[]);
    assert_eq!(frame.return_value(), pid.as_u64(), "a fork child reports its parent");
}

/// Contract: WriteConsole copies the caller's bytes to the console.
#[test]
fn test_write_console() {
    let (tk, _, space, mut frame) = booted("a");
    assert!(tk.spaces.write_bytes(space, USER_DATA, b"hello"));

    tk.syscall(&mut frame, SyscallId::WriteConsole, &[USER_DATA, 5]);
    assert_eq!(frame.return_value(), 5, "WriteConsole must return the byte count");
    assert_eq!(tk.services.console_output(), "hello");

    tk.syscall(&mut frame, SyscallId::WriteConsole, &[0, 0]);
    assert_eq!(frame.return_value(), 0, "a zero-length write succeeds");
}

/// Contract: WriteConsole validates the whole buffer before writing.
#[test]
fn test_write_console_rejects_unmapped_buffer() {
    let (tk, _, space, mut frame) = booted("a");
    let window_end = USER_DATA + (USER_DATA_PAGES * 4096) as u64;
    assert!(tk.spaces.write_bytes(space, window_end - 2, b"ok"));

    tk.syscall(&mut frame, SyscallId::WriteConsole, &[window_end - 2, 4]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_FAULT);
    assert_eq!(
        tk.services.console_output(),
        "",
        "a buffer running off the mapping must not be partially written"
    );

    tk.syscall(&mut frame, SyscallId::WriteConsole, &[0xFFFF_8000_0000_0000, 4]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_FAULT, "kernel addresses must be rejected");
}

/// Contract: Uptime returns the tick counter.
#[test]
fn test_uptime_returns_jiffies() {
    let (tk, _, _, mut frame) = booted("a");

    tk.syscall(&mut frame, SyscallId::Uptime, &[]);
    assert_eq!(frame.return_value(), 1, "boot delivered exactly one tick");

    tk.sched().on_timer_tick(&mut frame);
    tk.sched().on_timer_tick(&mut frame);
    tk.syscall(&mut frame, SyscallId::Uptime, &[]);
    assert_eq!(frame.return_value(), 3);
}

/// Contract: GetCwd and Chdir maintain a normalised working directory.
#[test]
fn test_cwd_round_trip() {
    let (tk, pid, space, mut frame) = booted("a");
    tk.services.add_directory("/bin");
    let path_buf = USER_DATA + 0x100;

    tk.syscall(&mut frame, SyscallId::GetCwd, &[USER_DATA, 64]);
    assert_eq!(frame.return_value(), 1);
    assert_eq!(tk.spaces.read_bytes(space, USER_DATA, 2).as_deref(), Some(&b"/\0"[..]));

    assert!(tk.spaces.write_cstr(space, path_buf, "bin"));
    tk.syscall(&mut frame, SyscallId::Chdir, &[path_buf]);
    assert_eq!(frame.return_value(), SYSCALL_OK);
    tk.syscall(&mut frame, SyscallId::GetCwd, &[USER_DATA, 64]);
    assert_eq!(frame.return_value(), 4);
    assert_eq!(tk.spaces.read_bytes(space, USER_DATA, 5).as_deref(), Some(&b"/bin\0"[..]));

    assert!(tk.spaces.write_cstr(space, path_buf, "nope"));
    tk.syscall(&mut frame, SyscallId::Chdir, &[path_buf]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_INVALID_ARG, "missing directory must fail");
    assert_eq!(
        tk.sched().with_current(|p| *p.cwd()).map(|cwd| cwd == "/bin"),
        Some(true),
        "a failed chdir must keep the old directory"
    );

    assert!(tk.spaces.write_cstr(space, path_buf, ".."));
    tk.syscall(&mut frame, SyscallId::Chdir, &[path_buf]);
    assert_eq!(frame.return_value(), SYSCALL_OK);
    tk.syscall(&mut frame, SyscallId::GetCwd, &[USER_DATA, 1]);
    assert_eq!(
        frame.return_value(),
        SYSCALL_ERR_INVALID_ARG,
        "a buffer without room for the terminator must be rejected"
    );
    assert_eq!(tk.sched().current_pid(), Some(pid));
}

/// Contract: ArgCount and GetArg expose the argument vector.
#[test]
fn test_argument_vector() {
    let tk = TestKernel::new();
    let space = tk.spaces.create_user_space();
    tk.sched()
        .spawn(testing::user_image("sh", space, &["sh", "-x"]))
        .unwrap();
    let mut frame = tk.boot();

    tk.syscall(&mut frame, SyscallId::ArgCount, &[]);
    assert_eq!(frame.return_value(), 2);

    tk.syscall(&mut frame, SyscallId::GetArg, &[1, USER_DATA, 16]);
    assert_eq!(frame.return_value(), 2);
    assert_eq!(tk.spaces.read_bytes(space, USER_DATA, 3).as_deref(), Some(&b"-x\0"[..]));

    tk.syscall(&mut frame, SyscallId::GetArg, &[2, USER_DATA, 16]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_INVALID_ARG, "index past argc must fail");

    tk.syscall(&mut frame, SyscallId::GetArg, &[0, USER_DATA, 2]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_INVALID_ARG, "\"sh\" needs three bytes");
}

/// Contract: priorities are read and written through the syscall layer.
#[test]
fn test_priority_syscalls() {
    let (tk, _, _, mut frame) = booted("a");

    tk.syscall(&mut frame, SyscallId::GetPriority, &[]);
    assert_eq!(frame.return_value(), 1, "spawned processes get the default band");

    tk.syscall(&mut frame, SyscallId::SetPriority, &[5]);
    assert_eq!(frame.return_value(), SYSCALL_OK);
    tk.syscall(&mut frame, SyscallId::GetPriority, &[]);
    assert_eq!(frame.return_value(), 5);

    tk.syscall(&mut frame, SyscallId::SetPriority, &[8]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_INVALID_ARG, "band 8 does not exist");
    tk.syscall(&mut frame, SyscallId::GetPriority, &[]);
    assert_eq!(frame.return_value(), 5);
}

/// Contract: SetName truncates long names and rejects empty ones.
#[test]
fn test_set_name() {
    let (tk, pid, space, mut frame) = booted("a");

    assert!(tk.spaces.write_cstr(space, USER_DATA, "a-very-long-process-name"));
    tk.syscall(&mut frame, SyscallId::SetName, &[USER_DATA]);
    assert_eq!(frame.return_value(), SYSCALL_OK);
    assert_eq!(
        tk.sched().process_info(pid).map(|info| info.name),
        Some(kaos_core::process::ProcessName::from_str_truncate("a-very-long-proc")),
        "names are cut to sixteen bytes"
    );

    assert!(tk.spaces.write_cstr(space, USER_DATA, ""));
    tk.syscall(&mut frame, SyscallId::SetName, &[USER_DATA]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_INVALID_ARG);

    tk.syscall(&mut frame, SyscallId::SetName, &[0]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_FAULT);
}

/// Contract: ProcessList fills fixed-size records and reports the count.
#[test]
fn test_process_list_records() {
    let tk = TestKernel::new();
    let (a, space) = tk.spawn_user("a");
    let (b, _) = tk.spawn_user("b");
    let mut frame = tk.boot();

    tk.syscall(&mut frame, SyscallId::ProcessList, &[0, 0]);
    assert_eq!(frame.return_value(), 2, "a null query returns the process count");

    tk.syscall(&mut frame, SyscallId::ProcessList, &[USER_DATA, 8]);
    assert_eq!(frame.return_value(), 2);

    let bytes = tk
        .spaces
        .read_bytes(space, USER_DATA, 2 * ProcessRecord::SIZE)
        .unwrap();
    let records: Vec<ProcessRecord> = bytes
        .chunks_exact(ProcessRecord::SIZE)
        .map(|chunk| ProcessRecord::from_bytes(chunk.try_into().unwrap()))
        .collect();

    assert_eq!(records[0].pid, a.as_u32());
    assert_eq!(records[0].name(), "a");
    assert_eq!(records[0].state, ProcessState::Running.as_u8());
    assert_eq!(records[0].priority, 1);
    assert_eq!(records[1].pid, b.as_u32());
    assert_eq!(records[1].parent, 0);

    tk.syscall(&mut frame, SyscallId::ProcessList, &[USER_DATA, 1]);
    assert_eq!(frame.return_value(), 1, "output is capped at the buffer capacity");

    tk.syscall(&mut frame, SyscallId::ProcessList, &[0x60_0000, 2]);
    assert_eq!(frame.return_value(), SYSCALL_ERR_FAULT);
}

/// Contract: ReadKey returns a buffered key without blocking.
#[test]
fn test_read_key_buffered() {
    let (tk, pid, _, mut frame) = booted("a");
    tk.services.push_key(b'x');

    tk.syscall(&mut frame, SyscallId::ReadKey, &[]);
    assert_eq!(frame.return_value(), u64::from(b'x'));
    assert_eq!(tk.sched().current_pid(), Some(pid));
    assert_eq!(tk.kernel.input_waiter_count(), 0);
}

/// Contract: ReadKey blocks until a key arrives and then returns that key.
/// Given: A and B runnable, no key buffered.
/// When: A calls ReadKey, then the keyboard delivers 'k'.
/// Then: B runs meanwhile; A wakes with 'k' in RAX.
#[test]
fn test_read_key_blocks_until_input() {
    let tk = TestKernel::new();
    let sched = tk.sched();
    let (a, _) = tk.spawn_user("a");
    let (b, _) = tk.spawn_user("b");
    let mut frame = tk.boot();

    tk.syscall(&mut frame, SyscallId::ReadKey, &[]);
    assert_eq!(sched.current_pid(), Some(b), "reader must block without input");
    assert_eq!(sched.state_of(a), Some(ProcessState::Sleeping));
    assert!(tk.kernel.is_waiting_for_input(a));

    assert!(tk.kernel.notify_input(b'k'), "a waiting reader must take the key");
    assert!(!tk.kernel.notify_input(b'z'), "with no reader the key stays with the driver");

    sched.on_timer_tick(&mut frame);
    assert_eq!(sched.current_pid(), Some(a));
    assert_eq!(frame.return_value(), u64::from(b'k'), "the woken reader must see its key");
}

/// Contract: exit codes are the low 32 bits of RDI, sign included.
#[test]
fn test_exit_code_is_signed() {
    let tk = TestKernel::new();
    let (a, _) = tk.spawn_user("a");
    let _ = tk.spawn_user("b");
    let mut frame = tk.boot();

    tk.syscall(&mut frame, SyscallId::Exit, &[u64::MAX]);
    assert_eq!(tk.sched().process_info(a).and_then(|i| i.exit_code), Some(-1));
}

/// Contract: paths are resolved against the working directory.
#[test]
fn test_normalize_path() {
    let ok = |cwd: &str, path: &str| normalize_path(cwd, path).map(|p| p.as_str().to_owned());

    assert_eq!(ok("/", "bin").as_deref(), Ok("/bin"));
    assert_eq!(ok("/bin", "../usr/./lib").as_deref(), Ok("/usr/lib"));
    assert_eq!(ok("/", "..").as_deref(), Ok("/"), "`..` at the root stays at the root");
    assert_eq!(ok("/a/b", "/c").as_deref(), Ok("/c"), "absolute paths ignore the cwd");
    assert_eq!(ok("/", "a//b/").as_deref(), Ok("/a/b"));
    assert_eq!(ok("/", ""), Err(KernelError::InvalidArgument));
    assert_eq!(
        ok("/", &"x".repeat(200)),
        Err(KernelError::InvalidArgument),
        "overlong paths must be rejected instead of truncated"
    );
}
