//! Hosted test fixtures: fake paging, fake services, frame builders.
//!
//! Only compiled off bare metal. Integration tests drive the scheduler
//! exactly like the trap stubs would: build a frame, hand it to an entry
//! point, look at the frame that comes back.

use std::boxed::Box;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::string::String;
use std::sync::Arc;
use std::vec::Vec;

use core::ptr::NonNull;

use crate::arch::interrupts::{InterruptStackFrame, SavedRegisters, TrapFrame};
use crate::arch::{
    DEFAULT_RFLAGS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR,
    USER_DATA_SELECTOR,
};
use crate::config::{SchedulerConfig, PAGE_SIZE};
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Kernel, KernelServices};
use crate::memory::{Access, AddressSpaceId, AddressSpaces};
use crate::process::{Pid, ProcessImage};
use crate::scheduler::Scheduler;
use crate::sync::spinlock::SpinLock;
use crate::syscall::SyscallId;

/// Entry point of every fake user image.
pub const USER_ENTRY: u64 = 0x40_0000;

/// Start of the writable data window of every fake user image.
pub const USER_DATA: u64 = 0x50_0000;

/// Size of the data window in pages.
pub const USER_DATA_PAGES: usize = 4;

/// Initial user stack pointer of every fake user image.
pub const USER_STACK_TOP: u64 = 0x7FFF_F000;

const PAGE: u64 = PAGE_SIZE as u64;

struct Page {
    data: Box<[u8; PAGE_SIZE]>,
    writable: bool,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    live: BTreeSet<u64>,
    pages: BTreeMap<(u64, u64), Page>,
    activations: Vec<AddressSpaceId>,
    destroyed: Vec<AddressSpaceId>,
    fail_next_duplicate: bool,
    translations: usize,
}

/// Page-granular fake of the paging collaborator.
///
/// Each page is a separate heap block, so translated pointers stay valid
/// until the page's address space is destroyed.
pub struct FakeAddressSpaces {
    kernel: AddressSpaceId,
    state: SpinLock<FakeState>,
}

impl FakeAddressSpaces {
    pub fn new() -> Self {
        let kernel = AddressSpaceId(0x1000);
        let mut state = FakeState {
            next_id: 2,
            ..FakeState::default()
        };
        state.live.insert(kernel.0);
        Self {
            kernel,
            state: SpinLock::new(state),
        }
    }

    /// Creates an empty address space.
    pub fn create_space(&self) -> AddressSpaceId {
        let mut st = self.state.lock();
        let id = st.next_id * 0x1000;
        st.next_id += 1;
        st.live.insert(id);
        AddressSpaceId(id)
    }

    /// Address space with the standard user layout: one read-only code page
    /// at [`USER_ENTRY`], a writable data window at [`USER_DATA`], and one
    /// stack page below [`USER_STACK_TOP`].
    pub fn create_user_space(&self) -> AddressSpaceId {
        let space = self.create_space();
        self.map(space, USER_ENTRY, PAGE_SIZE, false);
        self.map(space, USER_DATA, USER_DATA_PAGES * PAGE_SIZE, true);
        self.map(space, USER_STACK_TOP - PAGE, PAGE_SIZE, true);
        space
    }

    /// Maps zeroed pages covering `va..va+len`.
    pub fn map(&self, space: AddressSpaceId, va: u64, len: usize, writable: bool) {
        let mut st = self.state.lock();
        let first = va & !(PAGE - 1);
        let end = va + len as u64;
        let mut page = first;
        while page < end {
            st.pages.insert(
                (space.0, page),
                Page {
                    data: Box::new([0; PAGE_SIZE]),
                    writable,
                },
            );
            page += PAGE;
        }
    }

    /// Removes the page containing `va`.
    pub fn unmap(&self, space: AddressSpaceId, va: u64) {
        self.state.lock().pages.remove(&(space.0, va & !(PAGE - 1)));
    }

    /// Test-side write, bypassing page permissions. Returns `false` if any
    /// page is unmapped.
    pub fn write_bytes(&self, space: AddressSpaceId, va: u64, bytes: &[u8]) -> bool {
        let mut st = self.state.lock();
        for (i, byte) in bytes.iter().enumerate() {
            let addr = va + i as u64;
            match st.pages.get_mut(&(space.0, addr & !(PAGE - 1))) {
                Some(page) => page.data[(addr & (PAGE - 1)) as usize] = *byte,
                None => return false,
            }
        }
        true
    }

    /// Test-side read, bypassing page permissions.
    pub fn read_bytes(&self, space: AddressSpaceId, va: u64, len: usize) -> Option<Vec<u8>> {
        let st = self.state.lock();
        (0..len as u64)
            .map(|i| {
                let addr = va + i;
                st.pages
                    .get(&(space.0, addr & !(PAGE - 1)))
                    .map(|page| page.data[(addr & (PAGE - 1)) as usize])
            })
            .collect()
    }

    pub fn read_i32(&self, space: AddressSpaceId, va: u64) -> Option<i32> {
        let bytes = self.read_bytes(space, va, 4)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Writes `s` followed by a NUL.
    pub fn write_cstr(&self, space: AddressSpaceId, va: u64, s: &str) -> bool {
        self.write_bytes(space, va, s.as_bytes())
            && self.write_bytes(space, va + s.len() as u64, &[0])
    }

    /// Makes the next `duplicate` fail with `OutOfMemory`.
    pub fn fail_next_duplicate(&self) {
        self.state.lock().fail_next_duplicate = true;
    }

    /// Every space passed to `activate`, in order.
    pub fn activations(&self) -> Vec<AddressSpaceId> {
        self.state.lock().activations.clone()
    }

    /// Every space passed to `destroy`, in order.
    pub fn destroyed(&self) -> Vec<AddressSpaceId> {
        self.state.lock().destroyed.clone()
    }

    pub fn is_live(&self, space: AddressSpaceId) -> bool {
        self.state.lock().live.contains(&space.0)
    }

    /// Number of `translate` calls so far.
    pub fn translate_count(&self) -> usize {
        self.state.lock().translations
    }
}

impl Default for FakeAddressSpaces {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpaces for FakeAddressSpaces {
    fn kernel_space(&self) -> AddressSpaceId {
        self.kernel
    }

    fn duplicate(&self, space: AddressSpaceId) -> KernelResult<AddressSpaceId> {
        {
            let mut st = self.state.lock();
            if core::mem::take(&mut st.fail_next_duplicate) || !st.live.contains(&space.0) {
                return Err(KernelError::OutOfMemory);
            }
        }
        let child = self.create_space();

        let mut st = self.state.lock();
        let copies: Vec<(u64, Page)> = st
            .pages
            .range((space.0, 0)..(space.0 + 1, 0))
            .map(|(&(_, va), page)| {
                (
                    va,
                    Page {
                        data: page.data.clone(),
                        writable: page.writable,
                    },
                )
            })
            .collect();
        for (va, page) in copies {
            st.pages.insert((child.0, va), page);
        }
        Ok(child)
    }

    fn destroy(&self, space: AddressSpaceId) {
        let mut st = self.state.lock();
        st.live.remove(&space.0);
        st.pages.retain(|&(owner, _), _| owner != space.0);
        st.destroyed.push(space);
    }

    unsafe fn activate(&self, space: AddressSpaceId) {
        self.state.lock().activations.push(space);
    }

    fn translate(&self, space: AddressSpaceId, va: u64, access: Access) -> Option<NonNull<u8>> {
        let mut st = self.state.lock();
        st.translations += 1;
        let page = st.pages.get_mut(&(space.0, va & !(PAGE - 1)))?;
        if access.contains(Access::WRITE) && !page.writable {
            return None;
        }
        let offset = (va & (PAGE - 1)) as usize;
        NonNull::new(page.data[offset..].as_mut_ptr())
    }
}

/// Fake console, keyboard buffer and directory tree.
#[derive(Default)]
pub struct FakeServices {
    console: SpinLock<Vec<u8>>,
    keys: SpinLock<VecDeque<u8>>,
    directories: SpinLock<BTreeSet<String>>,
}

impl FakeServices {
    pub fn new() -> Self {
        let services = Self::default();
        services.add_directory("/");
        services
    }

    pub fn with_directories(paths: &[&str]) -> Self {
        let services = Self::new();
        for path in paths {
            services.add_directory(path);
        }
        services
    }

    pub fn add_directory(&self, path: &str) {
        self.directories.lock().insert(String::from(path));
    }

    pub fn push_key(&self, key: u8) {
        self.keys.lock().push_back(key);
    }

    pub fn console_output(&self) -> String {
        String::from_utf8_lossy(&self.console.lock()).into_owned()
    }
}

impl KernelServices for FakeServices {
    fn console_write(&self, bytes: &[u8]) -> KernelResult<usize> {
        self.console.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn read_key(&self) -> Option<u8> {
        self.keys.lock().pop_front()
    }

    fn directory_exists(&self, path: &str) -> bool {
        self.directories.lock().contains(path)
    }
}

/// Registers of the boot context as seen by the first timer tick.
pub fn bootstrap_frame() -> TrapFrame {
    TrapFrame {
        regs: SavedRegisters {
            rbx: 0xB007,
            ..SavedRegisters::default()
        },
        iret: InterruptStackFrame {
            rip: 0xFFFF_8000_0010_0000,
            cs: KERNEL_CODE_SELECTOR as u64,
            rflags: DEFAULT_RFLAGS.bits(),
            rsp: 0xFFFF_8000_0020_0000,
            ss: KERNEL_DATA_SELECTOR as u64,
        },
    }
}

/// A ring-3 frame at `rip` on `rsp`.
pub fn user_frame(rip: u64, rsp: u64) -> TrapFrame {
    TrapFrame {
        regs: SavedRegisters::default(),
        iret: InterruptStackFrame {
            rip,
            cs: USER_CODE_SELECTOR as u64,
            rflags: DEFAULT_RFLAGS.bits(),
            rsp,
            ss: USER_DATA_SELECTOR as u64,
        },
    }
}

/// Loads a syscall number and up to four arguments into `frame`.
pub fn set_syscall(frame: &mut TrapFrame, id: SyscallId, args: &[u64]) {
    frame.regs.rax = id.as_u64();
    let regs = [
        &mut frame.regs.rdi,
        &mut frame.regs.rsi,
        &mut frame.regs.rdx,
        &mut frame.regs.r10,
    ];
    for (reg, value) in regs.into_iter().zip(args.iter()) {
        *reg = *value;
    }
}

/// Image for [`Scheduler::spawn`] with the standard user layout in `space`.
pub fn user_image<'a>(
    name: &'a str,
    space: AddressSpaceId,
    argv: &'a [&'a str],
) -> ProcessImage<'a> {
    ProcessImage {
        name,
        entry_rip: USER_ENTRY,
        user_rsp: USER_STACK_TOP,
        address_space: space,
        argv,
        cwd: "/",
        priority: None,
    }
}

/// Default-configured scheduler over `spaces`.
pub fn scheduler(spaces: &Arc<FakeAddressSpaces>) -> Scheduler {
    let spaces: Arc<dyn AddressSpaces> = spaces.clone();
    match Scheduler::new(SchedulerConfig::default(), spaces) {
        Ok(sched) => sched,
        Err(err) => panic!("default scheduler config rejected: {err}"),
    }
}

/// Kernel over fresh fakes, with its scheduler started and nothing
/// spawned yet.
pub struct TestKernel {
    pub spaces: Arc<FakeAddressSpaces>,
    pub services: Arc<FakeServices>,
    pub kernel: Kernel,
}

impl TestKernel {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let spaces = Arc::new(FakeAddressSpaces::new());
        let services = Arc::new(FakeServices::new());
        let dyn_spaces: Arc<dyn AddressSpaces> = spaces.clone();
        let sched = match Scheduler::new(config, dyn_spaces) {
            Ok(sched) => sched,
            Err(err) => panic!("scheduler config rejected: {err}"),
        };
        sched.start();
        let kernel = Kernel::new(sched, services.clone());
        Self {
            spaces,
            services,
            kernel,
        }
    }

    pub fn sched(&self) -> &Scheduler {
        self.kernel.scheduler()
    }

    /// Spawns a user process with a fresh standard address space.
    pub fn spawn_user(&self, name: &str) -> (Pid, AddressSpaceId) {
        let space = self.spaces.create_user_space();
        match self.sched().spawn(user_image(name, space, &[name])) {
            Ok(pid) => (pid, space),
            Err(err) => panic!("spawn of {name} failed: {err}"),
        }
    }

    /// Runs the first tick from the bootstrap context and returns the frame
    /// of the thread that got the CPU.
    pub fn boot(&self) -> TrapFrame {
        let mut frame = bootstrap_frame();
        self.sched().on_timer_tick(&mut frame);
        frame
    }

    /// Issues syscall `id` from the thread whose live registers are `frame`.
    pub fn syscall(&self, frame: &mut TrapFrame, id: SyscallId, args: &[u64]) {
        set_syscall(frame, id, args);
        crate::syscall::dispatch(&self.kernel, frame);
    }
}

impl Default for TestKernel {
    fn default() -> Self {
        Self::new()
    }
}
