// src/kernel/syscall/mod.rs
//! System call dispatch and process lifecycle.
//!
//! Syscalls arrive through the 0x80 trap gate with the number in EAX and
//! up to three arguments in EBX/ECX/EDX; the result is written back into
//! the saved frame's EAX slot. `execute` and `halt` are the two calls
//! that manipulate kernel contexts directly: `execute` suspends the
//! caller into a freshly primed child frame, `halt` tears the child down
//! and revives the suspended parent with the exit status.
//!
//! Errors never tunnel across this boundary; everything surfaces as the
//! ABI's -1 (invalid), 1 (`execute` with a full task table) or 256
//! (child killed by an exception).

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86::trampoline::{self, IntRegs};
use crate::arch::x86::gdt;
use crate::arch::{ArchCpu, Cpu};
use crate::console_println;
use crate::kernel::core::{KernelResult, Pid, ProcessError, TerminalId};
use crate::kernel::driver::rtc;
use crate::kernel::fs::{self, MAX_FILENAME_SIZE};
use crate::kernel::mm;
use crate::kernel::process::{
    self, FileDescriptor, FileOps, MAX_FILES, MAX_TASKS, Pcb, PROCESS, STDIN, STDOUT, TaskState,
    kernel_stack_top,
};
use crate::kernel::terminal::{self, NUM_TERMINALS, TERMINAL_BUF_SIZE};

/// Status reported to a parent whose child was killed by a CPU exception;
/// outside the 0..=255 range a regular `halt` can produce.
pub const EXCEPTION_STATUS: u32 = 256;

/// First four bytes of every runnable image.
const EXEC_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// File offset of the 32-bit entry point.
const EXEC_ENTRY_OFFSET: usize = 24;

/// Upper bound on a command line: name, separator, arguments, NUL.
const COMMAND_MAX: usize = MAX_FILENAME_SIZE + TERMINAL_BUF_SIZE + 2;

/// Set by the exception path so the in-flight `halt` reports
/// [`EXCEPTION_STATUS`] instead of the process's own status.
static EXCEPTION_FLAG: AtomicBool = AtomicBool::new(false);

/// Flags the current teardown as exception-driven.
pub fn raise_exception_flag() {
    EXCEPTION_FLAG.store(true, Ordering::Release);
}

/// Syscall entry, called from interrupt dispatch with the saved frame.
pub fn dispatch(frame: &mut IntRegs) {
    let number = frame.eax;
    let (arg1, arg2, arg3) = (frame.ebx, frame.ecx, frame.edx);

    #[cfg(feature = "syscall_trace")]
    crate::debug_println!(
        "[SYSCALL] nr={} args=({:#x}, {:#x}, {:#x})",
        number,
        arg1,
        arg2,
        arg3
    );

    let result: i32 = match number {
        1 => sys_halt(arg1),
        2 => sys_execute(arg1 as *const u8),
        3 => sys_read(arg1 as i32, arg2 as *mut u8, arg3 as i32),
        4 => sys_write(arg1 as i32, arg2 as *const u8, arg3 as i32),
        5 => sys_open(arg1 as *const u8),
        6 => sys_close(arg1 as i32),
        7 => sys_getargs(arg1 as *mut u8, arg2 as i32),
        8 => sys_vidmap(arg1 as *mut u32),
        // Signal slots exist in the ABI but deliver nothing.
        9 | 10 => 0,
        _ => -1,
    };

    frame.eax = result as u32;
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Splits a command into a padded program name and its argument word.
///
/// The argument capture ends at the first space, so only a single word
/// survives into `getargs`.
fn parse_command(
    command: &[u8],
) -> (
    [u8; MAX_FILENAME_SIZE],
    [u8; TERMINAL_BUF_SIZE],
    usize,
) {
    let mut name = [0u8; MAX_FILENAME_SIZE];
    let mut args = [0u8; TERMINAL_BUF_SIZE];

    let mut i = 0;

    // Leading spaces before the program name.
    while i < command.len() && command[i] == b' ' {
        i += 1;
    }

    let mut n = 0;
    while i < command.len() && command[i] != b' ' && command[i] != 0 && n < MAX_FILENAME_SIZE {
        name[n] = command[i];
        n += 1;
        i += 1;
    }

    // Spaces between name and argument.
    while i < command.len() && command[i] == b' ' {
        i += 1;
    }

    let mut a = 0;
    while i < command.len()
        && command[i] != b' '
        && command[i] != 0
        && a < TERMINAL_BUF_SIZE - 1
    {
        args[a] = command[i];
        a += 1;
        i += 1;
    }

    (name, args, a)
}

/// Validates an image and builds a ready-to-run task out of it: PID
/// reserved, terminal head pushed, image loaded into the task's user
/// slot, PCB initialized, first-entry frame primed.
///
/// `root_terminal` names the owning terminal when there is no active
/// process to inherit from (initial shells, shell respawn).
fn prep_task(
    name: &[u8; MAX_FILENAME_SIZE],
    args: &[u8],
    root_terminal: Option<TerminalId>,
) -> KernelResult<Pid> {
    let fs = fs::get().ok_or(ProcessError::NoSuchPid)?;

    let dentry = fs.dentry_by_name(name)?;

    let mut magic = [0u8; 4];
    fs.read_data(dentry.inode, 0, &mut magic)?;
    if magic != EXEC_MAGIC {
        return Err(crate::kernel::core::FsError::NotExecutable.into());
    }

    let mut entry_bytes = [0u8; 4];
    fs.read_data(dentry.inode, EXEC_ENTRY_OFFSET, &mut entry_bytes)?;
    let entry = u32::from_le_bytes(entry_bytes);

    let size = fs.inode_size(dentry.inode)?;
    if mm::USER_LOAD_ADDR + size > mm::USER_STACK_TOP as usize {
        return Err(crate::kernel::core::FsError::NotExecutable.into());
    }

    // Reserve the PID and splice the task into its terminal's chain.
    let mut table = PROCESS.lock();
    let pid = table.reserve_pid()?;

    let (owning_terminal, parent) = match table.active() {
        None => {
            let t = root_terminal.unwrap_or_else(terminal::foreground);
            table.set_head(t, Some(pid));
            (t, None)
        }
        Some(parent_pid) => {
            // Children inherit their parent's terminal; the parent parks
            // until halt.
            let Some(parent_pcb) = table.pcb_mut(parent_pid) else {
                let _ = table.free_pid(pid);
                return Err(ProcessError::NoSuchPid.into());
            };
            let t = parent_pcb.terminal;
            parent_pcb.state = TaskState::WaitingForChild;
            table.set_head(t, Some(pid));
            (t, Some(parent_pid))
        }
    };
    drop(table);

    // Load the full image at the fixed user address inside the new slot.
    // SAFETY: the slot was just mapped to pid's private frame; the size
    // check above keeps the copy inside it.
    let load_result = unsafe {
        mm::map_task_slot(pid.index());
        let image = core::slice::from_raw_parts_mut(mm::USER_LOAD_ADDR as *mut u8, size);
        fs.read_data(dentry.inode, 0, image)
    };

    if load_result.is_err() {
        // Unwind the reservation: restore the chain and the parent state.
        let mut table = PROCESS.lock();
        table.set_head(owning_terminal, parent);
        if let Some(parent_pid) = parent
            && let Some(parent_pcb) = table.pcb_mut(parent_pid)
        {
            parent_pcb.state = TaskState::Executing;
        }
        let _ = table.free_pid(pid);
        return Err(ProcessError::NoSuchPid.into());
    }

    // PCB and first-entry frame.
    let mut table = PROCESS.lock();
    table.install_pcb(pid, Pcb::fresh(owning_terminal, parent, args));

    // SAFETY: pid's kernel stack is unused until this task first runs.
    let anchor =
        unsafe { trampoline::prime_user_frame(kernel_stack_top(pid), entry, mm::USER_STACK_TOP) };

    if let Some(pcb) = table.pcb_mut(pid) {
        pcb.context.esp = anchor as u32;
        pcb.context.eip = entry;
    }

    Ok(pid)
}

/// Launches `command` as a child of the active process (or as a root task
/// for `root_terminal` when nothing is active) and waits for its exit
/// status. The kernel-internal core of the `execute` syscall.
fn execute_command(command: &[u8], root_terminal: Option<TerminalId>) -> i32 {
    if PROCESS.lock().task_count() >= MAX_TASKS {
        return 1;
    }

    // No preemption from here until the child's first frame is entered;
    // the child's saved EFLAGS re-enable interrupts on its iretd.
    ArchCpu::disable_interrupts();

    let (name, args, args_len) = parse_command(command);

    let parent = PROCESS.lock().active();

    let pid = match prep_task(&name, &args[..args_len], root_terminal) {
        Ok(pid) => pid,
        Err(_) => return -1,
    };

    // The child inherited its terminal from us (or owns the root slot);
    // park the on-screen cursor for whoever renders next.
    let child_terminal = PROCESS
        .lock()
        .pcb(pid)
        .map(|pcb| pcb.terminal)
        .unwrap_or(0);
    terminal::save_cursor(child_terminal);

    match parent {
        Some(parent_pid) => {
            let anchor = match process::prepare_resume(pid) {
                Ok(anchor) => anchor,
                Err(_) => return -1,
            };

            // Record our kernel context in the parent PCB; halt revives it
            // from there with the child's status.
            let saved_esp_ptr = {
                let mut table = PROCESS.lock();
                match table.pcb_mut(parent_pid) {
                    Some(pcb) => &raw mut pcb.context.esp,
                    None => return -1,
                }
            };

            // SAFETY: the anchor names the child's freshly primed frame;
            // the pointer targets the parent's PCB slot in the static
            // arena, which outlives the suspension.
            let status = unsafe { trampoline::suspend_into(anchor, saved_esp_ptr) };
            status as i32
        }
        None => {
            // Root task: nobody to return to.
            let _ = process::resume_task(pid);
            -1
        }
    }
}

/// The `execute` syscall: copies the caller's command string and runs it.
fn sys_execute(command: *const u8) -> i32 {
    if command.is_null() {
        return -1;
    }

    let mut buf = [0u8; COMMAND_MAX];
    let mut len = 0;
    // SAFETY: caller-supplied NUL-terminated string in the active user
    // slot (or kernel memory for kernel-internal callers); length capped.
    unsafe {
        while len < COMMAND_MAX - 1 {
            let byte = *command.add(len);
            if byte == 0 {
                break;
            }
            buf[len] = byte;
            len += 1;
        }
    }

    execute_command(&buf[..len], None)
}

/// Spawns one shell per terminal (PIDs 0..NUM_TERMINALS, terminal heads
/// [0,1,2]) and enters the terminal-0 shell. Diverges on success.
pub fn spawn_initial_shells() -> KernelResult<()> {
    for terminal_id in 0..NUM_TERMINALS {
        let (name, args, args_len) = parse_command(b"shell");
        prep_task(&name, &args[..args_len], Some(terminal_id))?;
    }

    let first = PROCESS
        .lock()
        .head(0)
        .ok_or(ProcessError::NoSuchPid)?;

    ArchCpu::disable_interrupts();
    process::resume_task(first)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// halt
// ---------------------------------------------------------------------------

/// The `halt` syscall (also the exception termination path): tears the
/// active process down and transfers control to its parent - or respawns
/// a shell when a terminal's root exits. Never returns.
pub fn sys_halt(status: u32) -> ! {
    // Must not be interrupted by the scheduler from here on.
    ArchCpu::disable_interrupts();

    let status = if EXCEPTION_FLAG.swap(false, Ordering::AcqRel) {
        EXCEPTION_STATUS
    } else {
        status & 0xFF
    };

    let mut table = PROCESS.lock();

    let Some(active) = table.active() else {
        // Nothing to tear down; keep the machine alive on a fresh shell.
        drop(table);
        let _ = execute_command(b"shell", None);
        console_println!("halt with no active task and no shell to run");
        crate::hlt_loop();
    };

    let (owning_terminal, parent, vid_in_use) = {
        let pcb = match table.pcb_mut(active) {
            Some(pcb) => pcb,
            None => {
                drop(table);
                console_println!("halt: active pid {} has no PCB", active);
                crate::hlt_loop();
            }
        };

        // Close everything beyond stdin/stdout.
        for slot in pcb.files[2..].iter_mut() {
            *slot = None;
        }

        (pcb.terminal, pcb.parent, pcb.vid_in_use)
    };

    if vid_in_use {
        mm::unmap_user_video();
    }

    // Pop this process off its terminal's chain and release the PID.
    table.set_head(owning_terminal, parent);
    let _ = table.free_pid(active);

    match parent {
        Some(parent_pid) => {
            // Reattach the parent's execution environment.
            gdt::set_kernel_stack(kernel_stack_top(parent_pid) as u32);
            // SAFETY: interrupts are off; the child's slot is dead.
            unsafe {
                mm::map_task_slot(parent_pid.index());
            }

            let saved_esp_ptr = {
                let pcb = match table.pcb_mut(parent_pid) {
                    Some(pcb) => pcb,
                    None => {
                        drop(table);
                        console_println!("halt: parent pid {} vanished", parent_pid);
                        crate::hlt_loop();
                    }
                };
                pcb.state = TaskState::Executing;
                &raw const pcb.context.esp
            };
            table.set_active(Some(parent_pid));
            drop(table);

            // SAFETY: the slot holds the kernel ESP recorded by the
            // parent's suspend_into; its stack is intact by I4 (the
            // parent was parked the whole time).
            unsafe { trampoline::resume_parent(status, saved_esp_ptr) }
        }
        None => {
            // A root shell died; its terminal must always have one.
            table.set_active(None);
            drop(table);

            let _ = execute_command(b"shell", Some(owning_terminal));
            console_println!("shell respawn failed for terminal {}", owning_terminal);
            crate::hlt_loop();
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor-layer syscalls
// ---------------------------------------------------------------------------

/// Looks the active process's descriptor up, returning its fields and the
/// owning terminal without holding the table lock afterwards.
fn descriptor(fd: usize) -> Option<(FileDescriptor, TerminalId)> {
    let table = PROCESS.lock();
    let active = table.active()?;
    let pcb = table.pcb(active)?;
    let file = pcb.files.get(fd).copied().flatten()?;
    Some((file, pcb.terminal))
}

/// Writes an updated `fpos` back into the active process's descriptor.
fn update_fpos(fd: usize, fpos: u32) {
    let mut table = PROCESS.lock();
    let Some(active) = table.active() else {
        return;
    };
    if let Some(pcb) = table.pcb_mut(active)
        && let Some(slot) = pcb.files.get_mut(fd)
        && let Some(file) = slot.as_mut()
    {
        file.fpos = fpos;
    }
}

/// The `open` syscall: selects the op vector from the directory entry's
/// type and installs a descriptor in the first free slot.
fn sys_open(filename: *const u8) -> i32 {
    if filename.is_null() {
        return -1;
    }

    // Names compare on at most 32 bytes, so a bounded copy suffices.
    let mut name = [0u8; MAX_FILENAME_SIZE];
    // SAFETY: NUL-terminated user string in the active slot; copy capped.
    unsafe {
        for (i, slot) in name.iter_mut().enumerate() {
            let byte = *filename.add(i);
            if byte == 0 {
                break;
            }
            *slot = byte;
        }
    }

    let Some(fs) = fs::get() else {
        return -1;
    };
    let Ok(dentry) = fs.dentry_by_name(&name) else {
        return -1;
    };

    let ops = match dentry.dtype {
        fs::DentryType::Rtc => FileOps::Rtc,
        fs::DentryType::Directory => FileOps::Directory,
        fs::DentryType::Regular => FileOps::File,
    };

    let file = FileDescriptor {
        ops,
        // Opening the RTC resets its virtual rate to 2 Hz.
        inode: if ops == FileOps::Rtc {
            rtc::DEFAULT_RATE
        } else {
            dentry.inode
        },
        fpos: 0,
    };

    let mut table = PROCESS.lock();
    let Some(active) = table.active() else {
        return -1;
    };
    let Some(pcb) = table.pcb_mut(active) else {
        return -1;
    };

    // Slots 0/1 are always occupied, so the scan lands at 2 or later.
    let Some(fd) = pcb.files.iter().position(Option::is_none) else {
        return -1;
    };
    pcb.files[fd] = Some(file);

    fd as i32
}

/// The `close` syscall. stdin/stdout are not closable.
fn sys_close(fd: i32) -> i32 {
    let Ok(fd) = usize::try_from(fd) else {
        return -1;
    };
    if fd >= MAX_FILES || fd == STDIN || fd == STDOUT {
        return -1;
    }

    let mut table = PROCESS.lock();
    let Some(active) = table.active() else {
        return -1;
    };
    let Some(pcb) = table.pcb_mut(active) else {
        return -1;
    };

    if pcb.files[fd].take().is_none() {
        return -1;
    }
    0
}

/// The `read` syscall: dispatches through the descriptor's op vector.
/// Terminal and RTC reads block; file and directory reads complete
/// immediately.
fn sys_read(fd: i32, buf: *mut u8, nbytes: i32) -> i32 {
    let Ok(fd) = usize::try_from(fd) else {
        return -1;
    };
    if fd >= MAX_FILES || fd == STDOUT || buf.is_null() || nbytes < 0 {
        return -1;
    }

    let Some((file, owning_terminal)) = descriptor(fd) else {
        return -1;
    };

    // SAFETY: caller-owned buffer in the active user slot; the backends
    // below never retain the slice.
    let out = unsafe { core::slice::from_raw_parts_mut(buf, nbytes as usize) };

    match file.ops {
        FileOps::Stdin => terminal::read(owning_terminal, out) as i32,
        FileOps::File => {
            let Some(fs) = fs::get() else {
                return -1;
            };
            match fs.read_data(file.inode, file.fpos as usize, out) {
                Ok(got) => {
                    update_fpos(fd, file.fpos + got as u32);
                    got as i32
                }
                Err(_) => -1,
            }
        }
        FileOps::Directory => {
            let Some(fs) = fs::get() else {
                return -1;
            };
            let got = fs.read_dir_entry(file.fpos as usize, out);
            if got > 0 {
                update_fpos(fd, file.fpos + 1);
            }
            got as i32
        }
        FileOps::Rtc => {
            // Mark, then wait out one virtual period.
            update_fpos(fd, rtc::interrupt_count());
            rtc::wait_virtual_tick(file.inode);
            0
        }
        FileOps::Stdout => -1,
    }
}

/// The `write` syscall: terminal writes render, RTC writes retune the
/// virtual rate, everything else is read-only.
fn sys_write(fd: i32, buf: *const u8, nbytes: i32) -> i32 {
    let Ok(fd) = usize::try_from(fd) else {
        return -1;
    };
    if fd >= MAX_FILES || fd == STDIN || buf.is_null() || nbytes < 0 {
        return -1;
    }

    let Some((file, owning_terminal)) = descriptor(fd) else {
        return -1;
    };

    match file.ops {
        FileOps::Stdout => {
            // SAFETY: caller-owned buffer; consumed before returning.
            let data = unsafe { core::slice::from_raw_parts(buf, nbytes as usize) };
            terminal::write(owning_terminal, data) as i32
        }
        FileOps::Rtc => {
            if nbytes != 4 {
                return -1;
            }
            // SAFETY: four bytes checked above.
            let raw = unsafe { core::ptr::read_unaligned(buf as *const u32) };
            if !rtc::valid_rate(raw) {
                return -1;
            }

            let mut table = PROCESS.lock();
            let Some(active) = table.active() else {
                return -1;
            };
            if let Some(pcb) = table.pcb_mut(active)
                && let Some(slot) = pcb.files.get_mut(fd)
                && let Some(file) = slot.as_mut()
            {
                file.inode = raw;
                return 4;
            }
            -1
        }
        FileOps::File | FileOps::Directory | FileOps::Stdin => -1,
    }
}

/// Whether a captured argument string is returnable: non-empty and
/// NUL-terminated within the first 33 bytes.
fn args_returnable(args: &[u8; TERMINAL_BUF_SIZE]) -> bool {
    args[0] != 0 && args[..=MAX_FILENAME_SIZE].contains(&0)
}

/// The `getargs` syscall: hands the captured argument string back.
fn sys_getargs(buf: *mut u8, nbytes: i32) -> i32 {
    if buf.is_null() || nbytes < 0 {
        return -1;
    }

    let table = PROCESS.lock();
    let Some(active) = table.active() else {
        return -1;
    };
    let Some(pcb) = table.pcb(active) else {
        return -1;
    };

    if !args_returnable(&pcb.args) {
        return -1;
    }

    let n = (nbytes as usize).min(TERMINAL_BUF_SIZE);
    // SAFETY: caller-owned buffer of at least `nbytes` bytes.
    unsafe {
        core::ptr::copy_nonoverlapping(pcb.args.as_ptr(), buf, n);
    }
    0
}

/// The `vidmap` syscall: maps the user-video page and reports its fixed
/// virtual address through `screen_start`.
fn sys_vidmap(screen_start: *mut u32) -> i32 {
    // The pointer itself must live inside the process's user slot.
    if screen_start.is_null() || !mm::user_range_contains(screen_start as usize, 4) {
        return -1;
    }

    let owning_terminal = {
        let mut table = PROCESS.lock();
        let Some(active) = table.active() else {
            return -1;
        };
        let Some(pcb) = table.pcb_mut(active) else {
            return -1;
        };
        pcb.vid_in_use = true;
        pcb.terminal
    };

    // SAFETY: interrupts untouched but single-CPU; the mapping targets
    // identity-mapped video memory chosen by foreground state.
    unsafe {
        mm::map_user_video(terminal::video_target_for(owning_terminal).base());
        *screen_start = mm::USER_VIDEO_ADDR as u32;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Trims the NUL padding off a parsed name.
    fn name_of(name: &[u8; MAX_FILENAME_SIZE]) -> &[u8] {
        let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        &name[..len]
    }

    #[test]
    fn plain_command_has_empty_args() {
        let (name, _, args_len) = parse_command(b"shell");
        assert_eq!(name_of(&name), b"shell");
        assert_eq!(args_len, 0);
    }

    #[test]
    fn leading_and_separating_spaces_are_skipped() {
        let (name, args, args_len) = parse_command(b"   cat   frame0.txt");
        assert_eq!(name_of(&name), b"cat");
        assert_eq!(&args[..args_len], b"frame0.txt");
    }

    #[test]
    fn argument_capture_stops_at_first_space() {
        // Only the first word survives; everything after is dropped.
        let (name, args, args_len) = parse_command(b"grep foo bar");
        assert_eq!(name_of(&name), b"grep");
        assert_eq!(&args[..args_len], b"foo");
    }

    #[test]
    fn name_is_capped_at_32_bytes() {
        let (name, _, _) = parse_command(b"verylargetextwithverylongname.txt arg");
        assert_eq!(&name[..], b"verylargetextwithverylongname.tx");
    }

    #[test]
    fn nul_terminates_parsing() {
        let (name, _, args_len) = parse_command(b"ls\0ignored");
        assert_eq!(name_of(&name), b"ls");
        assert_eq!(args_len, 0);
    }

    #[test]
    fn args_validity_rules() {
        let mut args = [0u8; TERMINAL_BUF_SIZE];
        assert!(!args_returnable(&args), "empty args fail");

        args[..4].copy_from_slice(b"fish");
        assert!(args_returnable(&args));

        // 33 bytes of argument with no terminator in sight.
        let mut long = [b'x'; TERMINAL_BUF_SIZE];
        long[40] = 0;
        assert!(!args_returnable(&long));
    }

    #[test]
    fn exec_magic_matches_elf() {
        assert_eq!(EXEC_MAGIC, [0x7F, b'E', b'L', b'F']);
        assert_eq!(EXEC_ENTRY_OFFSET, 24);
    }
}
