// src/kernel/process/mod.rs
//! Process management module
//!
//! Owns the PID bitmap, the PCB arena and the per-PID kernel stacks, plus
//! the pause/resume machinery every context switch is built from.
//!
//! PCBs are *addressed by PID*: the PCB for PID `p` is the `p`-th arena
//! slot, and `p`'s kernel stack is the `p`-th entry of a static stack
//! array. `execute` fully initializes a PCB before first use; nothing here
//! is zeroed lazily.
//!
//! Process/terminal relationships are stored as PID indices, never as
//! pointers: `parent` and the per-terminal head chains are `Option<Pid>`.

use crate::arch::x86::trampoline::{self, IntRegs};
use crate::arch::x86::{gdt, pic};
use crate::arch::x86::interrupts::KEYBOARD_LINE;
use crate::console_println;
use crate::kernel::core::{KernelResult, Pid, ProcessError, TerminalId};
use crate::kernel::mm;
use crate::kernel::terminal::{self, NUM_TERMINALS, TERMINAL_BUF_SIZE};
use crate::sync::IrqLock;
use crate::vga_buffer::{self, VideoTarget};

/// Highest PID the one-word bitmap can describe.
pub const MAX_PID: usize = 31;

/// Maximum number of live tasks (bounds the PCB/stack arenas).
pub const MAX_TASKS: usize = 6;

/// Descriptor slots per process.
pub const MAX_FILES: usize = 8;

/// Descriptor index bound to terminal input.
pub const STDIN: usize = 0;

/// Descriptor index bound to terminal output.
pub const STDOUT: usize = 1;

/// Per-task kernel stack size (8 KiB).
const KERNEL_STACK_SIZE: usize = 0x2000;

/// Back-end a descriptor dispatches to; selected at `open` from the
/// directory entry's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOps {
    /// Terminal line reader (descriptor 0).
    Stdin,
    /// Terminal writer (descriptor 1).
    Stdout,
    /// Regular file (block-walk reads, writes fail).
    File,
    /// Directory (reads return successive names, writes fail).
    Directory,
    /// Virtualized real-time clock.
    Rtc,
}

/// One open descriptor.
///
/// For RTC descriptors the `inode` field holds the virtual rate and
/// `fpos` the interrupt-count mark, reusing the file fields the way the
/// layout intends.
#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
    pub ops: FileOps,
    pub inode: u32,
    pub fpos: u32,
}

/// Scheduling state relative to `execute`/`halt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable; owns its terminal's head slot when deepest in the chain.
    Executing,
    /// Parked in `execute`, waiting for the child to halt.
    WaitingForChild,
}

/// Process control block.
#[derive(Debug, Clone, Copy)]
pub struct Pcb {
    /// Descriptor table; slots 0/1 are stdin/stdout from birth.
    pub files: [Option<FileDescriptor>; MAX_FILES],
    /// NUL-terminated argument string captured from `execute`.
    pub args: [u8; TERMINAL_BUF_SIZE],
    /// Execute/halt state.
    pub state: TaskState,
    /// Whether the user-video page is mapped for this process.
    pub vid_in_use: bool,
    /// Creator, or `None` for a terminal's root shell.
    pub parent: Option<Pid>,
    /// Owning terminal; immutable for the PCB's lifetime.
    pub terminal: TerminalId,
    /// Saved interrupt frame. `context.esp` doubles as the revival handle
    /// recorded by `execute` while this process waits for a child.
    pub context: IntRegs,
}

impl Pcb {
    const fn vacant() -> Self {
        Self {
            files: [None; MAX_FILES],
            args: [0; TERMINAL_BUF_SIZE],
            state: TaskState::WaitingForChild,
            vid_in_use: false,
            parent: None,
            terminal: 0,
            context: IntRegs::zeroed(),
        }
    }

    /// A fully initialized PCB for a fresh task: stdin/stdout bound,
    /// arguments captured, executing.
    pub fn fresh(terminal: TerminalId, parent: Option<Pid>, args: &[u8]) -> Self {
        let mut pcb = Self::vacant();

        pcb.files[STDIN] = Some(FileDescriptor {
            ops: FileOps::Stdin,
            inode: 0,
            fpos: 0,
        });
        pcb.files[STDOUT] = Some(FileDescriptor {
            ops: FileOps::Stdout,
            inode: 0,
            fpos: 0,
        });

        let n = args.len().min(TERMINAL_BUF_SIZE - 1);
        pcb.args[..n].copy_from_slice(&args[..n]);

        pcb.state = TaskState::Executing;
        pcb.parent = parent;
        pcb.terminal = terminal;
        pcb
    }
}

/// Global process bookkeeping: the bitmap, the arena and the chains.
pub struct ProcessTable {
    pid_map: u32,
    num_tasks: usize,
    active: Option<Pid>,
    heads: [Option<Pid>; NUM_TERMINALS],
    pcbs: [Pcb; MAX_TASKS],
}

impl ProcessTable {
    const fn new() -> Self {
        Self {
            pid_map: 0,
            num_tasks: 0,
            active: None,
            heads: [None; NUM_TERMINALS],
            pcbs: [Pcb::vacant(); MAX_TASKS],
        }
    }

    /// Reserves the lowest free PID, or fails once the arena is full.
    pub fn reserve_pid(&mut self) -> KernelResult<Pid> {
        let free = (0..MAX_TASKS).find(|&i| self.pid_map & (1 << i) == 0);
        let Some(index) = free else {
            return Err(ProcessError::TooManyTasks.into());
        };

        self.pid_map |= 1 << index;
        self.num_tasks += 1;
        Ok(Pid(index))
    }

    /// Releases a PID back to the bitmap.
    pub fn free_pid(&mut self, pid: Pid) -> KernelResult<()> {
        if pid.index() > MAX_PID || self.pid_map & (1 << pid.index()) == 0 {
            return Err(ProcessError::NoSuchPid.into());
        }

        self.pid_map &= !(1 << pid.index());
        self.num_tasks -= 1;
        Ok(())
    }

    /// Whether `pid` is currently reserved.
    #[must_use]
    pub fn in_use(&self, pid: Pid) -> bool {
        pid.index() <= MAX_PID && self.pid_map & (1 << pid.index()) != 0
    }

    /// Live-task count; always the popcount of the bitmap.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.num_tasks
    }

    /// The PCB for a live PID.
    pub fn pcb(&self, pid: Pid) -> Option<&Pcb> {
        if !self.in_use(pid) {
            return None;
        }
        self.pcbs.get(pid.index())
    }

    /// Mutable PCB access for a live PID.
    pub fn pcb_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        if !self.in_use(pid) {
            return None;
        }
        self.pcbs.get_mut(pid.index())
    }

    /// Installs a freshly built PCB into `pid`'s slot.
    pub fn install_pcb(&mut self, pid: Pid, pcb: Pcb) {
        self.pcbs[pid.index()] = pcb;
    }

    /// Currently running PID.
    #[must_use]
    pub fn active(&self) -> Option<Pid> {
        self.active
    }

    /// Marks `pid` (or nothing) as running.
    pub fn set_active(&mut self, pid: Option<Pid>) {
        self.active = pid;
    }

    /// The deepest process in `terminal`'s chain.
    #[must_use]
    pub fn head(&self, terminal: TerminalId) -> Option<Pid> {
        self.heads.get(terminal).copied().flatten()
    }

    /// Replaces `terminal`'s head (push on execute, pop on halt).
    pub fn set_head(&mut self, terminal: TerminalId, pid: Option<Pid>) {
        if let Some(slot) = self.heads.get_mut(terminal) {
            *slot = pid;
        }
    }

    /// Round-robin choice: the first live EXECUTING PID strictly after
    /// `current` in bitmap order, wrapping, or `None` if no other exists.
    #[must_use]
    pub fn next_running_after(&self, current: Pid) -> Option<Pid> {
        let total = MAX_PID + 1;
        let mut index = (current.index() + 1) % total;

        while index != current.index() {
            let pid = Pid(index);
            if self.in_use(pid)
                && self
                    .pcbs
                    .get(index)
                    .is_some_and(|p| p.state == TaskState::Executing)
            {
                return Some(pid);
            }
            index = (index + 1) % total;
        }

        None
    }
}

/// Global process table. Outermost in the kernel lock order; never held
/// across a blocking operation or a context switch.
pub static PROCESS: IrqLock<ProcessTable> = IrqLock::new(ProcessTable::new());

/// Per-task kernel stacks, adjoining the PCB arena.
#[repr(C, align(4096))]
struct KernelStack([u8; KERNEL_STACK_SIZE]);

static mut KERNEL_STACKS: [KernelStack; MAX_TASKS] =
    [const { KernelStack([0; KERNEL_STACK_SIZE]) }; MAX_TASKS];

/// Top of `pid`'s kernel stack (grows down).
#[must_use]
pub fn kernel_stack_top(pid: Pid) -> usize {
    let base = (&raw const KERNEL_STACKS) as usize;
    base + (pid.index() + 1) * KERNEL_STACK_SIZE
}

/// Number of live tasks.
pub fn task_count() -> usize {
    PROCESS.lock().task_count()
}

/// Terminal owning the currently running process, if any.
pub fn active_terminal() -> Option<TerminalId> {
    let table = PROCESS.lock();
    let active = table.active()?;
    table.pcb(active).map(|pcb| pcb.terminal)
}

/// Saves the interrupted context of the running process and detaches its
/// address-space windows. The counterpart of [`resume_task`].
///
/// No-op when nothing is active (early boot).
pub fn pause_task(frame: &IntRegs) {
    let mut table = PROCESS.lock();
    let Some(active) = table.active() else {
        return;
    };
    let Some(pcb) = table.pcb_mut(active) else {
        return;
    };

    pcb.context = *frame;
    let owned_terminal = pcb.terminal;
    let vid_in_use = pcb.vid_in_use;
    drop(table);

    terminal::save_cursor(owned_terminal);

    // SAFETY: the process is suspended; nothing dereferences its user
    // windows until a resume maps them again.
    unsafe {
        mm::unmap_task_slot();
        if vid_in_use {
            mm::unmap_user_video();
        }
    }
}

/// Reattaches `pid`'s execution environment and returns the anchor of its
/// saved frame: ring-0 stack in the TSS, user slot and optional video
/// window mapped, writer pointed at the right video page with the saved
/// cursor, `active` updated.
///
/// Callers must run with interrupts disabled and then jump through the
/// anchor themselves (`enter_frame`, or `suspend_into` for `execute`).
pub fn prepare_resume(pid: Pid) -> KernelResult<usize> {
    let table = PROCESS.lock();
    let Some(pcb) = table.pcb(pid) else {
        return Err(ProcessError::NoSuchPid.into());
    };
    if pcb.state != TaskState::Executing {
        return Err(ProcessError::NoSuchPid.into());
    }

    let owned_terminal = pcb.terminal;
    let vid_in_use = pcb.vid_in_use;
    let anchor = pcb.context.esp as usize;
    drop(table);

    gdt::set_kernel_stack(kernel_stack_top(pid) as u32);

    // SAFETY: single CPU with interrupts disabled; the previous task's
    // windows were unmapped when it was paused.
    unsafe {
        mm::map_task_slot(pid.index());
        if vid_in_use {
            mm::map_user_video(terminal::video_target_for(owned_terminal).base());
        }
    }

    // Library prints must land on this process's terminal.
    let cursor = terminal::saved_cursor(owned_terminal);
    vga_buffer::with_writer(|w| {
        w.retarget(terminal::video_target_for(owned_terminal));
        w.set_cursor(cursor.0, cursor.1);
    });

    PROCESS.lock().set_active(Some(pid));

    Ok(anchor)
}

/// Resumes `pid` at its saved frame. Does not return on success.
pub fn resume_task(pid: Pid) -> KernelResult<()> {
    let anchor = prepare_resume(pid)?;

    // SAFETY: prepare_resume just installed pid's stack, address space and
    // screen state; the anchor names its deposited frame.
    unsafe { trampoline::enter_frame(anchor) }
}

/// Switches keyboard focus and video to `target` and resumes its head
/// process. Called from the keyboard IRQ; returns only when the switch is
/// refused (already foreground, or no head to run).
pub fn focus_terminal(target: TerminalId, frame: &IntRegs) {
    if target >= NUM_TERMINALS {
        return;
    }

    let previous = terminal::foreground();
    if target == previous {
        return;
    }

    // Boot spawns a shell per terminal, so a vacant head means the switch
    // target is not usable yet; refuse rather than trusting the chain.
    let Some(head) = PROCESS.lock().head(target) else {
        return;
    };

    pause_task(frame);

    // Swap video: snapshot the outgoing screen, then expose the incoming
    // backing page. No partial state is visible; interrupts stay off.
    // SAFETY: both pages are identity-mapped video memory.
    unsafe {
        vga_buffer::copy_page(
            VideoTarget::Vga.base(),
            VideoTarget::Backing(previous).base(),
        );
    }
    terminal::set_foreground(target);
    // SAFETY: as above.
    unsafe {
        vga_buffer::copy_page(VideoTarget::Backing(target).base(), VideoTarget::Vga.base());
    }

    pic::end_of_interrupt(KEYBOARD_LINE);

    if resume_task(head).is_err() {
        console_println!("Task resumption failed for pid: {}", head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_allocate_lowest_first() {
        let mut table = ProcessTable::new();

        for expected in 0..MAX_TASKS {
            let pid = table.reserve_pid().unwrap();
            assert_eq!(pid.index(), expected);
        }
        assert!(table.reserve_pid().is_err());
        assert_eq!(table.task_count(), MAX_TASKS);
    }

    #[test]
    fn freed_pids_are_reused() {
        let mut table = ProcessTable::new();
        let a = table.reserve_pid().unwrap();
        let b = table.reserve_pid().unwrap();

        table.free_pid(a).unwrap();
        assert!(!table.in_use(a));
        assert!(table.in_use(b));

        // The lowest free index comes back first.
        assert_eq!(table.reserve_pid().unwrap(), a);
    }

    #[test]
    fn task_count_tracks_bitmap_population() {
        let mut table = ProcessTable::new();
        let a = table.reserve_pid().unwrap();
        let b = table.reserve_pid().unwrap();
        assert_eq!(table.task_count(), table.pid_map.count_ones() as usize);

        table.free_pid(a).unwrap();
        assert_eq!(table.task_count(), 1);
        assert_eq!(table.task_count(), table.pid_map.count_ones() as usize);

        table.free_pid(b).unwrap();
        assert!(table.free_pid(b).is_err(), "double free must fail");
        assert_eq!(table.task_count(), 0);
    }

    #[test]
    fn round_robin_skips_waiting_processes() {
        let mut table = ProcessTable::new();
        let a = table.reserve_pid().unwrap();
        let b = table.reserve_pid().unwrap();
        let c = table.reserve_pid().unwrap();

        table.install_pcb(a, Pcb::fresh(0, None, b""));
        table.install_pcb(b, Pcb::fresh(1, None, b""));
        table.install_pcb(c, Pcb::fresh(2, None, b""));

        // All executing: plain rotation.
        assert_eq!(table.next_running_after(a), Some(b));
        assert_eq!(table.next_running_after(b), Some(c));
        assert_eq!(table.next_running_after(c), Some(a));

        // b parks in execute: rotation from a jumps to c.
        table.pcb_mut(b).unwrap().state = TaskState::WaitingForChild;
        assert_eq!(table.next_running_after(a), Some(c));
        assert_eq!(table.next_running_after(c), Some(a));
    }

    #[test]
    fn rotation_visits_every_executing_pid_once() {
        let mut table = ProcessTable::new();
        let mut pids = [Pid(0); 4];
        for slot in pids.iter_mut() {
            let pid = table.reserve_pid().unwrap();
            table.install_pcb(pid, Pcb::fresh(0, None, b""));
            *slot = pid;
        }

        // One full rotation starting after pids[0] sees each of the other
        // live PIDs exactly once, then wraps back.
        let mut seen = [false; MAX_TASKS];
        let mut current = pids[0];
        for _ in 0..pids.len() - 1 {
            let next = table.next_running_after(current).unwrap();
            assert!(!seen[next.index()], "pid visited twice in one rotation");
            seen[next.index()] = true;
            current = next;
        }
        assert_eq!(table.next_running_after(current), Some(pids[0]));
    }

    #[test]
    fn lone_process_has_no_successor() {
        let mut table = ProcessTable::new();
        let a = table.reserve_pid().unwrap();
        table.install_pcb(a, Pcb::fresh(0, None, b""));

        assert_eq!(table.next_running_after(a), None);
    }

    #[test]
    fn fresh_pcbs_have_std_descriptors_bound() {
        let pcb = Pcb::fresh(1, Some(Pid(0)), b"arg");

        let stdin = pcb.files[STDIN].unwrap();
        assert_eq!(stdin.ops, FileOps::Stdin);
        let stdout = pcb.files[STDOUT].unwrap();
        assert_eq!(stdout.ops, FileOps::Stdout);
        assert!(pcb.files[2..].iter().all(Option::is_none));

        assert_eq!(pcb.state, TaskState::Executing);
        assert_eq!(pcb.terminal, 1);
        assert_eq!(pcb.parent, Some(Pid(0)));
        assert_eq!(&pcb.args[..4], b"arg\0");
    }

    #[test]
    fn heads_track_per_terminal_chains() {
        let mut table = ProcessTable::new();
        assert_eq!(table.head(0), None);

        table.set_head(0, Some(Pid(3)));
        table.set_head(2, Some(Pid(5)));
        assert_eq!(table.head(0), Some(Pid(3)));
        assert_eq!(table.head(1), None);
        assert_eq!(table.head(2), Some(Pid(5)));

        table.set_head(0, None);
        assert_eq!(table.head(0), None);
    }
}
