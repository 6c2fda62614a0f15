// src/kernel/mm/mod.rs

//! Address-space management.
//!
//! One global page directory serves every process. Three regions matter:
//!
//! * the low 4 MiB, mapped through a 4 KiB page table that exposes the VGA
//!   buffer and the three terminal backing pages;
//! * the kernel's own 4 MiB large page at 4 MiB, identity-mapped and global;
//! * two per-process windows that are rewritten on every context switch:
//!   the 4 MiB user slot at 128 MiB (physical frame chosen by PID) and the
//!   optional 4 KiB user-video page.
//!
//! Every mutation ends with a TLB flush; entries for the process windows
//! are simply rewritten in place, exploiting the fact that only one
//! process is ever visible at a time on a single CPU.

use x86::bits32::paging::{PAddr, PD, PDEntry, PDFlags, PT, PTEntry, PTFlags};

use crate::arch::x86::cpu;
use crate::kernel::terminal::NUM_TERMINALS;
use crate::vga_buffer::{VGA_BUFFER_ADDR, VIDEO_PAGE_SIZE};

/// Start of the kernel's 4 MiB page (physical == virtual).
pub const KERNEL_BASE: usize = 0x0040_0000;

/// Page-directory slot of the user 4 MiB slot (128 MiB virtual).
const USER_PDE: usize = 32;

/// Page-directory slot of the user-visible video page.
const USER_VIDEO_PDE: usize = 33;

/// Bytes covered by one page-directory entry.
const PDE_SPAN: usize = 0x0040_0000;

/// Virtual base of the user slot.
pub const USER_PAGE_START: usize = USER_PDE * PDE_SPAN; // 0x0800_0000

/// Virtual address user images are loaded at.
pub const USER_LOAD_ADDR: usize = 0x0804_8000;

/// Initial user stack pointer (top of the user slot).
pub const USER_STACK_TOP: u32 = (USER_PAGE_START + PDE_SPAN) as u32; // 0x0840_0000

/// Virtual address handed to user programs by `vidmap`.
pub const USER_VIDEO_ADDR: usize = USER_VIDEO_PDE * PDE_SPAN; // 0x0840_0000

/// Physical frame backing PID 0's user slot; PID n gets the next stride.
const USER_PHYS_BASE: usize = 0x0080_0000;
const USER_PHYS_STRIDE: usize = PDE_SPAN;

/// 4 KiB-aligned storage for the page directory / page tables. The x86
/// entry types are plain `u32` arrays; hardware additionally requires page
/// alignment, which `repr(align)` provides without linker-script support.
#[repr(C, align(4096))]
struct DirStorage(PD);

#[repr(C, align(4096))]
struct TableStorage(PT);

static mut PAGE_DIR: DirStorage = DirStorage([PDEntry(0); 1024]);
static mut LOW_TABLE: TableStorage = TableStorage([PTEntry(0); 1024]);
static mut VIDMAP_TABLE: TableStorage = TableStorage([PTEntry(0); 1024]);

fn kernel_table_flags() -> PTFlags {
    PTFlags::P | PTFlags::RW
}

/// Initializes the page directory, enables 4 MiB pages and turns paging on.
///
/// # Safety
///
/// Must run exactly once during boot, with the kernel executing from the
/// identity-mapped 4-8 MiB region described by the mapping it installs.
pub unsafe fn init() {
    // SAFETY: boot is single-threaded; nothing else touches the tables yet.
    let dir = unsafe { &mut (*(&raw mut PAGE_DIR)).0 };
    let low = unsafe { &mut (*(&raw mut LOW_TABLE)).0 };

    // Video memory, plus one backing page per terminal right above it.
    for page in 0..=NUM_TERMINALS {
        let phys = VGA_BUFFER_ADDR + page * VIDEO_PAGE_SIZE;
        low[phys >> 12] = PTEntry::new(PAddr::from(phys as u32), kernel_table_flags());
    }

    // 0-4 MiB through the low table. Cache-disable matches the fact that
    // the only present mappings are device memory.
    let low_phys = (&raw const LOW_TABLE) as usize as u32;
    dir[0] = PDEntry::new(PAddr::from(low_phys), PDFlags::P | PDFlags::RW | PDFlags::PCD);

    // Kernel image: one global 4 MiB page, identity-mapped.
    dir[1] = PDEntry::new(
        PAddr::from(KERNEL_BASE as u32),
        PDFlags::P | PDFlags::RW | PDFlags::PS | PDFlags::G | PDFlags::PCD,
    );

    let dir_phys = (&raw const PAGE_DIR) as usize as u32;
    // SAFETY: the directory above identity-maps the executing kernel.
    unsafe {
        cpu::load_page_directory(dir_phys);
        cpu::enable_paging();
    }
}

/// Points the user slot at the physical frame belonging to `pid`.
///
/// # Safety
///
/// Caller must ensure no references into the previously mapped slot
/// survive this call (the virtual range is rebacked wholesale).
pub unsafe fn map_task_slot(pid: usize) {
    let frame = USER_PHYS_BASE + pid * USER_PHYS_STRIDE;

    // SAFETY: single CPU, callers run with interrupts disabled.
    let dir = unsafe { &mut (*(&raw mut PAGE_DIR)).0 };
    dir[USER_PDE] = PDEntry::new(
        PAddr::from(frame as u32),
        PDFlags::P | PDFlags::RW | PDFlags::US | PDFlags::PS | PDFlags::PCD,
    );

    cpu::flush_tlb();
}

/// Marks the user slot not-present.
///
/// # Safety
///
/// As for [`map_task_slot`]: no outstanding references into the slot.
pub unsafe fn unmap_task_slot() {
    // SAFETY: single CPU, callers run with interrupts disabled.
    let dir = unsafe { &mut (*(&raw mut PAGE_DIR)).0 };
    dir[USER_PDE] = PDEntry(0);

    cpu::flush_tlb();
}

/// Maps the user-visible video page at `USER_VIDEO_ADDR`.
///
/// `video_base` selects the physical destination: the VGA buffer when the
/// owning terminal is foreground, its backing page otherwise.
///
/// # Safety
///
/// `video_base` must be one of the identity-mapped video pages.
pub unsafe fn map_user_video(video_base: usize) {
    // SAFETY: single CPU, callers run with interrupts disabled.
    let dir = unsafe { &mut (*(&raw mut PAGE_DIR)).0 };
    let table = unsafe { &mut (*(&raw mut VIDMAP_TABLE)).0 };

    table[0] = PTEntry::new(
        PAddr::from(video_base as u32),
        PTFlags::P | PTFlags::RW | PTFlags::US,
    );

    let table_phys = (&raw const VIDMAP_TABLE) as usize as u32;
    dir[USER_VIDEO_PDE] = PDEntry::new(
        PAddr::from(table_phys),
        PDFlags::P | PDFlags::RW | PDFlags::US | PDFlags::PCD,
    );

    cpu::flush_tlb();
}

/// Tears the user-video mapping down.
pub fn unmap_user_video() {
    // SAFETY: single CPU, callers run with interrupts disabled; clearing
    // a mapping cannot create aliasing.
    let dir = unsafe { &mut (*(&raw mut PAGE_DIR)).0 };
    let table = unsafe { &mut (*(&raw mut VIDMAP_TABLE)).0 };

    dir[USER_VIDEO_PDE] = PDEntry(0);
    table[0] = PTEntry(0);

    cpu::flush_tlb();
}

/// Whether `addr..addr+len` lies inside the user slot.
#[must_use]
pub fn user_range_contains(addr: usize, len: usize) -> bool {
    let Some(end) = addr.checked_add(len) else {
        return false;
    };
    addr >= USER_PAGE_START && end <= USER_PAGE_START + PDE_SPAN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants() {
        assert_eq!(USER_PAGE_START, 0x0800_0000);
        assert_eq!(USER_LOAD_ADDR, 0x0804_8000);
        assert_eq!(USER_STACK_TOP, 0x0840_0000);
        assert_eq!(USER_VIDEO_ADDR, 0x0840_0000);
    }

    #[test]
    fn user_range_checks() {
        assert!(user_range_contains(USER_PAGE_START, 4));
        assert!(user_range_contains(USER_LOAD_ADDR, 0x1000));
        assert!(!user_range_contains(USER_PAGE_START - 4, 4));
        assert!(!user_range_contains(USER_PAGE_START + PDE_SPAN - 2, 4));
        assert!(!user_range_contains(usize::MAX - 2, 8));
    }
}
