// src/arch/x86/gdt.rs

//! Flat-model GDT and the global task state segment.
//!
//! The entire 4 GiB address space is one unbroken segment for each of the
//! four code/data descriptors; protection is done with paging, not
//! segmentation. The single TSS exists only so the CPU can find the ring-0
//! stack (`ss0`/`esp0`) when an interrupt arrives from user mode. Hardware
//! task switching is not used.

use core::mem;

use x86::Ring;
use x86::bits32::task::TaskStateSegment;
use x86::dtables::DescriptorTablePointer;
use x86::segmentation::{
    BuildDescriptor, CodeSegmentType, DataSegmentType, Descriptor, DescriptorBuilder,
    GateDescriptorBuilder, SegmentDescriptorBuilder, SegmentSelector,
};

/// Total number of descriptors in the GDT
const NUM_DESCRIPTORS: usize = 6;

/// Selector for the kernel's code segment
pub const KERNEL_CODE: SegmentSelector = SegmentSelector::new(1, Ring::Ring0);

/// Selector for the kernel's data segment
pub const KERNEL_DATA: SegmentSelector = SegmentSelector::new(2, Ring::Ring0);

/// Selector for the global TSS
pub const GLOBAL_TSS: SegmentSelector = SegmentSelector::new(3, Ring::Ring0);

/// Selector for the user mode code segment
pub const USER_CODE: SegmentSelector = SegmentSelector::new(4, Ring::Ring3);

/// Selector for the user mode data segment
pub const USER_DATA: SegmentSelector = SegmentSelector::new(5, Ring::Ring3);

/// Static storage for the GDT
static mut GDT: [Descriptor; NUM_DESCRIPTORS] = [Descriptor::NULL; NUM_DESCRIPTORS];

/// Static storage for the global TSS
static mut TSS_INSTANCE: TaskStateSegment = TaskStateSegment::new();

/// Installs the ring-0 stack pointer used on privilege transitions.
///
/// The scheduler calls this on every switch so that an interrupt taken in
/// user mode lands on the *current* task's kernel stack (invariant: esp0
/// always names the active PID's stack top).
pub fn set_kernel_stack(esp0: u32) {
    // SAFETY: single CPU; callers run with interrupts disabled, so no
    // privilege transition can read esp0 mid-update.
    unsafe {
        (*(&raw mut TSS_INSTANCE)).esp0 = esp0;
    }
}

/// Initializes the TSS and returns a descriptor for it.
fn build_tss_descriptor() -> Descriptor {
    // SAFETY: runs once during boot, before interrupts are enabled.
    unsafe {
        (*(&raw mut TSS_INSTANCE)).ss0 = KERNEL_DATA.bits();
    }

    let tss_base = (&raw const TSS_INSTANCE) as u64;
    let tss_limit = mem::size_of::<TaskStateSegment>() as u64;

    <DescriptorBuilder as GateDescriptorBuilder<u32>>::tss_descriptor(tss_base, tss_limit, true)
        .dpl(Ring::Ring0)
        .present()
        .avl()
        .finish()
}

/// Performs global initialization of memory segmentation.
///
/// # Safety
///
/// Memory must be identity-mapped when this is called, and it must never be
/// called more than once (the static GDT would be overwritten).
pub unsafe fn init() {
    let kernel_code_desc =
        DescriptorBuilder::code_descriptor(0, u32::MAX, CodeSegmentType::ExecuteRead)
            .present()
            .limit_granularity_4kb()
            .db()
            .finish();

    let kernel_data_desc =
        DescriptorBuilder::data_descriptor(0, u32::MAX, DataSegmentType::ReadWrite)
            .present()
            .limit_granularity_4kb()
            .db()
            .finish();

    let user_code_desc =
        DescriptorBuilder::code_descriptor(0, u32::MAX, CodeSegmentType::ExecuteRead)
            .present()
            .limit_granularity_4kb()
            .db()
            .dpl(Ring::Ring3)
            .finish();

    let user_data_desc =
        DescriptorBuilder::data_descriptor(0, u32::MAX, DataSegmentType::ReadWrite)
            .present()
            .limit_granularity_4kb()
            .db()
            .dpl(Ring::Ring3)
            .finish();

    // SAFETY: boot-time single-threaded access to the static table.
    unsafe {
        let gdt = &mut *(&raw mut GDT);
        gdt[KERNEL_CODE.index() as usize] = kernel_code_desc;
        gdt[KERNEL_DATA.index() as usize] = kernel_data_desc;
        gdt[GLOBAL_TSS.index() as usize] = build_tss_descriptor();
        gdt[USER_CODE.index() as usize] = user_code_desc;
        gdt[USER_DATA.index() as usize] = user_data_desc;

        load(gdt);
    }
}

/// Loads the GDT and reloads every segment register plus the task register.
#[cfg(target_arch = "x86")]
unsafe fn load(gdt: &[Descriptor; NUM_DESCRIPTORS]) {
    let pointer: DescriptorTablePointer<Descriptor> = DescriptorTablePointer {
        limit: (mem::size_of::<[Descriptor; NUM_DESCRIPTORS]>() - 1) as u16,
        base: gdt.as_ptr(),
    };

    // SAFETY: the descriptor table above stays in static storage for the
    // lifetime of the kernel; selectors match its layout.
    unsafe {
        core::arch::asm!("lgdt [{0}]", in(reg) &pointer, options(readonly, nostack));

        // Far return to reload CS with the new kernel code selector.
        core::arch::asm!(
            "pushl {0}; \
            pushl $2f; \
            lretl; \
            2:",
            in(reg) u32::from(KERNEL_CODE.bits()),
            options(att_syntax),
        );

        core::arch::asm!(
            "mov ss, {0:x}",
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov fs, {0:x}",
            "mov gs, {0:x}",
            in(reg) KERNEL_DATA.bits(),
            options(nostack),
        );

        core::arch::asm!("ltr {0:x}", in(reg) GLOBAL_TSS.bits(), options(nostack));
    }
}

#[cfg(not(target_arch = "x86"))]
unsafe fn load(_gdt: &[Descriptor; NUM_DESCRIPTORS]) {}
