// src/main.rs
//! Boot binary: multiboot header, early entry and the boot sequence.

#![cfg_attr(target_arch = "x86", no_std)]
#![cfg_attr(target_arch = "x86", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_arch = "x86")]
mod boot {
    use core::panic::PanicInfo;

    use trio_os::arch::x86::pic::PICS;
    use trio_os::arch::x86::{init_gdt, init_idt};
    use trio_os::kernel::driver::{keyboard, pit, rtc};
    use trio_os::kernel::{fs, mm, syscall, terminal};
    use trio_os::{console_println, debug_println, hlt_loop, println};

    /// Magic number for Multiboot V1 headers.
    const HEADER_MAGIC: u32 = 0x1BAD_B002;

    /// Magic value a multiboot loader leaves in EAX.
    const LOADER_MAGIC: u32 = 0x2BAD_B002;

    /// Header flags: page-align modules, supply memory info.
    const HEADER_FLAGS: u32 = 0x3;

    /// Minimal Multiboot V1 header structure.
    #[repr(C)]
    struct MultibootV1Header {
        magic: u32,
        flags: u32,
        checksum: u32,
    }

    impl MultibootV1Header {
        /// Constructs a header with a checksum matching its flags.
        const fn new(flags: u32) -> Self {
            let mut checksum: u32 = 0;
            checksum = checksum.wrapping_sub(HEADER_MAGIC);
            checksum = checksum.wrapping_sub(flags);

            Self {
                magic: HEADER_MAGIC,
                flags,
                checksum,
            }
        }
    }

    /// Multiboot V1 header, allowing this kernel to be booted directly by
    /// QEMU or GRUB.
    #[unsafe(link_section = ".multiboot")]
    #[used]
    static MULTIBOOT_HEADER: MultibootV1Header = MultibootV1Header::new(HEADER_FLAGS);

    /// The subset of the multiboot information structure we consume.
    #[repr(C)]
    struct MultibootInfo {
        flags: u32,
        mem_lower: u32,
        mem_upper: u32,
        boot_device: u32,
        cmdline: u32,
        mods_count: u32,
        mods_addr: u32,
    }

    /// One boot-module record.
    #[repr(C)]
    struct MultibootModule {
        start: u32,
        end: u32,
        string: u32,
        reserved: u32,
    }

    const BOOT_STACK_SIZE: usize = 0x4000;

    /// Stack for the boot path; retired once the first shell runs on its
    /// own per-PID kernel stack.
    #[unsafe(no_mangle)]
    static mut BOOT_STACK: [u8; BOOT_STACK_SIZE] = [0; BOOT_STACK_SIZE];

    core::arch::global_asm!(
        ".global _start",
        "_start:",
        "    lea esp, [{stack} + {stack_size}]",
        "    push ebx", // multiboot info pointer
        "    push eax", // loader magic
        "    call kernel_main",
        "2:",
        "    hlt",
        "    jmp 2b",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
    );

    /// Boot sequence: descriptor tables, paging, devices, filesystem,
    /// then the three initial shells.
    #[unsafe(no_mangle)]
    extern "C" fn kernel_main(magic: u32, info: *const MultibootInfo) -> ! {
        trio_os::serial::init();
        debug_println!("[BOOT] trio_os starting");

        if magic != LOADER_MAGIC {
            debug_println!("[BOOT] bad multiboot magic: {:#x}", magic);
            hlt_loop();
        }

        // The info structure and module list sit in loader memory that the
        // kernel page tables do not map; pull the module range out before
        // paging comes up. (The module data itself is page-aligned after
        // the kernel image, inside the kernel's 4 MiB page.)
        //
        // SAFETY: a multiboot loader left a valid info structure, and
        // paging is still disabled at this point.
        let (module_start, module_end) = unsafe {
            let info = &*info;
            if info.mods_count == 0 {
                debug_println!("[BOOT] no boot module; cannot mount filesystem");
                hlt_loop();
            }
            let module = &*(info.mods_addr as *const MultibootModule);
            (module.start as usize, module.end as usize)
        };

        debug_println!(
            "[BOOT] filesystem module at {:#x}..{:#x}",
            module_start,
            module_end
        );

        // SAFETY: boot is single-threaded; each init runs exactly once,
        // in dependency order.
        unsafe {
            init_gdt();
            init_idt();
            mm::init();
            PICS.lock().initialize();
        }

        terminal::init();
        println!("trio_os");

        keyboard::init();
        rtc::init();
        if let Err(err) = pit::init() {
            println!("PIT init failed: {}", err);
            hlt_loop();
        }

        // SAFETY: the module range stays reserved for the kernel's
        // lifetime and lies inside the identity-mapped kernel page.
        if let Err(err) = unsafe { fs::init(module_start, module_end) } {
            println!("filesystem mount failed: {}", err);
            hlt_loop();
        }

        if let Err(err) = syscall::spawn_initial_shells() {
            println!("failed to start shells: {}", err);
        }

        console_println!("no runnable shell; system idle");
        hlt_loop();
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        debug_println!("[PANIC] {}", info);
        console_println!("KERNEL PANIC: {}", info);
        hlt_loop();
    }
}

/// The kernel only makes sense on the 32-bit target; a host build gets a
/// stub so `cargo build`/`cargo test` work without the custom target.
#[cfg(not(target_arch = "x86"))]
fn main() {
    eprintln!("trio_os is a kernel image; build it with --target i686-trio_os.json");
}
