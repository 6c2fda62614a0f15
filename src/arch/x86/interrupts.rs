// src/arch/x86/interrupts.rs
//! Interrupt Descriptor Table (IDT) と割り込みディスパッチ
//!
//! すべてのベクタはトランポリンスタブ経由で `interrupt_dispatch` に
//! 集約されます。例外 (< 32) はプロセス終了パスへ、IRQ (32..48) は
//! デバイスハンドラへ、0x80 はシステムコールへ振り分けます。

use crate::arch::x86::trampoline::IntRegs;
use crate::arch::x86::pic;
use crate::{console_println, debug_println};

/// システムコールのベクタ番号
pub const SYSCALL_VECTOR: u32 = 0x80;

/// Intel 予約の例外ベクタ数
const RESERVED_EXCEPTIONS: u32 = 32;

/// タイマー IRQ ライン
pub const TIMER_LINE: u8 = 0;
/// キーボード IRQ ライン
pub const KEYBOARD_LINE: u8 = 1;
/// RTC IRQ ライン
pub const RTC_LINE: u8 = 8;

#[cfg(target_arch = "x86")]
mod table {
    use super::SYSCALL_VECTOR;
    use crate::arch::x86::gdt;
    use crate::arch::x86::trampoline::*;
    use core::mem;
    use lazy_static::lazy_static;
    use x86::Ring;
    use x86::dtables::DescriptorTablePointer;
    use x86::segmentation::{
        BuildDescriptor, Descriptor, DescriptorBuilder, GateDescriptorBuilder,
    };

    /// 割り込みゲートを作成 (ハンドラ内では IF=0)
    fn interrupt_gate(handler: unsafe extern "C" fn()) -> Descriptor {
        <DescriptorBuilder as GateDescriptorBuilder<u32>>::interrupt_descriptor(
            gdt::KERNEL_CODE,
            handler as usize as u32,
        )
        .present()
        .finish()
    }

    /// トラップゲートを作成 (ハンドラ内でも IF は保持される)
    fn trap_gate(handler: unsafe extern "C" fn(), dpl: Ring) -> Descriptor {
        <DescriptorBuilder as GateDescriptorBuilder<u32>>::trap_gate_descriptor(
            gdt::KERNEL_CODE,
            handler as usize as u32,
        )
        .dpl(dpl)
        .present()
        .finish()
    }

    lazy_static! {
        static ref IDT: [Descriptor; 256] = {
            // 未登録ベクタは「予約済み」例外スタブへ
            let mut idt = [interrupt_gate(int_stub_1); 256];

            // CPU 例外
            idt[0] = interrupt_gate(int_stub_0);
            idt[1] = interrupt_gate(int_stub_1);
            idt[2] = interrupt_gate(int_stub_2);
            idt[3] = interrupt_gate(int_stub_3);
            idt[4] = interrupt_gate(int_stub_4);
            idt[5] = interrupt_gate(int_stub_5);
            idt[6] = interrupt_gate(int_stub_6);
            idt[7] = interrupt_gate(int_stub_7);
            idt[8] = interrupt_gate(int_stub_8);
            idt[9] = interrupt_gate(int_stub_9);
            idt[10] = interrupt_gate(int_stub_10);
            idt[11] = interrupt_gate(int_stub_11);
            idt[12] = interrupt_gate(int_stub_12);
            idt[13] = interrupt_gate(int_stub_13);
            idt[14] = interrupt_gate(int_stub_14);
            idt[15] = interrupt_gate(int_stub_15);
            idt[16] = interrupt_gate(int_stub_16);
            idt[17] = interrupt_gate(int_stub_17);
            idt[18] = interrupt_gate(int_stub_18);
            idt[19] = interrupt_gate(int_stub_19);
            idt[20] = interrupt_gate(int_stub_20);
            idt[30] = interrupt_gate(int_stub_30);

            // ハードウェア IRQ (PIC1: 32-39, PIC2: 40-47)
            idt[32] = interrupt_gate(int_stub_32);
            idt[33] = interrupt_gate(int_stub_33);
            idt[34] = interrupt_gate(int_stub_34);
            idt[40] = interrupt_gate(int_stub_40);

            // システムコール: ユーザーから発行可能なトラップゲート
            idt[SYSCALL_VECTOR as usize] = trap_gate(int_stub_128, Ring::Ring3);

            idt
        };
    }

    /// IDT をロード
    pub fn load() {
        let pointer: DescriptorTablePointer<Descriptor> = DescriptorTablePointer {
            limit: (mem::size_of::<[Descriptor; 256]>() - 1) as u16,
            base: IDT.as_ptr(),
        };

        // SAFETY: IDT は 'static で、スタブシンボルはリンク時に解決される
        unsafe {
            core::arch::asm!("lidt [{0}]", in(reg) &pointer, options(readonly, nostack));
        }
    }
}

/// IDT を初期化
pub fn init_idt() {
    #[cfg(target_arch = "x86")]
    table::load();
}

/// 例外ベクタの名称 (Intel SDM Vol.3 Table 6-1)
const EXCEPTION_NAMES: [&str; 21] = [
    "Divide Error",
    "Reserved",
    "NMI Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment (Reserved)",
    "Invalid TSS",
    "Segment Not Present",
    "Stack Segment Fault",
    "General Protection",
    "Page Fault",
    "Reserved",
    "Floating Point Error",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating Point",
    "Reserved",
];

/// 例外発生時のプロセッサ状態を表示
fn exception_debug(vector: u32, regs: &IntRegs) {
    let name = EXCEPTION_NAMES
        .get(vector as usize)
        .copied()
        .unwrap_or("Unknown (Reserved)");

    console_println!("Exception: {} ({}) with info:", name, vector);
    console_println!();
    console_println!("edi: {:#x}", regs.edi);
    console_println!("esi: {:#x}", regs.esi);
    console_println!("ebp: {:#x}", regs.ebp);
    console_println!("esp: {:#x}", regs.esp);
    console_println!("ebx: {:#x}", regs.ebx);
    console_println!("edx: {:#x}", regs.edx);
    console_println!("ecx: {:#x}", regs.ecx);
    console_println!("eax: {:#x}", regs.eax);
    console_println!("error_code: {:#x}", regs.error_code);
    console_println!("eip: {:#x}", regs.eip);
    console_println!("cs: {:#x}", regs.cs);
    console_println!("eflags: {:#x}", regs.eflags);

    debug_println!(
        "[EXCEPTION] {} ({}) eip={:#x} error={:#x}",
        name,
        vector,
        regs.eip,
        regs.error_code
    );
}

/// 全割り込みの共通入口（トランポリンスタブから呼ばれる）
///
/// スケジューラ切り替え・端末切り替え・プロセス終了の経路では
/// この関数は戻りません。
#[unsafe(no_mangle)]
extern "C" fn interrupt_dispatch(vector: u32, frame: *mut IntRegs) {
    // SAFETY: スタブは自身が積んだフレームの先頭アドレスを渡してくる
    let frame = unsafe { &mut *frame };

    if vector < RESERVED_EXCEPTIONS {
        handle_exception(vector, frame);
    } else if vector == SYSCALL_VECTOR {
        crate::kernel::syscall::dispatch(frame);
    } else if vector < 48 {
        handle_irq((vector - RESERVED_EXCEPTIONS) as u8, frame);
    } else {
        debug_println!("[INT] stray vector {}", vector);
    }
}

/// CPU 例外: ユーザープロセス実行中なら例外ステータスで終了させ、
/// カーネル単独で発生したならシステムを停止する。
fn handle_exception(vector: u32, frame: &mut IntRegs) {
    exception_debug(vector, frame);

    if crate::kernel::process::task_count() > 0 {
        // halt 側が例外ステータス (256) に置き換える
        crate::kernel::syscall::raise_exception_flag();
        crate::kernel::syscall::sys_halt(0xFF);
    }

    console_println!("Exception in kernel with no running tasks; halting.");
    crate::hlt_loop();
}

/// デバイス IRQ のディスパッチ
///
/// スケジューラと端末切り替えは自前で EOI を送ってからコンテキストを
/// 切り替えるため戻ってこない。通常パスの EOI はここで送る。
fn handle_irq(line: u8, frame: &mut IntRegs) {
    match line {
        TIMER_LINE => crate::kernel::scheduler::timer_tick(frame),
        KEYBOARD_LINE => crate::kernel::driver::keyboard::handle_irq(frame),
        RTC_LINE => crate::kernel::driver::rtc::handle_interrupt(),
        _ => debug_println!("[INT] no IRQ handler for line {}", line),
    }

    pic::end_of_interrupt(line);
}
