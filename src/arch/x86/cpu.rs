// src/arch/x86/cpu.rs
//! CPU 制御命令のラッパー
//!
//! hlt / cli / sti / EFLAGS 退避と、ページング関連の制御レジスタ操作。
//! asm を使う本体は `target_arch = "x86"` のときのみコンパイルされ、
//! ホストビルドでは何もしないスタブになります。

use crate::arch::Cpu;

/// EFLAGS の IF (interrupt enable) ビット
const EFLAGS_IF: u32 = 0x200;

/// x86 向け CPU 実装
pub struct X86Cpu;

#[cfg(target_arch = "x86")]
impl Cpu for X86Cpu {
    #[inline]
    fn halt() {
        // SAFETY: ring 0 での hlt は安全。次の割り込みまで停止するだけ。
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
        }
    }

    #[inline]
    fn disable_interrupts() {
        // SAFETY: 割り込み無効化は ring 0 でのみ実行される
        unsafe {
            core::arch::asm!("cli", options(nomem, nostack));
        }
    }

    #[inline]
    fn enable_interrupts() {
        // SAFETY: 割り込み有効化は ring 0 でのみ実行される
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack));
        }
    }

    #[inline]
    fn are_interrupts_enabled() -> bool {
        Self::read_eflags() & EFLAGS_IF != 0
    }

    #[inline]
    fn save_and_disable_interrupts() -> u32 {
        let flags = Self::read_eflags();
        Self::disable_interrupts();
        flags
    }

    #[inline]
    fn restore_interrupts(flags: u32) {
        // SAFETY: pushfd で取得した値の書き戻し。IF を含め元の状態に戻す。
        unsafe {
            core::arch::asm!("push {0}", "popfd", in(reg) flags, options(nomem));
        }
    }
}

#[cfg(target_arch = "x86")]
impl X86Cpu {
    #[inline]
    fn read_eflags() -> u32 {
        let flags: u32;
        // SAFETY: EFLAGS をスタック経由で読むだけで副作用はない
        unsafe {
            core::arch::asm!("pushfd", "pop {0}", out(reg) flags, options(nomem));
        }
        flags
    }
}

#[cfg(not(target_arch = "x86"))]
impl Cpu for X86Cpu {
    fn halt() {}

    fn disable_interrupts() {}

    fn enable_interrupts() {}

    fn are_interrupts_enabled() -> bool {
        false
    }

    fn save_and_disable_interrupts() -> u32 {
        0
    }

    fn restore_interrupts(_flags: u32) {}
}

/// ページディレクトリの物理アドレスを CR3 にロード
///
/// # Safety
///
/// `pd_phys` は有効なページディレクトリの物理アドレスでなければならず、
/// カーネル領域が identity-map されている必要があります。
#[cfg(target_arch = "x86")]
pub unsafe fn load_page_directory(pd_phys: u32) {
    // SAFETY: 呼び出し元がページディレクトリの有効性を保証している
    unsafe {
        core::arch::asm!("mov cr3, {0}", in(reg) pd_phys, options(nostack));
    }
}

/// ページングを有効化 (CR4.PSE で 4MiB ページ、CR0.PG)
///
/// # Safety
///
/// 先に `load_page_directory` で有効なディレクトリがロードされており、
/// 実行中のコードが identity-map されていること。
#[cfg(target_arch = "x86")]
pub unsafe fn enable_paging() {
    // SAFETY: 呼び出し元がブート時の一度きりの呼び出しを保証している
    unsafe {
        // CR4.PSE: 4MiB ページを許可
        core::arch::asm!(
            "mov {tmp}, cr4",
            "or {tmp}, 0x10",
            "mov cr4, {tmp}",
            tmp = out(reg) _,
            options(nostack),
        );
        // CR0.PG: ページング有効化
        core::arch::asm!(
            "mov {tmp}, cr0",
            "or {tmp}, 0x80000000",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nostack),
        );
    }
}

/// TLB 全体をフラッシュ (CR3 再ロード)
#[cfg(target_arch = "x86")]
pub fn flush_tlb() {
    // SAFETY: CR3 の読み戻しは TLB を無効化するだけで状態を変えない
    unsafe {
        core::arch::asm!(
            "mov {tmp}, cr3",
            "mov cr3, {tmp}",
            tmp = out(reg) _,
            options(nostack),
        );
    }
}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn load_page_directory(_pd_phys: u32) {}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn enable_paging() {}

#[cfg(not(target_arch = "x86"))]
pub fn flush_tlb() {}
