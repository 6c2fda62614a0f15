// src/kernel/driver/rtc.rs
//! Real-Time Clock (MC146818)
//!
//! ハードウェアは既定の 1024 Hz のままにし、プロセスごとの周波数は
//! 割り込みカウンタの上で仮想化します。ディスクリプタの write が
//! 設定したレートに対し、read は対応する仮想ティックが経過するまで
//! ブロックします。
//!
//! レジスタ C は読み出さないと次の割り込みが届かない点に注意。
//! Reference - <https://wiki.osdev.org/RTC>

use core::sync::atomic::{AtomicU32, Ordering};

use x86::io::{inb, outb};

use crate::arch::x86::interrupts::RTC_LINE;
use crate::arch::x86::pic::PICS;
use crate::arch::{ArchCpu, Cpu};

/// RTC インデックスポート (NMI 無効化ビット込みで使用)
const RTC_PORT: u16 = 0x70;
/// CMOS データポート
const CMOS_PORT: u16 = 0x71;

/// ステータスレジスタ A/B/C (0x80 = NMI disable)
const REG_A: u8 = 0x8A;
const REG_B: u8 = 0x8B;
const REG_C: u8 = 0x8C;

/// ハードウェア割り込みレート (Hz)
pub const HW_FREQUENCY: u32 = 1024;

/// open 時の仮想レート (Hz)
pub const DEFAULT_RATE: u32 = 2;

/// ハードウェア割り込みの通算カウント
static NUM_INTERRUPTS: AtomicU32 = AtomicU32::new(0);

/// レジスタ C を読み捨てて次の割り込みを許可する
fn clear_register_c() {
    // SAFETY: RTC の標準的な割り込み応答シーケンス
    unsafe {
        outb(RTC_PORT, REG_C);
        inb(CMOS_PORT);
    }
}

/// RTC の周期割り込みを有効化し、IRQ8 を許可する
pub fn init() {
    let flags = ArchCpu::save_and_disable_interrupts();

    // SAFETY: レジスタ B のビット 6 (periodic interrupt enable) を立てる
    // 標準手順。NMI はシーケンス中無効化される。
    unsafe {
        outb(RTC_PORT, REG_A);
        let _prev_a = inb(CMOS_PORT);
        outb(RTC_PORT, REG_B);
        let prev_b = inb(CMOS_PORT);
        outb(RTC_PORT, REG_B);
        outb(CMOS_PORT, prev_b | 0x40);
    }

    // ハードウェアは既定の 1024 Hz のまま

    clear_register_c();

    // SAFETY: IDT に RTC ハンドラ登録済みの状態で呼ばれる
    unsafe {
        PICS.lock().unmask_line(RTC_LINE);
    }

    ArchCpu::restore_interrupts(flags);
}

/// IRQ8 ハンドラ本体: カウンタを進め、レジスタ C を読み捨てる
pub fn handle_interrupt() {
    NUM_INTERRUPTS.fetch_add(1, Ordering::Relaxed);
    clear_register_c();
}

/// 通算割り込みカウント
pub fn interrupt_count() -> u32 {
    NUM_INTERRUPTS.load(Ordering::Relaxed)
}

/// 仮想レートとして妥当か (2 の冪で 2..=1024)
#[must_use]
pub fn valid_rate(rate: u32) -> bool {
    rate.is_power_of_two() && (DEFAULT_RATE..=HW_FREQUENCY).contains(&rate)
}

/// 指定レートでの次の仮想ティックまでブロックする
///
/// 割り込みが有効な文脈から呼ばれる前提（でなければカウンタが進まず
/// 永久に待つ）。タイマーによるプリエンプションはスピン中も起こる。
pub fn wait_virtual_tick(rate: u32) {
    let period = HW_FREQUENCY / rate;
    let mark = interrupt_count();

    while interrupt_count().wrapping_sub(mark) < period {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_validation() {
        assert!(valid_rate(2));
        assert!(valid_rate(128));
        assert!(valid_rate(1024));

        assert!(!valid_rate(0));
        assert!(!valid_rate(1)); // below the 2 Hz floor
        assert!(!valid_rate(3));
        assert!(!valid_rate(100));
        assert!(!valid_rate(2048)); // above the hardware rate
    }
}
