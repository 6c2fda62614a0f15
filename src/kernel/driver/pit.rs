// src/kernel/driver/pit.rs
//! Programmable Interval Timer (PIT)
//!
//! システムタイマーの設定を行います。チャンネル 0 の矩形波モードで
//! スケジューラのタイムスライスを刻みます。

use spin::Mutex;
use x86::io::outb;

use crate::arch::x86::interrupts::TIMER_LINE;
use crate::arch::x86::pic::PICS;
use crate::kernel::core::{DeviceError, KernelResult};

/// PIT のベース周波数 (Hz)
const PIT_FREQUENCY: u32 = 1_193_182;

/// チャンネル 0 データポート
const CHANNEL0_DATA: u16 = 0x40;
/// コマンドポート
const COMMAND_PORT: u16 = 0x43;

/// スケジューラのティックレート (Hz)
pub const SCHEDULER_HZ: u32 = 100;

/// Programmable Interval Timer
pub struct ProgrammableIntervalTimer;

impl ProgrammableIntervalTimer {
    const fn new() -> Self {
        Self
    }

    /// 周波数を設定
    pub fn set_frequency(&mut self, freq: u32) -> KernelResult<()> {
        if freq == 0 || freq > PIT_FREQUENCY {
            return Err(DeviceError::BadRate.into());
        }

        let divisor = PIT_FREQUENCY / freq;
        let divisor = if divisor > 65535 { 65535 } else { divisor as u16 };

        // SAFETY: PITのコマンドポート(0x43)とチャネル0データポート(0x40)への書き込みは
        // PC/AT互換機の標準タイマー設定手順。モード3（矩形波）での設定。
        unsafe {
            // モード設定: Channel 0, Access lo/hi, Mode 3 (Square Wave), Binary
            // 00 11 011 0 = 0x36
            outb(COMMAND_PORT, 0x36);

            // Divisor を送信 (Low byte, then High byte)
            outb(CHANNEL0_DATA, (divisor & 0xFF) as u8);
            outb(CHANNEL0_DATA, (divisor >> 8) as u8);
        }

        Ok(())
    }
}

/// グローバル PIT インスタンス
pub static PIT: Mutex<ProgrammableIntervalTimer> = Mutex::new(ProgrammableIntervalTimer::new());

/// PIT をスケジューラレートで起動し、IRQ0 を許可する
pub fn init() -> KernelResult<()> {
    PIT.lock().set_frequency(SCHEDULER_HZ)?;

    // SAFETY: IDT にタイマーハンドラ登録済みの状態で呼ばれる
    unsafe {
        PICS.lock().unmask_line(TIMER_LINE);
    }

    Ok(())
}
