// src/lib.rs
//! trio_os - 3 端末構成の x86 プロテクトモードカーネル
//!
//! 割り込みディスパッチとページングを初期化し、PS/2 キーボード・PIT・
//! RTC を駆動し、3 つの仮想テキスト端末とラウンドロビンスケジューラの
//! 上で最大 6 個のユーザープロセスを動かします。プロセスはブート
//! モジュールから読み込む読み取り専用ファイルシステムの実行イメージで、
//! int 0x80 のシステムコール ABI でカーネルと対話します。

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arch;
pub mod kernel;
pub mod serial;
pub mod sync;
pub mod vga_buffer;

use crate::arch::{ArchCpu, Cpu};

/// console_print! マクロ - ユーザー向け画面出力
///
/// グローバルライターの現在のターゲット（フォアグラウンド画面または
/// バッキングページ）へ書き込みます。デバッグ出力には `debug_print!`
/// を使用してください。
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {{
        $crate::vga_buffer::write_fmt(format_args!($($arg)*));
    }};
}

/// console_println! マクロ - ユーザー向け画面出力（改行付き）
#[macro_export]
macro_rules! console_println {
    () => ($crate::console_print!("\n"));
    ($($arg:tt)*) => ($crate::console_print!("{}\n", format_args!($($arg)*)));
}

/// debug_print! マクロ - デバッグ専用（シリアルポートのみ）
///
/// 画面には表示されず、COM1 のみに出力されます。
#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => {{
        $crate::serial::write_fmt(format_args!($($arg)*));
    }};
}

/// debug_println! マクロ - デバッグ専用（改行付き）
#[macro_export]
macro_rules! debug_println {
    () => ($crate::debug_print!("\n"));
    ($($arg:tt)*) => ($crate::debug_print!("{}\n", format_args!($($arg)*)));
}

/// println! マクロ - コンソール出力とデバッグ出力の両方
///
/// ブートやパニックなど、画面とシリアルの両方に残したいメッセージ用。
#[macro_export]
macro_rules! println {
    () => {{
        $crate::console_print!("\n");
        $crate::debug_print!("\n");
    }};
    ($($arg:tt)*) => {{
        $crate::console_print!("{}\n", format_args!($($arg)*));
        $crate::debug_print!("{}\n", format_args!($($arg)*));
    }};
}

/// print! マクロ - コンソール出力とデバッグ出力の両方
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        $crate::console_print!($($arg)*);
        $crate::debug_print!($($arg)*);
    }};
}

/// Halt loop
#[inline]
pub fn hlt_loop() -> ! {
    loop {
        ArchCpu::halt();
    }
}
