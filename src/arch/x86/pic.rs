// src/arch/x86/pic.rs
//! Programmable Interrupt Controller (8259 PIC)
//!
//! 割り込みコントローラの初期化と管理を行います。
//! 標準的なデュアルPIC構成（Master/Slave）をサポートします。
//! ハンドラ側は IRQ ライン番号 (0-15) で操作し、ベクタ番号への変換は
//! IDT 側 (`interrupts.rs`) が行います。

use spin::Mutex;
use x86::io::{inb, outb};

/// Master PIC のコマンドポート
const PIC1_COMMAND: u16 = 0x20;
/// Master PIC のデータポート
const PIC1_DATA: u16 = 0x21;
/// Slave PIC のコマンドポート
const PIC2_COMMAND: u16 = 0xA0;
/// Slave PIC のデータポート
const PIC2_DATA: u16 = 0xA1;

/// 初期化コマンド (ICW1)
const ICW1_INIT: u8 = 0x11;
/// 8086/88 モード (ICW4)
const ICW4_8086: u8 = 0x01;
/// End of Interrupt (EOI) コマンド
const PIC_EOI: u8 = 0x20;

/// Master PIC のベクタオフセット (IRQ0 -> 32)
pub const PIC1_OFFSET: u8 = 0x20;
/// Slave PIC のベクタオフセット (IRQ8 -> 40)
pub const PIC2_OFFSET: u8 = 0x28;

/// Slave がカスケード接続されている Master 側の IRQ ライン
const CASCADE_LINE: u8 = 2;

/// チェーン接続された PIC
pub struct ChainedPics {
    initialized: bool,
}

impl ChainedPics {
    const fn new() -> Self {
        Self { initialized: false }
    }

    /// PIC を初期化し、全ラインをマスクする
    ///
    /// # Safety
    ///
    /// 一度だけ、他の PIC 操作より先に呼ばれる必要があります。
    pub unsafe fn initialize(&mut self) {
        // SAFETY: 呼び出し元がPIC初期化のタイミングを保証している
        unsafe {
            let wait = || outb(0x80, 0);

            // ICW1: 初期化開始
            outb(PIC1_COMMAND, ICW1_INIT);
            wait();
            outb(PIC2_COMMAND, ICW1_INIT);
            wait();

            // ICW2: ベクタオフセット設定
            outb(PIC1_DATA, PIC1_OFFSET);
            wait();
            outb(PIC2_DATA, PIC2_OFFSET);
            wait();

            // ICW3: Master/Slave 接続設定
            outb(PIC1_DATA, 1 << CASCADE_LINE); // Master: Slave は IRQ2 に接続
            wait();
            outb(PIC2_DATA, CASCADE_LINE); // Slave: 自身のカスケード ID
            wait();

            // ICW4: モード設定 (8086)
            outb(PIC1_DATA, ICW4_8086);
            wait();
            outb(PIC2_DATA, ICW4_8086);
            wait();

            // 初期状態では全ラインをマスク。必要なデバイスだけが
            // unmask_line で個別に解除する（ハンドラ未登録の割り込みで
            // ダブルフォールトになるのを防ぐ）。
            outb(PIC1_DATA, 0xff);
            outb(PIC2_DATA, 0xff);
        }

        self.initialized = true;
    }

    /// 指定された IRQ ラインのマスクを解除
    ///
    /// ライン 8 以上を解除するときは Master 側のカスケードラインも
    /// あわせて解除します。
    ///
    /// # Safety
    ///
    /// PIC が初期化済みで、対応するハンドラが IDT に登録されていること。
    pub unsafe fn unmask_line(&mut self, line: u8) {
        debug_assert!(self.initialized, "PIC not initialized");
        debug_assert!(line < 16, "IRQ line out of range: {}", line);

        // SAFETY: 呼び出し元がPICマスク操作の安全性を保証している
        unsafe {
            if line < 8 {
                let mask = inb(PIC1_DATA);
                outb(PIC1_DATA, mask & !(1 << line));
            } else {
                let mask = inb(PIC2_DATA);
                outb(PIC2_DATA, mask & !(1 << (line - 8)));

                // カスケードが閉じていると Slave の割り込みは届かない
                let mask = inb(PIC1_DATA);
                outb(PIC1_DATA, mask & !(1 << CASCADE_LINE));
            }
        }
    }

    /// 割り込み終了を通知 (EOI)
    ///
    /// # Safety
    ///
    /// 有効な割り込みコンテキスト内で、対応する IRQ ラインに対して
    /// 呼ばれる必要があります。
    pub unsafe fn end_of_interrupt(&mut self, line: u8) {
        // SAFETY: 呼び出し元が適切な割り込みコンテキストであることを保証している
        unsafe {
            // Slave からの割り込みなら Slave にも EOI を送る
            if line >= 8 {
                outb(PIC2_COMMAND, PIC_EOI);
            }
            // Master には常に EOI を送る
            outb(PIC1_COMMAND, PIC_EOI);
        }
    }
}

// グローバル PIC インスタンス
pub static PICS: Mutex<ChainedPics> = Mutex::new(ChainedPics::new());

/// IRQ ラインへ EOI を送る（ハンドラ向けの入口）
pub fn end_of_interrupt(line: u8) {
    // SAFETY: IRQ ハンドラおよび割り込み無効区間からのみ呼ばれる
    unsafe {
        PICS.lock().end_of_interrupt(line);
    }
}
