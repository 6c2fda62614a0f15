// src/kernel/driver/keyboard.rs
//! PS/2 キーボードドライバ
//!
//! スキャンコードのデコードは `pc-keyboard` クレートに任せ、ここでは
//! 端末切り替え (alt+F1-F3)、画面クリア (ctrl+L)、行バッファへの投入
//! というカーネル側の振る舞いだけを実装します。
//!
//! alt/ctrl の押下状態はキーイベントから自前で追跡します。両方の
//! shift が押されている場合など、離鍵イベントの癖はデコーダ側が
//! 吸収してくれます。

use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, KeyState, Keyboard, ScancodeSet1};
use x86::io::inb;

use crate::arch::x86::interrupts::KEYBOARD_LINE;
use crate::arch::x86::pic::PICS;
use crate::arch::x86::trampoline::IntRegs;
use crate::kernel::{process, terminal};
use crate::sync::IrqLock;

/// PS/2 データポート
const PS2_DATA: u16 = 0x60;

/// デコーダと修飾キー状態
struct KeyboardState {
    decoder: Keyboard<layouts::Us104Key, ScancodeSet1>,
    alt: bool,
    ctrl: bool,
}

lazy_static! {
    static ref KEYBOARD: IrqLock<KeyboardState> = IrqLock::new(KeyboardState {
        decoder: Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore),
        alt: false,
        ctrl: false,
    });
}

/// キーボード割り込みを許可する
pub fn init() {
    // SAFETY: IDT にキーボードハンドラ登録済みの状態で呼ばれる
    unsafe {
        PICS.lock().unmask_line(KEYBOARD_LINE);
    }
}

/// IRQ1 ハンドラ本体
///
/// alt+F# による端末切り替えはコンテキストスイッチに入るため、その
/// 経路ではこの関数は戻りません（EOI も切り替え側が送ります）。
pub fn handle_irq(frame: &mut IntRegs) {
    // SAFETY: IRQ1 到着時は出力バッファにスキャンコードがある
    let scancode = unsafe { inb(PS2_DATA) };

    let mut state = KEYBOARD.lock();

    let Ok(Some(event)) = state.decoder.add_byte(scancode) else {
        return;
    };

    let pressed = event.state == KeyState::Down;
    match event.code {
        KeyCode::LAlt | KeyCode::RAltGr => state.alt = pressed,
        KeyCode::LControl | KeyCode::RControl => state.ctrl = pressed,
        _ => {}
    }

    let alt = state.alt;
    let ctrl = state.ctrl;

    let Some(key) = state.decoder.process_keyevent(event) else {
        return;
    };
    drop(state);

    match key {
        DecodedKey::RawKey(code) => {
            if alt {
                let target = match code {
                    KeyCode::F1 => 0,
                    KeyCode::F2 => 1,
                    KeyCode::F3 => 2,
                    _ => return,
                };
                // EOI は focus_terminal がコンテキスト切り替えの直前に送る。
                // 既にフォーカス済みのときだけここへ戻ってくる。
                process::focus_terminal(target, frame);
            }
        }
        DecodedKey::Unicode(c) => {
            if ctrl && (c == 'l' || c == 'L') {
                terminal::clear_screen();
                return;
            }

            let byte = match c {
                '\t' => b' ',
                c if c.is_ascii() => c as u8,
                _ => return,
            };

            terminal::input(byte);
        }
    }
}
