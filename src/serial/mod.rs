// src/serial/mod.rs

//! Serial port driver (COM1) for debugging output
//!
//! Provides polled UART output on COM1 (0x3F8), 38400 baud, 8 data bits,
//! no parity, 1 stop bit. This is the kernel's debug channel: everything
//! written here is invisible to the user terminals, so IRQ handlers and
//! the panic path can log freely without disturbing the screen.

use core::fmt::{self, Write};

use x86::io::{inb, outb};

use crate::sync::IrqLock;

/// COM1 base port
const COM1: u16 = 0x3F8;

/// Divisor for 38400 baud (115200 / 3)
const BAUD_DIVISOR: u16 = 3;

/// Line status register offset
const LSR: u16 = 5;
/// LSR bit: transmit holding register empty
const LSR_THR_EMPTY: u8 = 0x20;

/// Polled COM1 transmitter.
pub struct SerialPort {
    initialized: bool,
}

impl SerialPort {
    const fn new() -> Self {
        Self { initialized: false }
    }

    /// Programs baud rate, frame format and FIFOs.
    pub fn init(&mut self) {
        // SAFETY: standard 16550 initialization sequence on COM1; all ports
        // belong to this device.
        unsafe {
            outb(COM1 + 1, 0x00); // Disable interrupts
            outb(COM1 + 3, 0x80); // DLAB on
            outb(COM1, (BAUD_DIVISOR & 0xFF) as u8);
            outb(COM1 + 1, (BAUD_DIVISOR >> 8) as u8);
            outb(COM1 + 3, 0x03); // 8N1, DLAB off
            outb(COM1 + 2, 0xC7); // FIFO: enable, clear, 14-byte threshold
            outb(COM1 + 4, 0x0B); // DTR + RTS + OUT2
        }
        self.initialized = true;
    }

    fn write_byte(&mut self, byte: u8) {
        if !self.initialized {
            return;
        }

        // SAFETY: polling LSR then writing THR is the standard transmit
        // sequence; bounded wait keeps a wedged UART from hanging the kernel.
        unsafe {
            let mut spins = 0u32;
            while inb(COM1 + LSR) & LSR_THR_EMPTY == 0 {
                spins += 1;
                if spins > 100_000 {
                    return;
                }
            }
            outb(COM1, byte);
        }
    }
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Global COM1 instance. Last in the kernel lock order.
static SERIAL1: IrqLock<SerialPort> = IrqLock::new(SerialPort::new());

/// Initializes the debug serial port. Safe to call once during early boot.
pub fn init() {
    SERIAL1.lock().init();
}

/// Writes formatted text to the debug channel.
pub fn write_fmt(args: fmt::Arguments<'_>) {
    // Output is best effort; a missing UART must never break the kernel.
    let _ = SERIAL1.lock().write_fmt(args);
}
