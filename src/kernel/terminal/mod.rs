// src/kernel/terminal/mod.rs

//! Virtual-terminal multiplexer.
//!
//! Three independent terminal records, each with a cooked line buffer, a
//! saved cursor and a dedicated backing video page. Exactly one terminal
//! is *foreground*: its content lives in the real VGA buffer, everyone
//! else's in their backing page. The keyboard IRQ feeds the foreground
//! terminal; processes read and write whichever terminal owns them,
//! visible or not.
//!
//! Locking: each record sits in an [`IrqLock`]; the blocking `read` loop
//! releases and reacquires it on every iteration, which is the only window
//! in which the keyboard IRQ can deposit characters for the waiting
//! reader.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::kernel::core::TerminalId;
use crate::sync::IrqLock;
use crate::vga_buffer::{self, TextWriter, VideoTarget};

/// Number of virtual terminals.
pub const NUM_TERMINALS: usize = 3;

/// Capacity of a terminal's line buffer.
pub const TERMINAL_BUF_SIZE: usize = 128;

/// What [`LineBuffer::push`] did with a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Byte stored in the buffer.
    Stored,
    /// Newline with no reader waiting: buffer discarded (byte not stored).
    ClearedLine,
    /// Backspace consumed the previous byte.
    Erased,
    /// No room (or nothing to erase); byte dropped, no echo.
    Rejected,
}

/// Cooked input line for one terminal.
#[derive(Debug)]
pub struct LineBuffer {
    buf: [u8; TERMINAL_BUF_SIZE],
    index: usize,
    reading: bool,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; TERMINAL_BUF_SIZE],
            index: 0,
            reading: false,
        }
    }

    /// Applies one input byte under the cooked-line rules.
    ///
    /// The final slot is reserved so a newline can always terminate a full
    /// line; a newline arriving while nobody reads discards the pending
    /// line (it could never be consumed).
    pub fn push(&mut self, byte: u8) -> PushOutcome {
        match byte {
            b'\n' if !self.reading => {
                self.clear();
                PushOutcome::ClearedLine
            }
            0x08 => {
                if self.index > 0 {
                    self.index -= 1;
                    self.buf[self.index] = 0;
                    PushOutcome::Erased
                } else {
                    PushOutcome::Rejected
                }
            }
            _ => {
                let room = if byte == b'\n' {
                    self.index < TERMINAL_BUF_SIZE
                } else {
                    self.index < TERMINAL_BUF_SIZE - 1
                };
                if room {
                    self.buf[self.index] = byte;
                    self.index += 1;
                    PushOutcome::Stored
                } else {
                    PushOutcome::Rejected
                }
            }
        }
    }

    /// Whether a blocked reader may complete: buffer full or newline-
    /// terminated.
    #[must_use]
    pub fn line_complete(&self) -> bool {
        self.index == TERMINAL_BUF_SIZE || (self.index > 0 && self.buf[self.index - 1] == b'\n')
    }

    /// Copies out up to `out.len()` buffered bytes, then clears.
    pub fn take(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.index);
        out[..n].copy_from_slice(&self.buf[..n]);
        self.clear();
        n
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.index]
    }

    fn clear(&mut self) {
        self.buf = [0; TERMINAL_BUF_SIZE];
        self.index = 0;
    }
}

/// One virtual terminal.
pub struct Terminal {
    line: LineBuffer,
    /// Cursor (col, row), authoritative while the writer targets another
    /// page; refreshed from the writer whenever it is retargeted away.
    cursor: (usize, usize),
}

impl Terminal {
    const fn new() -> Self {
        Self {
            line: LineBuffer::new(),
            cursor: (0, 0),
        }
    }
}

static TERMINALS: [IrqLock<Terminal>; NUM_TERMINALS] = [
    IrqLock::new(Terminal::new()),
    IrqLock::new(Terminal::new()),
    IrqLock::new(Terminal::new()),
];

/// Index of the foreground terminal.
static FOREGROUND: AtomicUsize = AtomicUsize::new(0);

/// The terminal currently aliased onto physical VGA memory.
pub fn foreground() -> TerminalId {
    FOREGROUND.load(Ordering::Acquire)
}

/// Repoints the foreground index. The video-page swap around this is done
/// by `process::focus_terminal`.
pub(crate) fn set_foreground(terminal: TerminalId) {
    FOREGROUND.store(terminal, Ordering::Release);
}

/// The video page a process on `terminal` should render to right now.
pub fn video_target_for(terminal: TerminalId) -> VideoTarget {
    if terminal == foreground() {
        VideoTarget::Vga
    } else {
        VideoTarget::Backing(terminal)
    }
}

/// Clears the backing pages and resets every record. Boot only.
pub fn init() {
    for terminal in 0..NUM_TERMINALS {
        vga_buffer::with_writer(|w| {
            w.retarget(VideoTarget::Backing(terminal));
            w.clear();
            w.retarget(VideoTarget::Vga);
        });
    }
}

/// Runs `f` against the page `terminal` should render to, preserving the
/// writer's previous destination and cursor when they differ.
///
/// This is the single place that knows how to write "behind" the
/// foreground: the cursor travels through the terminal record, not the
/// writer, for pages the writer is not currently parked on.
fn with_writer_for<R>(
    terminal: TerminalId,
    record: &mut Terminal,
    f: impl FnOnce(&mut TextWriter) -> R,
) -> R {
    let desired = video_target_for(terminal);

    vga_buffer::with_writer(|w| {
        if w.target() == desired {
            return f(w);
        }

        let prev_target = w.target();
        let prev_cursor = w.cursor();

        w.retarget(desired);
        let (col, row) = record.cursor;
        w.set_cursor(col, row);

        let result = f(w);

        record.cursor = w.cursor();
        w.retarget(prev_target);
        w.set_cursor(prev_cursor.0, prev_cursor.1);

        result
    })
}

/// Keyboard input path: cooked handling plus echo, atomically under the
/// foreground terminal's lock.
pub fn input(byte: u8) {
    let fg = foreground();
    let mut record = TERMINALS[fg].lock();

    let outcome = record.line.push(byte);
    if outcome == PushOutcome::Rejected {
        return;
    }

    with_writer_for(fg, &mut record, |w| w.write_byte(byte));
}

/// Blocking line read for the process that owns `terminal`.
///
/// Marks the terminal as being read (so newlines start accumulating),
/// then spins - dropping the lock every iteration so the keyboard IRQ can
/// make progress - until a full line or a full buffer is available.
pub fn read(terminal: TerminalId, buf: &mut [u8]) -> usize {
    TERMINALS[terminal].lock().line.reading = true;

    loop {
        let mut record = TERMINALS[terminal].lock();
        if record.line.line_complete() {
            let n = record.line.take(buf);
            record.line.reading = false;
            return n;
        }
        drop(record);

        core::hint::spin_loop();
    }
}

/// Writes `buf` to the terminal owning the calling process, foreground or
/// not, and advances its cursor.
pub fn write(terminal: TerminalId, buf: &[u8]) -> usize {
    let mut record = TERMINALS[terminal].lock();

    with_writer_for(terminal, &mut record, |w| {
        for &byte in buf {
            w.write_byte(byte);
        }
    });

    buf.len()
}

/// Clears the foreground terminal's screen and re-echoes its pending line
/// (ctrl+L). The cursor ends just after the re-echoed input.
pub fn clear_screen() {
    let fg = foreground();
    let mut record = TERMINALS[fg].lock();

    // Copy the pending bytes out so the closure doesn't alias the record.
    let mut pending = [0u8; TERMINAL_BUF_SIZE];
    let len = record.line.pending().len();
    pending[..len].copy_from_slice(record.line.pending());

    with_writer_for(fg, &mut record, |w| {
        w.clear();
        for &byte in &pending[..len] {
            w.write_byte(byte);
        }
    });
}

/// Saves the writer's live cursor into `terminal`'s record (pause path).
pub fn save_cursor(terminal: TerminalId) {
    let cursor = vga_buffer::with_writer(|w| w.cursor());
    TERMINALS[terminal].lock().cursor = cursor;
}

/// The saved cursor of `terminal` (resume path).
pub fn saved_cursor(terminal: TerminalId) -> (usize, usize) {
    TERMINALS[terminal].lock().cursor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_accumulate_until_newline() {
        let mut line = LineBuffer::new();
        line.reading = true;

        for &b in b"hello" {
            assert_eq!(line.push(b), PushOutcome::Stored);
        }
        assert!(!line.line_complete());

        assert_eq!(line.push(b'\n'), PushOutcome::Stored);
        assert!(line.line_complete());

        let mut out = [0u8; 128];
        assert_eq!(line.take(&mut out), 6);
        assert_eq!(&out[..6], b"hello\n");
        assert_eq!(line.pending(), b"");
    }

    #[test]
    fn backspace_erases_only_buffered_bytes() {
        let mut line = LineBuffer::new();
        line.reading = true;

        assert_eq!(line.push(0x08), PushOutcome::Rejected);

        line.push(b'a');
        line.push(b'b');
        assert_eq!(line.push(0x08), PushOutcome::Erased);
        assert_eq!(line.pending(), b"a");
    }

    #[test]
    fn last_slot_is_reserved_for_newline() {
        let mut line = LineBuffer::new();
        line.reading = true;

        for i in 0..TERMINAL_BUF_SIZE - 1 {
            assert_eq!(line.push(b'a' + (i % 26) as u8), PushOutcome::Stored);
        }
        // Buffer has one slot left: ordinary bytes are refused...
        assert_eq!(line.push(b'x'), PushOutcome::Rejected);
        // ...but a newline still fits and completes the line.
        assert_eq!(line.push(b'\n'), PushOutcome::Stored);
        assert!(line.line_complete());

        let mut out = [0u8; TERMINAL_BUF_SIZE];
        assert_eq!(line.take(&mut out), TERMINAL_BUF_SIZE);
    }

    #[test]
    fn newline_without_reader_discards_pending_input() {
        let mut line = LineBuffer::new();

        line.push(b'l');
        line.push(b's');
        assert_eq!(line.push(b'\n'), PushOutcome::ClearedLine);
        assert_eq!(line.pending(), b"");
        assert!(!line.line_complete());
    }

    #[test]
    fn short_reads_truncate() {
        let mut line = LineBuffer::new();
        line.reading = true;

        for &b in b"abcdef\n" {
            line.push(b);
        }

        let mut out = [0u8; 4];
        assert_eq!(line.take(&mut out), 4);
        assert_eq!(&out, b"abcd");
        // A take clears everything, even unread bytes.
        assert_eq!(line.pending(), b"");
    }

    #[test]
    fn successive_lines_concatenate_in_order() {
        let mut line = LineBuffer::new();
        line.reading = true;

        let mut collected = [0u8; 64];
        let mut total = 0;

        for chunk in [&b"one\n"[..], &b"two\n"[..], &b"three\n"[..]] {
            for &b in chunk {
                line.push(b);
            }
            assert!(line.line_complete());
            total += line.take(&mut collected[total..]);
        }

        assert_eq!(&collected[..total], b"one\ntwo\nthree\n");
    }
}
