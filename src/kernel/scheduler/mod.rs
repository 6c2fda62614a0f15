// src/kernel/scheduler/mod.rs
//! Preemptive round-robin scheduler, driven by the timer IRQ.
//!
//! Each tick rotates to the next live EXECUTING PID after the active one
//! in bitmap order. Pausing copies the freshly deposited interrupt frame
//! into the PCB and detaches the task's address-space windows; resuming
//! reattaches the next task's and returns through its saved frame, so the
//! suspension point of every process is always an interrupt trampoline
//! entry.

use crate::arch::x86::interrupts::TIMER_LINE;
use crate::arch::x86::pic;
use crate::arch::x86::trampoline::IntRegs;
use crate::kernel::process::{self, PROCESS};

/// Timer-tick entry, called from interrupt dispatch.
///
/// Returns (letting the dispatcher send EOI and `iretd` back into the
/// interrupted context) when the system is idle or no other process is
/// runnable; otherwise switches away and never returns.
pub fn timer_tick(frame: &mut IntRegs) {
    let next = {
        let table = PROCESS.lock();

        // Idle system: nothing to rotate.
        let Some(active) = table.active() else {
            return;
        };

        // No other EXECUTING process: keep running the current one.
        let Some(next) = table.next_running_after(active) else {
            return;
        };

        next
    };

    process::pause_task(frame);

    // The switch leaves through iretd, so acknowledge the timer first.
    pic::end_of_interrupt(TIMER_LINE);

    if process::resume_task(next).is_err() {
        // Resumption refused; fall back into the interrupted frame.
        crate::debug_println!("[SCHED] resume of pid {} failed", next);
    }
}
